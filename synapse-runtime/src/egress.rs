//! Egress hub: route deliverable observations to output sinks.

use crate::interfaces::{OutputAdapter, RuntimeError};
use crate::reflex::CONTROL_SYSTEM_MODE_CHANGED;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use synapse_core::{Observation, ObservationType};
use tracing::debug;

/// True when an observation is meant for the outside world: a
/// handler-emitted MESSAGE, or a mode-change CONTROL the operator should
/// see.
pub fn should_egress(obs: &Observation) -> bool {
    match obs.obs_type {
        ObservationType::Message => obs.is_agent_sourced(),
        ObservationType::Control => obs
            .control_payload()
            .is_some_and(|c| c.kind == CONTROL_SYSTEM_MODE_CHANGED),
        _ => false,
    }
}

/// Session-aware fan-in point for output adapters.
pub struct EgressHub {
    default: RwLock<Option<Arc<dyn OutputAdapter>>>,
    by_session: RwLock<HashMap<String, Arc<dyn OutputAdapter>>>,
    dropped_total: AtomicU64,
}

impl EgressHub {
    pub fn new() -> Self {
        Self {
            default: RwLock::new(None),
            by_session: RwLock::new(HashMap::new()),
            dropped_total: AtomicU64::new(0),
        }
    }

    pub fn register_default(&self, adapter: Arc<dyn OutputAdapter>) {
        *self.default.write() = Some(adapter);
    }

    pub fn register_session(&self, session_key: impl Into<String>, adapter: Arc<dyn OutputAdapter>) {
        self.by_session.write().insert(session_key.into(), adapter);
    }

    /// Observations that found no adapter at dispatch time.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Deliver one observation: the session-specific adapter wins, then the
    /// default; with neither, the observation is dropped and counted.
    /// Adapter failures bubble up for the egress loop to log - they never
    /// affect the main path.
    pub async fn dispatch(&self, obs: &Observation) -> Result<(), RuntimeError> {
        let adapter = {
            let session_key = obs.session_key.as_deref().unwrap_or("");
            let by_session = self.by_session.read();
            by_session
                .get(session_key)
                .cloned()
                .or_else(|| self.default.read().clone())
        };

        match adapter {
            Some(adapter) => adapter.send(obs).await,
            None => {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                debug!(session = ?obs.session_key, "no egress adapter, dropping");
                Ok(())
            }
        }
    }
}

impl Default for EgressHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Map;
    use synapse_core::{Actor, SYSTEM_SESSION_KEY};

    struct RecordingAdapter {
        label: &'static str,
        seen: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl OutputAdapter for RecordingAdapter {
        async fn send(&self, obs: &Observation) -> Result<(), RuntimeError> {
            self.seen
                .lock()
                .push((self.label.to_string(), obs.obs_id.clone()));
            Ok(())
        }
    }

    fn agent_reply(session: &str) -> Observation {
        Observation::message("agent:echo", Some(session.into()), Actor::agent(), "reply")
    }

    #[test]
    fn test_should_egress_agent_message() {
        assert!(should_egress(&agent_reply("dm:a")));

        let user = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "hi");
        assert!(!should_egress(&user));
    }

    #[test]
    fn test_should_egress_mode_change_control() {
        let mode = Observation::control(
            "system_reflex",
            SYSTEM_SESSION_KEY,
            CONTROL_SYSTEM_MODE_CHANGED,
            Map::new(),
        );
        assert!(should_egress(&mode));

        let other = Observation::control(
            "system_reflex",
            SYSTEM_SESSION_KEY,
            "tuning_applied",
            Map::new(),
        );
        assert!(!should_egress(&other));
    }

    #[tokio::test]
    async fn test_session_adapter_preferred_over_default() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hub = EgressHub::new();
        hub.register_default(Arc::new(RecordingAdapter {
            label: "default",
            seen: seen.clone(),
        }));
        hub.register_session(
            "dm:a",
            Arc::new(RecordingAdapter {
                label: "session",
                seen: seen.clone(),
            }),
        );

        hub.dispatch(&agent_reply("dm:a")).await.unwrap();
        hub.dispatch(&agent_reply("dm:b")).await.unwrap();

        let log = seen.lock();
        assert_eq!(log[0].0, "session");
        assert_eq!(log[1].0, "default");
    }

    #[tokio::test]
    async fn test_no_adapter_counts_drop() {
        let hub = EgressHub::new();
        hub.dispatch(&agent_reply("dm:a")).await.unwrap();
        assert_eq!(hub.dropped_total(), 1);
    }
}
