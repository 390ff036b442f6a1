//! Session router: demultiplex the bus stream into per-session inboxes.
//!
//! One bounded FIFO inbox per session key. Enqueueing never blocks: a full
//! inbox drops the newest observation and counts it. Workers take the
//! receiving half of their inbox; when a worker dies the channel is
//! re-created transparently, so the watcher can always revive a session.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use synapse_core::{ActorType, Observation, ObservationType};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Default per-session inbox capacity.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Session key for observations that cannot be attributed.
pub const UNKNOWN_SESSION_KEY: &str = "unknown";

struct InboxEntry {
    tx: mpsc::Sender<Observation>,
    /// Receiver parked here until the session's worker claims it.
    rx: Option<mpsc::Receiver<Observation>>,
    enqueued: u64,
    dropped: u64,
}

pub struct SessionRouter {
    inbox_capacity: usize,
    system_session_key: String,
    inboxes: Mutex<HashMap<String, InboxEntry>>,
    dropped_total: AtomicU64,
}

impl SessionRouter {
    pub fn new(inbox_capacity: usize, system_session_key: impl Into<String>) -> Self {
        assert!(inbox_capacity > 0, "inbox capacity must be > 0");
        Self {
            inbox_capacity,
            system_session_key: system_session_key.into(),
            inboxes: Mutex::new(HashMap::new()),
            dropped_total: AtomicU64::new(0),
        }
    }

    pub fn system_session_key(&self) -> &str {
        &self.system_session_key
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Deterministic session key resolution.
    ///
    /// Explicit keys win. Otherwise: user messages get a `dm:` key derived
    /// from the actor, control-plane types collapse onto the system
    /// session, and everything else lands in the shared unknown session.
    pub fn resolve_session_key(&self, obs: &Observation) -> String {
        if let Some(key) = obs.session_key.as_deref() {
            if !key.is_empty() {
                return key.to_string();
            }
        }

        match obs.obs_type {
            ObservationType::Message => {
                let actor_id = obs.actor.actor_id();
                if obs.actor.actor_type == ActorType::User && !actor_id.is_empty() {
                    format!("dm:{}", actor_id)
                } else {
                    UNKNOWN_SESSION_KEY.to_string()
                }
            }
            ObservationType::Schedule
            | ObservationType::Alert
            | ObservationType::System
            | ObservationType::Control => self.system_session_key.clone(),
            ObservationType::WorldData => UNKNOWN_SESSION_KEY.to_string(),
        }
    }

    /// Route one observation into its session inbox.
    ///
    /// The resolved key is written back onto the observation so every
    /// downstream stage sees the same key. Returns false when the inbox was
    /// full and the observation was dropped.
    pub fn route(&self, mut obs: Observation) -> bool {
        let key = self.resolve_session_key(&obs);
        obs.session_key = Some(key.clone());

        let mut inboxes = self.inboxes.lock();
        let entry = inboxes.entry(key.clone()).or_insert_with(|| {
            debug!(session = %key, "creating session inbox");
            new_entry(self.inbox_capacity)
        });

        // A dead worker leaves a closed channel behind; re-pair so the
        // watcher-revived worker gets a live receiver. Anything still
        // buffered in the dead channel is gone, which is the same contract
        // as a GC'd session.
        if entry.tx.is_closed() && entry.rx.is_none() {
            debug!(session = %key, "re-creating inbox after worker loss");
            *entry = new_entry(self.inbox_capacity);
        }

        match entry.tx.try_send(obs) {
            Ok(()) => {
                entry.enqueued += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                entry.dropped += 1;
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                warn!(session = %key, "session inbox full, dropping newest");
                false
            }
            Err(TrySendError::Closed(_)) => {
                // Receiver vanished between the check and the send.
                entry.dropped += 1;
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Claim the receiving half of a session's inbox. Returns `None` when a
    /// live worker already holds it.
    pub fn take_receiver(&self, session_key: &str) -> Option<mpsc::Receiver<Observation>> {
        let mut inboxes = self.inboxes.lock();
        let entry = inboxes.get_mut(session_key)?;

        if let Some(rx) = entry.rx.take() {
            return Some(rx);
        }
        if entry.tx.is_closed() {
            *entry = new_entry(self.inbox_capacity);
            return entry.rx.take();
        }
        None
    }

    /// Stable, sorted snapshot of sessions with inboxes.
    pub fn list_active_sessions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inboxes.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop a session's inbox. Must be called by the GC after worker
    /// termination, otherwise the watcher keeps reviving the worker.
    pub fn remove_session(&self, session_key: &str) {
        self.inboxes.lock().remove(session_key);
    }

    /// Queued observations for one session (tests/inspection).
    pub fn inbox_depth(&self, session_key: &str) -> Option<usize> {
        let inboxes = self.inboxes.lock();
        inboxes
            .get(session_key)
            .map(|e| self.inbox_capacity - e.tx.capacity())
    }

    /// `(enqueued, dropped)` counters for one session's inbox.
    pub fn session_stats(&self, session_key: &str) -> Option<(u64, u64)> {
        let inboxes = self.inboxes.lock();
        inboxes.get(session_key).map(|e| (e.enqueued, e.dropped))
    }
}

fn new_entry(capacity: usize) -> InboxEntry {
    let (tx, rx) = mpsc::channel(capacity);
    InboxEntry {
        tx,
        rx: Some(rx),
        enqueued: 0,
        dropped: 0,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use synapse_core::{Actor, SYSTEM_SESSION_KEY};

    fn message(session: Option<&str>, actor: Actor, text: &str) -> Observation {
        Observation::message("text_input", session.map(String::from), actor, text)
    }

    #[test]
    fn test_explicit_session_key_wins() {
        let router = SessionRouter::new(8, SYSTEM_SESSION_KEY);
        let obs = message(Some("room:42"), Actor::user("alice"), "hi");
        assert_eq!(router.resolve_session_key(&obs), "room:42");
    }

    #[test]
    fn test_user_message_derives_dm_key() {
        let router = SessionRouter::new(8, SYSTEM_SESSION_KEY);
        let obs = message(None, Actor::user("alice"), "hi");
        assert_eq!(router.resolve_session_key(&obs), "dm:alice");
    }

    #[test]
    fn test_control_plane_types_go_to_system() {
        let router = SessionRouter::new(8, SYSTEM_SESSION_KEY);

        let mut schedule = Observation::schedule("timer", "tick");
        schedule.session_key = None;
        assert_eq!(router.resolve_session_key(&schedule), SYSTEM_SESSION_KEY);

        let mut alert = synapse_core::make_pain_alert(
            "adapter",
            "x",
            synapse_core::Severity::Low,
            "",
            None,
            None,
            None,
        );
        alert.session_key = None;
        assert_eq!(router.resolve_session_key(&alert), SYSTEM_SESSION_KEY);
    }

    #[test]
    fn test_unattributable_message_is_unknown() {
        let router = SessionRouter::new(8, SYSTEM_SESSION_KEY);
        let obs = message(None, Actor::unknown(), "hi");
        assert_eq!(router.resolve_session_key(&obs), UNKNOWN_SESSION_KEY);
    }

    #[tokio::test]
    async fn test_route_is_fifo_per_session() {
        let router = SessionRouter::new(8, SYSTEM_SESSION_KEY);
        for i in 0..3 {
            assert!(router.route(message(None, Actor::user("alice"), &format!("m{}", i))));
        }

        let mut rx = router.take_receiver("dm:alice").unwrap();
        for i in 0..3 {
            let obs = rx.recv().await.unwrap();
            assert_eq!(
                obs.message_payload().unwrap().normalized_text(),
                format!("m{}", i)
            );
            assert_eq!(obs.session_key.as_deref(), Some("dm:alice"));
        }
    }

    #[tokio::test]
    async fn test_full_inbox_drops_newest() {
        let router = SessionRouter::new(2, SYSTEM_SESSION_KEY);
        assert!(router.route(message(None, Actor::user("a"), "one")));
        assert!(router.route(message(None, Actor::user("a"), "two")));
        assert!(!router.route(message(None, Actor::user("a"), "three")));
        assert_eq!(router.dropped_total(), 1);
        assert_eq!(router.session_stats("dm:a"), Some((2, 1)));

        let mut rx = router.take_receiver("dm:a").unwrap();
        assert_eq!(rx.recv().await.unwrap().message_payload().unwrap().normalized_text(), "one");
        assert_eq!(rx.recv().await.unwrap().message_payload().unwrap().normalized_text(), "two");
    }

    #[test]
    fn test_take_receiver_only_once_while_alive() {
        let router = SessionRouter::new(8, SYSTEM_SESSION_KEY);
        router.route(message(None, Actor::user("a"), "hi"));

        let rx = router.take_receiver("dm:a");
        assert!(rx.is_some());
        assert!(router.take_receiver("dm:a").is_none(), "still held by worker");
    }

    #[tokio::test]
    async fn test_dead_worker_channel_is_recreated() {
        let router = SessionRouter::new(8, SYSTEM_SESSION_KEY);
        router.route(message(None, Actor::user("a"), "hi"));

        // Worker takes the receiver and dies.
        drop(router.take_receiver("dm:a").unwrap());

        // New traffic re-pairs the channel...
        assert!(router.route(message(None, Actor::user("a"), "again")));

        // ...and a revived worker can claim the fresh receiver.
        let mut rx = router.take_receiver("dm:a").unwrap();
        let obs = rx.recv().await.unwrap();
        assert_eq!(obs.message_payload().unwrap().normalized_text(), "again");
    }

    #[test]
    fn test_list_and_remove_sessions() {
        let router = SessionRouter::new(8, SYSTEM_SESSION_KEY);
        router.route(message(None, Actor::user("bob"), "hi"));
        router.route(message(None, Actor::user("alice"), "hi"));

        assert_eq!(router.list_active_sessions(), vec!["dm:alice", "dm:bob"]);

        router.remove_session("dm:alice");
        assert_eq!(router.list_active_sessions(), vec!["dm:bob"]);
    }
}
