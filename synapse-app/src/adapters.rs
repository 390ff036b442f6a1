//! Console adapters and the demo agent used by `synapse run`.
//!
//! Real deployments plug their own adapters and an LLM-backed agent in
//! through the same traits; these exist so the core can be driven end to
//! end from a terminal.

use async_trait::async_trait;
use std::sync::Arc;
use synapse_core::{make_pain_alert, Actor, Observation, Severity, SourceKind};
use synapse_runtime::{
    Agent, AgentOutcome, AgentRequest, InputBus, OutputAdapter, PublishError, RuntimeError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Prints delivered observations to stdout.
pub struct ConsoleOutputAdapter;

#[async_trait]
impl OutputAdapter for ConsoleOutputAdapter {
    async fn send(&self, obs: &Observation) -> Result<(), RuntimeError> {
        match &obs.payload {
            synapse_core::Payload::Message(mp) => {
                println!("[{}] {}", obs.session_key.as_deref().unwrap_or("-"), mp.normalized_text());
            }
            other => {
                println!(
                    "[{}] {}",
                    obs.session_key.as_deref().unwrap_or("-"),
                    serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".into())
                );
            }
        }
        Ok(())
    }
}

/// Reads lines from stdin and publishes them as user MESSAGE observations.
///
/// Adapter failures surface as pain alerts on the same bus instead of
/// killing the loop.
pub async fn stdin_text_adapter(bus: InputBus, actor_id: String) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let session_key = format!("dm:{}", actor_id);
    info!(session = %session_key, "stdin adapter ready, type to talk");

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let obs = Observation::message(
                    "text_input",
                    Some(session_key.clone()),
                    Actor::user(actor_id.clone()),
                    line,
                );
                match bus.publish_nowait(obs) {
                    Ok(()) | Err(PublishError::QueueFull) => {}
                    Err(PublishError::Closed) => break,
                    Err(PublishError::Invalid(e)) => warn!(error = %e, "invalid input line"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                let alert = make_pain_alert(
                    "adapter",
                    "text_input",
                    Severity::Medium,
                    e.to_string(),
                    Some("IoError"),
                    None,
                    None,
                );
                if bus.publish_nowait(alert).is_err() {
                    break;
                }
            }
        }
    }
    info!("stdin adapter stopped");
}

/// Publishes a SCHEDULE heartbeat tick at a fixed interval.
pub async fn timer_tick_adapter(bus: InputBus, interval_seconds: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
    let mut tick_count: u64 = 0;

    loop {
        interval.tick().await;
        tick_count += 1;

        let mut obs = Observation::schedule("timer_tick", "tick");
        if let synapse_core::Payload::Schedule(sp) = &mut obs.payload {
            sp.data.insert("tick".into(), serde_json::Value::from(tick_count));
        }
        if matches!(bus.publish_nowait(obs), Err(PublishError::Closed)) {
            break;
        }
    }
}

/// Minimal demo agent: echoes the user's text back as an agent-sourced
/// message.
pub struct EchoAgent;

impl EchoAgent {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn handle(&self, request: AgentRequest) -> Result<AgentOutcome, RuntimeError> {
        let text = request
            .obs
            .message_payload()
            .map(|p| p.normalized_text())
            .unwrap_or_default();

        let mut reply = Observation::message(
            "agent:echo",
            request.obs.session_key.clone(),
            Actor::agent(),
            format!("you said: {}", text),
        );
        reply.source_kind = SourceKind::Internal;

        Ok(AgentOutcome {
            emit: vec![reply],
            trace: Default::default(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use synapse_core::SessionState;
    use synapse_gate::{Gate, GateConfig};

    #[tokio::test]
    async fn test_echo_agent_reply_is_agent_sourced() {
        let obs = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "hi");
        let gate = Gate::new();
        let config = GateConfig::default();
        let ctx = gate.context(Utc::now(), &config, "system", None, None);
        let outcome = gate.handle(&obs, &ctx);

        let request = AgentRequest {
            obs,
            hint: outcome.decision.hint.clone(),
            decision: outcome.decision,
            session: SessionState::new("dm:a"),
            now: Utc::now(),
        };

        let result = EchoAgent.handle(request).await.unwrap();
        assert_eq!(result.emit.len(), 1);
        assert!(result.emit[0].is_agent_sourced());
        assert_eq!(
            result.emit[0].message_payload().unwrap().normalized_text(),
            "you said: hi"
        );
    }
}
