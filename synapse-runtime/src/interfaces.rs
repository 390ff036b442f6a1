//! Abstract interfaces for the core's external collaborators.
//!
//! The agent, the memory service and the output adapters live outside the
//! dispatch core; only these narrow contracts matter here. Implementations
//! that wrap synchronous IO (database clients, provider HTTP calls) must
//! dispatch the blocking work via `tokio::task::spawn_blocking` - nothing
//! here may stall the event loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use synapse_core::{Observation, SessionState};
use synapse_gate::{GateDecision, GateHint};
use thiserror::Error;

/// Runtime errors surfaced at collaborator boundaries.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Egress error: {0}")]
    Egress(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One request to the intelligent handler.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub obs: Observation,
    pub decision: GateDecision,
    /// Snapshot of the owning session's state at dispatch time.
    pub session: SessionState,
    pub now: DateTime<Utc>,
    pub hint: GateHint,
}

/// What the handler produced: observations to republish plus a free-form
/// execution trace.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub emit: Vec<Observation>,
    pub trace: Map<String, Value>,
}

/// The intelligent handler. Called once per delivered MESSAGE observation;
/// head-of-line blocks its own session only.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn handle(&self, request: AgentRequest) -> Result<AgentOutcome, RuntimeError>;
}

/// Final status of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Ok,
    Error,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Ok => "ok",
            TurnStatus::Error => "error",
        }
    }
}

/// Persistence hooks. Every call site in the core is fail-open: errors are
/// logged and counted, never allowed to abort the observation path.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Persist a gated observation; returns the stored event id, if any.
    async fn append_event(&self, obs: &Observation) -> Result<Option<String>, RuntimeError>;

    /// Open a conversation turn for a delivered message.
    async fn start_turn(
        &self,
        session_key: &str,
        input_event_id: &str,
        plan: Option<Value>,
    ) -> Result<Option<String>, RuntimeError>;

    /// Close a turn after the agent returned or failed.
    async fn finish_turn(
        &self,
        turn_id: &str,
        status: TurnStatus,
        error_message: Option<&str>,
        final_output_obs_id: Option<&str>,
    ) -> Result<(), RuntimeError>;

    /// Flush buffered writes; called once during shutdown.
    async fn close(&self) -> Result<(), RuntimeError>;
}

/// Outbound delivery sink.
#[async_trait]
pub trait OutputAdapter: Send + Sync {
    async fn send(&self, obs: &Observation) -> Result<(), RuntimeError>;
}
