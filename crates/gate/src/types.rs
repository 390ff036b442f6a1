//! Gate decision types: the pipeline's product and its working record.

use crate::config::{BudgetSpec, GateAction, GateConfig, ModelTier, ResponsePolicy, Scene};
use crate::metrics::GateMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use synapse_core::{Observation, SessionState};

/// Advisory metadata for the downstream handler: model tier, response
/// policy and the execution budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateHint {
    pub model_tier: ModelTier,
    pub response_policy: ResponsePolicy,
    pub budget: BudgetSpec,
    #[serde(default)]
    pub reason_tags: Vec<String>,
    #[serde(default)]
    pub debug: Map<String, Value>,
}

impl Default for GateHint {
    fn default() -> Self {
        Self {
            model_tier: ModelTier::Low,
            response_policy: ResponsePolicy::RespondNow,
            budget: BudgetSpec::default(),
            reason_tags: Vec::new(),
            debug: Map::new(),
        }
    }
}

/// The gate's verdict for one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub action: GateAction,
    pub scene: Scene,
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_worker: Option<String>,
    pub score: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub hint: GateHint,
}

/// Decision plus the side-effect lists the caller must execute: `emit`
/// observations are republished on the bus, `ingest` observations go into
/// the gate pools.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub decision: GateDecision,
    pub emit: Vec<Observation>,
    pub ingest: Vec<Observation>,
}

/// External health signal fed into the hard-bypass stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHealth {
    pub overload: bool,
}

/// Per-observation context handed to every stage. Borrows the caller's
/// config snapshot so the whole pipeline sees one consistent config.
pub struct GateContext<'a> {
    pub now: DateTime<Utc>,
    pub config: &'a GateConfig,
    pub system_session_key: &'a str,
    pub metrics: Option<&'a GateMetrics>,
    pub session_state: Option<&'a SessionState>,
    pub system_health: Option<SystemHealth>,
}

/// Extracted per-observation features used by the scoring stage.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub text_len: usize,
    pub has_mention: bool,
    pub has_question: bool,
    pub attachment_count: usize,
    pub mention_count: usize,
    pub recent_obs_len: usize,
    pub alert_severity: Option<String>,
}

/// Work-in-progress record threaded through the pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct GateWip {
    pub scene: Option<Scene>,
    pub features: Features,
    pub score: f64,
    pub reasons: Vec<String>,
    pub tags: HashMap<String, String>,
    pub fingerprint: Option<String>,

    pub action_hint: Option<GateAction>,
    pub model_tier: Option<ModelTier>,
    pub response_policy: Option<ResponsePolicy>,
    pub hint: Option<GateHint>,

    pub emit: Vec<Observation>,
    pub ingest: Vec<Observation>,

    pub decision: Option<GateDecision>,
}

impl GateWip {
    pub fn scene(&self) -> Scene {
        self.scene.unwrap_or(Scene::Unknown)
    }

    pub fn push_reason(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }
}
