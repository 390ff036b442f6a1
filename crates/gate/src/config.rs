//! Gate configuration: scene policies, scoring rules, overrides and budgets.
//!
//! A [`GateConfig`] is an immutable snapshot. Mutation always produces a new
//! snapshot (see [`GateConfig::with_overrides`]); the provider swaps the
//! shared reference atomically so readers never observe a partial config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Supported config schema version.
pub const GATE_CONFIG_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GateConfigError {
    #[error("failed to read gate config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse gate config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unsupported gate config version: {0}")]
    UnsupportedVersion(u32),
}

/// Gate verdict for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Drop,
    Sink,
    Deliver,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateAction::Drop => "drop",
            GateAction::Sink => "sink",
            GateAction::Deliver => "deliver",
        }
    }
}

/// Gate-inferred classification of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    Dialogue,
    System,
    ToolCall,
    ToolResult,
    Alert,
    Unknown,
}

impl Scene {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scene::Dialogue => "dialogue",
            Scene::System => "system",
            Scene::ToolCall => "tool_call",
            Scene::ToolResult => "tool_result",
            Scene::Alert => "alert",
            Scene::Unknown => "unknown",
        }
    }
}

impl FromStr for Scene {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dialogue" => Ok(Scene::Dialogue),
            "system" => Ok(Scene::System),
            "tool_call" => Ok(Scene::ToolCall),
            "tool_result" => Ok(Scene::ToolResult),
            "alert" => Ok(Scene::Alert),
            "unknown" => Ok(Scene::Unknown),
            _ => Err(()),
        }
    }
}

/// Model tier hint for the downstream handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Low,
    High,
}

/// How the handler should respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePolicy {
    RespondNow,
    Clarify,
    Ack,
}

/// Budget profile level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetLevel {
    Tiny,
    Normal,
    Deep,
}

impl BudgetLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetLevel::Tiny => "tiny",
            BudgetLevel::Normal => "normal",
            BudgetLevel::Deep => "deep",
        }
    }
}

/// Execution budget handed to the handler. Enforcement is the handler's
/// responsibility; the gate only selects the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSpec {
    pub level: BudgetLevel,
    pub time_ms: u64,
    pub max_tokens: u32,
    pub max_parallel: u32,
    pub evidence_allowed: bool,
    pub max_tool_calls: u32,
    pub can_search_kb: bool,
    pub can_call_tools: bool,
    pub auto_clarify: bool,
    pub fallback_mode: bool,
}

impl Default for BudgetSpec {
    fn default() -> Self {
        Self::normal()
    }
}

impl BudgetSpec {
    pub fn tiny() -> Self {
        Self {
            level: BudgetLevel::Tiny,
            time_ms: 800,
            max_tokens: 256,
            max_parallel: 1,
            evidence_allowed: false,
            max_tool_calls: 0,
            can_search_kb: true,
            can_call_tools: true,
            auto_clarify: true,
            fallback_mode: false,
        }
    }

    pub fn normal() -> Self {
        Self {
            level: BudgetLevel::Normal,
            time_ms: 1500,
            max_tokens: 512,
            max_parallel: 2,
            evidence_allowed: true,
            max_tool_calls: 1,
            can_search_kb: true,
            can_call_tools: true,
            auto_clarify: false,
            fallback_mode: false,
        }
    }

    pub fn deep() -> Self {
        Self {
            level: BudgetLevel::Deep,
            time_ms: 3000,
            max_tokens: 1024,
            max_parallel: 4,
            evidence_allowed: true,
            max_tool_calls: 3,
            can_search_kb: true,
            can_call_tools: true,
            auto_clarify: false,
            fallback_mode: false,
        }
    }
}

/// Per-scene decision policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenePolicy {
    pub deliver_threshold: f64,
    pub sink_threshold: f64,
    pub default_action: GateAction,
    pub default_model_tier: Option<ModelTier>,
    pub default_response_policy: Option<ResponsePolicy>,
    pub dedup_window_sec: f64,
    pub max_reasons: usize,
}

impl Default for ScenePolicy {
    fn default() -> Self {
        Self {
            deliver_threshold: 0.7,
            sink_threshold: 0.3,
            default_action: GateAction::Sink,
            default_model_tier: Some(ModelTier::Low),
            default_response_policy: Some(ResponsePolicy::RespondNow),
            dedup_window_sec: 30.0,
            max_reasons: 6,
        }
    }
}

/// Scoring rules for one scene: weighted features plus keyword weights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneRules {
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub keywords: HashMap<String, f64>,
    #[serde(default = "default_long_text_len")]
    pub long_text_len: usize,
}

fn default_long_text_len() -> usize {
    300
}

impl SceneRules {
    pub fn weight(&self, name: &str) -> f64 {
        self.weights.get(name).copied().unwrap_or(0.0)
    }

    fn default_dialogue() -> Self {
        Self {
            weights: HashMap::from([
                ("base".to_string(), 0.10),
                ("mention".to_string(), 0.40),
                ("question_mark".to_string(), 0.15),
                ("long_text".to_string(), 0.10),
            ]),
            keywords: HashMap::from([
                ("urgent".to_string(), 0.30),
                ("error".to_string(), 0.25),
                ("help".to_string(), 0.15),
            ]),
            long_text_len: 300,
        }
    }
}

/// Runtime overrides, mutable only through snapshot replacement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverridesConfig {
    #[serde(default)]
    pub emergency_mode: bool,
    #[serde(default)]
    pub force_low_model: bool,
    #[serde(default)]
    pub drop_sessions: Vec<String>,
    #[serde(default)]
    pub deliver_sessions: Vec<String>,
    #[serde(default)]
    pub drop_actors: Vec<String>,
    #[serde(default)]
    pub deliver_actors: Vec<String>,
}

/// Partial update applied to [`OverridesConfig`]; `None` fields are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverridePatch {
    pub emergency_mode: Option<bool>,
    pub force_low_model: Option<bool>,
    pub drop_sessions: Option<Vec<String>>,
    pub deliver_sessions: Option<Vec<String>>,
    pub drop_actors: Option<Vec<String>>,
    pub deliver_actors: Option<Vec<String>>,
}

impl OverridePatch {
    pub fn force_low_model(value: bool) -> Self {
        Self {
            force_low_model: Some(value),
            ..Self::default()
        }
    }

    pub fn emergency_mode(value: bool) -> Self {
        Self {
            emergency_mode: Some(value),
            ..Self::default()
        }
    }
}

/// Drop-burst escalation knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropEscalationConfig {
    #[serde(default = "default_burst_window")]
    pub burst_window_sec: f64,
    #[serde(default = "default_burst_count")]
    pub burst_count_threshold: usize,
    #[serde(default = "default_consecutive")]
    pub consecutive_threshold: usize,
    #[serde(default = "default_cooldown_suggest")]
    pub cooldown_suggest_sec: f64,
}

fn default_burst_window() -> f64 {
    60.0
}
fn default_burst_count() -> usize {
    5
}
fn default_consecutive() -> usize {
    8
}
fn default_cooldown_suggest() -> f64 {
    300.0
}

impl Default for DropEscalationConfig {
    fn default() -> Self {
        Self {
            burst_window_sec: default_burst_window(),
            burst_count_threshold: default_burst_count(),
            consecutive_threshold: default_consecutive(),
            cooldown_suggest_sec: default_cooldown_suggest(),
        }
    }
}

/// Score bands that pick the budget profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetThresholds {
    #[serde(default = "default_high_score")]
    pub high_score: f64,
    #[serde(default = "default_medium_score")]
    pub medium_score: f64,
}

fn default_high_score() -> f64 {
    0.75
}
fn default_medium_score() -> f64 {
    0.50
}

impl Default for BudgetThresholds {
    fn default() -> Self {
        Self {
            high_score: default_high_score(),
            medium_score: default_medium_score(),
        }
    }
}

/// Immutable gate configuration snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub version: u32,
    pub scene_policies: HashMap<Scene, ScenePolicy>,
    pub rules: HashMap<Scene, SceneRules>,
    pub drop_escalation: DropEscalationConfig,
    pub overrides: OverridesConfig,
    pub budget_thresholds: BudgetThresholds,
    pub budget_profiles: HashMap<BudgetLevel, BudgetSpec>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            version: GATE_CONFIG_VERSION,
            scene_policies: HashMap::new(),
            rules: HashMap::from([(Scene::Dialogue, SceneRules::default_dialogue())]),
            drop_escalation: DropEscalationConfig::default(),
            overrides: OverridesConfig::default(),
            budget_thresholds: BudgetThresholds::default(),
            budget_profiles: HashMap::from([
                (BudgetLevel::Tiny, BudgetSpec::tiny()),
                (BudgetLevel::Normal, BudgetSpec::normal()),
                (BudgetLevel::Deep, BudgetSpec::deep()),
            ]),
        }
    }
}

impl GateConfig {
    /// Policy for a scene, falling back to built-in per-scene defaults.
    pub fn scene_policy(&self, scene: Scene) -> ScenePolicy {
        if let Some(policy) = self.scene_policies.get(&scene) {
            return policy.clone();
        }

        match scene {
            Scene::Alert => ScenePolicy {
                deliver_threshold: 0.0,
                sink_threshold: 0.0,
                default_action: GateAction::Deliver,
                default_model_tier: None,
                default_response_policy: None,
                ..ScenePolicy::default()
            },
            // Control-plane traffic (ALERT/CONTROL/SCHEDULE on the system
            // session) must reach the system handler, which only sees
            // delivered observations.
            Scene::System => ScenePolicy {
                default_action: GateAction::Deliver,
                default_model_tier: None,
                ..ScenePolicy::default()
            },
            Scene::ToolCall => ScenePolicy {
                default_action: GateAction::Deliver,
                default_model_tier: None,
                ..ScenePolicy::default()
            },
            Scene::ToolResult => ScenePolicy {
                default_action: GateAction::Sink,
                default_model_tier: None,
                ..ScenePolicy::default()
            },
            Scene::Dialogue | Scene::Unknown => ScenePolicy::default(),
        }
    }

    /// Scoring rules for a scene; scenes without rules score zero-weight.
    pub fn scene_rules(&self, scene: Scene) -> SceneRules {
        self.rules.get(&scene).cloned().unwrap_or_default()
    }

    pub fn budget_for_level(&self, level: BudgetLevel) -> BudgetSpec {
        if let Some(profile) = self.budget_profiles.get(&level) {
            return profile.clone();
        }
        match level {
            BudgetLevel::Tiny => BudgetSpec::tiny(),
            BudgetLevel::Normal => BudgetSpec::normal(),
            BudgetLevel::Deep => BudgetSpec::deep(),
        }
    }

    /// Pick the budget envelope for a decision.
    ///
    /// ALERT always gets the deep profile, tool results the tiny one with
    /// capability clamps; everything else is banded by score.
    pub fn select_budget(&self, score: f64, scene: Scene) -> BudgetSpec {
        let level = match scene {
            Scene::Alert => BudgetLevel::Deep,
            Scene::ToolCall => BudgetLevel::Normal,
            Scene::ToolResult => BudgetLevel::Tiny,
            _ => {
                if score >= self.budget_thresholds.high_score {
                    BudgetLevel::Deep
                } else if score >= self.budget_thresholds.medium_score {
                    BudgetLevel::Normal
                } else {
                    BudgetLevel::Tiny
                }
            }
        };

        let mut budget = self.budget_for_level(level);

        if scene == Scene::ToolResult {
            budget.can_search_kb = false;
            budget.can_call_tools = false;
            budget.evidence_allowed = false;
            budget.max_tool_calls = 0;
        }
        if scene == Scene::Dialogue && budget.level == BudgetLevel::Tiny {
            budget.auto_clarify = true;
        }

        budget
    }

    /// Produce a new snapshot with the patch applied, or `None` when the
    /// patch changes nothing.
    pub fn with_overrides(&self, patch: &OverridePatch) -> Option<GateConfig> {
        let mut overrides = self.overrides.clone();
        if let Some(v) = patch.emergency_mode {
            overrides.emergency_mode = v;
        }
        if let Some(v) = patch.force_low_model {
            overrides.force_low_model = v;
        }
        if let Some(v) = &patch.drop_sessions {
            overrides.drop_sessions = v.clone();
        }
        if let Some(v) = &patch.deliver_sessions {
            overrides.deliver_sessions = v.clone();
        }
        if let Some(v) = &patch.drop_actors {
            overrides.drop_actors = v.clone();
        }
        if let Some(v) = &patch.deliver_actors {
            overrides.deliver_actors = v.clone();
        }

        if overrides == self.overrides {
            return None;
        }
        let mut next = self.clone();
        next.overrides = overrides;
        Some(next)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, GateConfigError> {
        let raw: RawGateConfig = serde_yaml::from_str(raw)?;
        raw.into_config()
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, GateConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

/// Raw YAML shape. Scene keys arrive as strings; unknown scenes are skipped
/// rather than failing the whole reload.
#[derive(Debug, Default, Deserialize)]
struct RawGateConfig {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    scene_policies: HashMap<String, ScenePolicy>,
    #[serde(default)]
    rules: HashMap<String, SceneRules>,
    #[serde(default)]
    drop_escalation: Option<DropEscalationConfig>,
    #[serde(default)]
    overrides: Option<OverridesConfig>,
    #[serde(default)]
    budget_thresholds: Option<BudgetThresholds>,
    #[serde(default)]
    budget_profiles: HashMap<String, BudgetSpec>,
}

fn default_version() -> u32 {
    GATE_CONFIG_VERSION
}

impl RawGateConfig {
    fn into_config(self) -> Result<GateConfig, GateConfigError> {
        if self.version != GATE_CONFIG_VERSION {
            return Err(GateConfigError::UnsupportedVersion(self.version));
        }

        let mut cfg = GateConfig::default();

        for (key, policy) in self.scene_policies {
            match Scene::from_str(&key) {
                Ok(scene) => {
                    cfg.scene_policies.insert(scene, policy);
                }
                Err(()) => tracing::warn!(scene = %key, "skipping unknown scene policy"),
            }
        }

        for (key, rules) in self.rules {
            match Scene::from_str(&key) {
                Ok(scene) => {
                    cfg.rules.insert(scene, rules);
                }
                Err(()) => tracing::warn!(scene = %key, "skipping unknown scene rules"),
            }
        }

        if let Some(de) = self.drop_escalation {
            cfg.drop_escalation = de;
        }
        if let Some(ov) = self.overrides {
            cfg.overrides = ov;
        }
        if let Some(mut bt) = self.budget_thresholds {
            if bt.medium_score > bt.high_score {
                bt.medium_score = bt.high_score;
            }
            cfg.budget_thresholds = bt;
        }

        for (key, profile) in self.budget_profiles {
            let level = match key.as_str() {
                "tiny" => BudgetLevel::Tiny,
                "normal" => BudgetLevel::Normal,
                "deep" => BudgetLevel::Deep,
                other => {
                    tracing::warn!(profile = %other, "skipping unknown budget profile");
                    continue;
                }
            };
            cfg.budget_profiles.insert(level, profile);
        }

        Ok(cfg)
    }
}
