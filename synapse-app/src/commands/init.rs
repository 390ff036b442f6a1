use crate::config::AppConfig;
use anyhow::{bail, Result};
use std::path::Path;

const DEFAULT_GATE_YAML: &str = r#"# Synapse gate policy. Hot-reloaded while the core is running.
version: 1

scene_policies:
  dialogue:
    deliver_threshold: 0.7
    sink_threshold: 0.3
    default_action: sink
    default_model_tier: low
    default_response_policy: respond_now
    dedup_window_sec: 30.0
    max_reasons: 6

rules:
  dialogue:
    weights:
      base: 0.10
      mention: 0.40
      question_mark: 0.15
      long_text: 0.10
    keywords:
      urgent: 0.30
      error: 0.25
      help: 0.15
    long_text_len: 300

drop_escalation:
  burst_window_sec: 60.0
  burst_count_threshold: 5
  consecutive_threshold: 8
  cooldown_suggest_sec: 300.0

overrides:
  emergency_mode: false
  force_low_model: false
  drop_sessions: []
  deliver_sessions: []
  drop_actors: []
  deliver_actors: []

budget_thresholds:
  high_score: 0.75
  medium_score: 0.50

budget_profiles:
  tiny:
    level: tiny
    time_ms: 800
    max_tokens: 256
    max_parallel: 1
    evidence_allowed: false
    max_tool_calls: 0
    auto_clarify: true
  normal:
    level: normal
    time_ms: 1500
    max_tokens: 512
    max_parallel: 2
    evidence_allowed: true
    max_tool_calls: 1
  deep:
    level: deep
    time_ms: 3000
    max_tokens: 1024
    max_parallel: 4
    evidence_allowed: true
    max_tool_calls: 3
"#;

pub fn run() -> Result<()> {
    if Path::new("synapse.yaml").exists() {
        bail!("synapse.yaml already exists, refusing to overwrite");
    }
    if Path::new("gate.yaml").exists() {
        bail!("gate.yaml already exists, refusing to overwrite");
    }

    AppConfig::default().save("synapse.yaml")?;
    std::fs::write("gate.yaml", DEFAULT_GATE_YAML)?;

    println!("wrote synapse.yaml and gate.yaml");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use synapse_gate::GateConfig;

    #[test]
    fn test_default_gate_yaml_parses() {
        let config = GateConfig::from_yaml_str(DEFAULT_GATE_YAML).unwrap();
        assert_eq!(
            config.scene_policy(synapse_gate::Scene::Dialogue).deliver_threshold,
            0.7
        );
        assert_eq!(config.scene_rules(synapse_gate::Scene::Dialogue).weight("mention"), 0.40);
    }
}
