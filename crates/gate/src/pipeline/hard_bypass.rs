//! Hard bypass: overload protection, empty-content drops and drop-burst
//! escalation. Runs before any scoring so junk never reaches the scorer.

use super::{GateStage, StageError};
use crate::config::GateAction;
use crate::types::{GateContext, GateWip};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use synapse_core::{make_pain_alert, Observation, ObservationType, Severity};

/// Sliding-window drop tracker.
struct DropMonitor {
    timestamps: VecDeque<f64>,
    consecutive: usize,
}

impl DropMonitor {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
            consecutive: 0,
        }
    }

    /// Record a drop; returns true when the burst or consecutive threshold
    /// is reached.
    fn record_drop(
        &mut self,
        now_s: f64,
        window_sec: f64,
        burst_threshold: usize,
        consecutive_threshold: usize,
    ) -> bool {
        self.timestamps.push_back(now_s);
        self.consecutive += 1;

        let cutoff = now_s - window_sec;
        while self.timestamps.front().is_some_and(|ts| *ts < cutoff) {
            self.timestamps.pop_front();
        }

        self.timestamps.len() >= burst_threshold || self.consecutive >= consecutive_threshold
    }

    fn reset_consecutive(&mut self) {
        self.consecutive = 0;
    }
}

pub struct HardBypass {
    monitor: Mutex<DropMonitor>,
}

impl HardBypass {
    pub fn new() -> Self {
        Self {
            monitor: Mutex::new(DropMonitor::new()),
        }
    }
}

impl Default for HardBypass {
    fn default() -> Self {
        Self::new()
    }
}

impl GateStage for HardBypass {
    fn name(&self) -> &'static str {
        "hard_bypass"
    }

    fn apply(
        &self,
        obs: &Observation,
        ctx: &GateContext<'_>,
        wip: &mut GateWip,
    ) -> Result<(), StageError> {
        let escalation = &ctx.config.drop_escalation;

        if ctx.system_health.is_some_and(|h| h.overload) {
            wip.action_hint = Some(GateAction::Drop);
            wip.push_reason("system_overload");

            let mut extra = Map::new();
            extra.insert(
                "cooldown_seconds".into(),
                Value::from(escalation.cooldown_suggest_sec),
            );
            wip.emit.push(make_pain_alert(
                "system",
                "gate_overload",
                Severity::High,
                "gate overload, dropping input",
                None,
                Some(ctx.system_session_key),
                Some(extra),
            ));
            return Ok(());
        }

        // Incoming alerts are the protection signal itself; they clear the
        // consecutive counter and are never dropped here.
        if obs.obs_type == ObservationType::Alert {
            self.monitor.lock().reset_consecutive();
            return Ok(());
        }

        if obs.obs_type == ObservationType::Message {
            let empty = obs.message_payload().map(|p| p.is_empty()).unwrap_or(false);
            if empty {
                wip.action_hint = Some(GateAction::Drop);
                wip.push_reason("empty_content");
            }
        }

        let mut monitor = self.monitor.lock();
        if wip.action_hint == Some(GateAction::Drop) {
            let now_s = ctx.now.timestamp_millis() as f64 / 1000.0;
            let escalate = monitor.record_drop(
                now_s,
                escalation.burst_window_sec,
                escalation.burst_count_threshold,
                escalation.consecutive_threshold,
            );
            if escalate {
                wip.tags.insert("drop_burst".into(), "true".into());

                let mut extra = Map::new();
                extra.insert(
                    "burst_window_sec".into(),
                    Value::from(escalation.burst_window_sec),
                );
                extra.insert(
                    "burst_count_threshold".into(),
                    Value::from(escalation.burst_count_threshold as u64),
                );
                extra.insert(
                    "consecutive_threshold".into(),
                    Value::from(escalation.consecutive_threshold as u64),
                );
                extra.insert(
                    "cooldown_seconds".into(),
                    Value::from(escalation.cooldown_suggest_sec),
                );
                wip.emit.push(make_pain_alert(
                    "gate",
                    "drop_burst",
                    Severity::High,
                    "drop burst detected",
                    None,
                    Some(ctx.system_session_key),
                    Some(extra),
                ));
            }
        } else {
            monitor.reset_consecutive();
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::types::SystemHealth;
    use chrono::Utc;
    use synapse_core::{Actor, SYSTEM_SESSION_KEY};

    fn ctx<'a>(config: &'a GateConfig, health: Option<SystemHealth>) -> GateContext<'a> {
        GateContext {
            now: Utc::now(),
            config,
            system_session_key: SYSTEM_SESSION_KEY,
            metrics: None,
            session_state: None,
            system_health: health,
        }
    }

    fn empty_message() -> Observation {
        Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "")
    }

    #[test]
    fn test_overload_drops_and_emits_pain() {
        let config = GateConfig::default();
        let stage = HardBypass::new();
        let mut wip = GateWip::default();

        let obs = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "hi");
        stage
            .apply(&obs, &ctx(&config, Some(SystemHealth { overload: true })), &mut wip)
            .unwrap();

        assert_eq!(wip.action_hint, Some(GateAction::Drop));
        assert!(wip.reasons.iter().any(|r| r == "system_overload"));
        assert_eq!(wip.emit.len(), 1);
        assert_eq!(
            synapse_core::extract_pain_key(&wip.emit[0]),
            "system:gate_overload"
        );
    }

    #[test]
    fn test_empty_message_drops() {
        let config = GateConfig::default();
        let stage = HardBypass::new();
        let mut wip = GateWip::default();

        stage
            .apply(&empty_message(), &ctx(&config, None), &mut wip)
            .unwrap();

        assert_eq!(wip.action_hint, Some(GateAction::Drop));
        assert!(wip.reasons.iter().any(|r| r == "empty_content"));
    }

    #[test]
    fn test_drop_burst_escalates() {
        let mut config = GateConfig::default();
        config.drop_escalation.burst_count_threshold = 3;
        config.drop_escalation.consecutive_threshold = 100;
        let stage = HardBypass::new();

        let mut last_wip = GateWip::default();
        for _ in 0..3 {
            let mut wip = GateWip::default();
            stage
                .apply(&empty_message(), &ctx(&config, None), &mut wip)
                .unwrap();
            last_wip = wip;
        }

        assert_eq!(last_wip.tags.get("drop_burst").map(String::as_str), Some("true"));
        assert!(last_wip
            .emit
            .iter()
            .any(|o| synapse_core::extract_pain_key(o) == "gate:drop_burst"));
    }

    #[test]
    fn test_alert_resets_consecutive_counter() {
        let mut config = GateConfig::default();
        config.drop_escalation.burst_count_threshold = 100;
        config.drop_escalation.consecutive_threshold = 3;
        let stage = HardBypass::new();

        for _ in 0..2 {
            let mut wip = GateWip::default();
            stage
                .apply(&empty_message(), &ctx(&config, None), &mut wip)
                .unwrap();
        }

        // An alert in between clears the run of consecutive drops.
        let alert = synapse_core::make_pain_alert("adapter", "x", Severity::Low, "", None, None, None);
        let mut wip = GateWip::default();
        stage.apply(&alert, &ctx(&config, None), &mut wip).unwrap();

        let mut wip = GateWip::default();
        stage
            .apply(&empty_message(), &ctx(&config, None), &mut wip)
            .unwrap();
        assert!(wip.tags.get("drop_burst").is_none());
    }

    #[test]
    fn test_non_drop_traffic_keeps_monitor_quiet() {
        let config = GateConfig::default();
        let stage = HardBypass::new();

        let obs = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "hello");
        let mut wip = GateWip::default();
        stage.apply(&obs, &ctx(&config, None), &mut wip).unwrap();

        assert!(wip.action_hint.is_none());
        assert!(wip.emit.is_empty());
    }
}
