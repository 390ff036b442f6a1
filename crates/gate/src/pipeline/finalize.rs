//! Finalize: converge the work-in-progress record into a `GateDecision`.

use super::dedup::compute_fingerprint;
use super::{GateStage, StageError};
use crate::config::{GateAction, Scene};
use crate::types::{GateContext, GateDecision, GateWip};
use synapse_core::Observation;

pub struct Finalize;

impl GateStage for Finalize {
    fn name(&self) -> &'static str {
        "finalize"
    }

    fn apply(
        &self,
        obs: &Observation,
        ctx: &GateContext<'_>,
        wip: &mut GateWip,
    ) -> Result<(), StageError> {
        let scene = wip.scene();
        let action = wip.action_hint.unwrap_or(GateAction::Sink);
        let policy = ctx.config.scene_policy(scene);

        let fingerprint = wip
            .fingerprint
            .clone()
            .unwrap_or_else(|| compute_fingerprint(obs, scene));

        let mut reasons = wip.reasons.clone();
        reasons.truncate(policy.max_reasons);

        let decision = GateDecision {
            action,
            scene,
            session_key: obs.session_key.clone().unwrap_or_default(),
            target_worker: (scene == Scene::System)
                .then(|| ctx.system_session_key.to_string()),
            score: wip.score,
            reasons,
            tags: wip.tags.clone(),
            fingerprint: Some(fingerprint),
            hint: wip.hint.clone().unwrap_or_default(),
        };

        // DELIVER keeps the obs out of the pools, except tool results which
        // are always retained for inspection.
        if wip.ingest.is_empty() {
            let retain = matches!(action, GateAction::Drop | GateAction::Sink)
                || scene == Scene::ToolResult;
            if retain {
                wip.ingest.push(obs.clone());
            }
        }

        if let Some(metrics) = ctx.metrics {
            metrics.record_decision(scene, action);
        }

        wip.decision = Some(decision);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use chrono::Utc;
    use synapse_core::{Actor, SYSTEM_SESSION_KEY};

    fn ctx<'a>(config: &'a GateConfig, metrics: Option<&'a crate::metrics::GateMetrics>) -> GateContext<'a> {
        GateContext {
            now: Utc::now(),
            config,
            system_session_key: SYSTEM_SESSION_KEY,
            metrics,
            session_state: None,
            system_health: None,
        }
    }

    #[test]
    fn test_indeterminate_action_defaults_to_sink() {
        let config = GateConfig::default();
        let obs = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "hi");
        let mut wip = GateWip::default();
        wip.scene = Some(Scene::Dialogue);

        Finalize.apply(&obs, &ctx(&config, None), &mut wip).unwrap();

        let decision = wip.decision.unwrap();
        assert_eq!(decision.action, GateAction::Sink);
        assert!(decision.fingerprint.is_some());
        assert_eq!(decision.session_key, "dm:a");
    }

    #[test]
    fn test_reasons_truncated_to_max() {
        let mut config = GateConfig::default();
        config.scene_policies.insert(
            Scene::Dialogue,
            crate::config::ScenePolicy {
                max_reasons: 2,
                ..Default::default()
            },
        );
        let obs = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "hi");
        let mut wip = GateWip::default();
        wip.scene = Some(Scene::Dialogue);
        for i in 0..5 {
            wip.push_reason(format!("r{}", i));
        }

        Finalize.apply(&obs, &ctx(&config, None), &mut wip).unwrap();
        assert_eq!(wip.decision.unwrap().reasons.len(), 2);
    }

    #[test]
    fn test_drop_and_sink_are_ingested_deliver_is_not() {
        let config = GateConfig::default();
        let obs = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "hi");

        for (action, expected) in [
            (GateAction::Drop, 1),
            (GateAction::Sink, 1),
            (GateAction::Deliver, 0),
        ] {
            let mut wip = GateWip::default();
            wip.scene = Some(Scene::Dialogue);
            wip.action_hint = Some(action);
            Finalize.apply(&obs, &ctx(&config, None), &mut wip).unwrap();
            assert_eq!(wip.ingest.len(), expected, "action={:?}", action);
        }
    }

    #[test]
    fn test_delivered_tool_result_still_ingested() {
        let config = GateConfig::default();
        let obs = Observation::message("tool:search", Some("dm:a".into()), Actor::unknown(), "result");
        let mut wip = GateWip::default();
        wip.scene = Some(Scene::ToolResult);
        wip.action_hint = Some(GateAction::Deliver);

        Finalize.apply(&obs, &ctx(&config, None), &mut wip).unwrap();
        assert_eq!(wip.ingest.len(), 1);
    }

    #[test]
    fn test_metrics_updated() {
        let config = GateConfig::default();
        let metrics = crate::metrics::GateMetrics::new();
        let obs = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "hi");
        let mut wip = GateWip::default();
        wip.scene = Some(Scene::Dialogue);
        wip.action_hint = Some(GateAction::Deliver);

        Finalize
            .apply(&obs, &ctx(&config, Some(&metrics)), &mut wip)
            .unwrap();

        let snap = metrics.snapshot();
        assert_eq!(snap.delivered_total, 1);
        assert_eq!(snap.by_scene["dialogue"], 1);
    }

    #[test]
    fn test_system_scene_targets_system_worker() {
        let config = GateConfig::default();
        let obs = Observation::schedule("timer", "tick");
        let mut wip = GateWip::default();
        wip.scene = Some(Scene::System);

        Finalize.apply(&obs, &ctx(&config, None), &mut wip).unwrap();
        assert_eq!(
            wip.decision.unwrap().target_worker.as_deref(),
            Some(SYSTEM_SESSION_KEY)
        );
    }
}
