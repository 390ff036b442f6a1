//! Policy mapping: overrides, the user dialogue safety valve and the
//! threshold policy, resolved in strict priority order. Always attaches a
//! [`GateHint`] so finalize never ships a decision without a budget.

use super::{GateStage, StageError};
use crate::config::{GateAction, ModelTier, ResponsePolicy, Scene};
use crate::types::{GateContext, GateHint, GateWip};
use serde_json::Value;
use synapse_core::{ActorType, Observation, ObservationType};

pub struct PolicyMapper;

impl GateStage for PolicyMapper {
    fn name(&self) -> &'static str {
        "policy"
    }

    fn apply(
        &self,
        obs: &Observation,
        ctx: &GateContext<'_>,
        wip: &mut GateWip,
    ) -> Result<(), StageError> {
        let scene = wip.scene();
        let policy = ctx.config.scene_policy(scene);
        let overrides = &ctx.config.overrides;

        let session_key = obs.session_key.as_deref().unwrap_or("");
        let actor_id = obs.actor.actor_id();
        let agent_sourced = obs.is_agent_sourced();
        let is_user_message = obs.obs_type == ObservationType::Message
            && obs.actor.actor_type == ActorType::User;

        // Strict priority, highest first.
        let action = 'resolve: {
            if overrides.emergency_mode {
                wip.model_tier = Some(ModelTier::Low);
                wip.push_reason("override=emergency");
                break 'resolve GateAction::Sink;
            }

            if overrides.drop_sessions.iter().any(|s| s == session_key) {
                wip.push_reason("override=drop_session");
                break 'resolve GateAction::Drop;
            }

            if overrides.drop_actors.iter().any(|a| a == actor_id) {
                wip.push_reason("override=drop_actor");
                break 'resolve GateAction::Drop;
            }

            // Hard-bypass drops and dedup sinks are final.
            if wip.action_hint == Some(GateAction::Drop) {
                break 'resolve GateAction::Drop;
            }
            if wip.tags.contains_key("dedup") {
                break 'resolve GateAction::Sink;
            }

            if is_user_message && !agent_sourced {
                wip.push_reason("user_dialogue_safe_valve");
                break 'resolve GateAction::Deliver;
            }

            if !agent_sourced && overrides.deliver_sessions.iter().any(|s| s == session_key) {
                wip.push_reason("override=deliver_session");
                break 'resolve GateAction::Deliver;
            }

            if !agent_sourced && overrides.deliver_actors.iter().any(|a| a == actor_id) {
                wip.push_reason("override=deliver_actor");
                break 'resolve GateAction::Deliver;
            }

            if obs.obs_type == ObservationType::Message {
                break 'resolve GateAction::Deliver;
            }
            if wip.score >= policy.deliver_threshold {
                break 'resolve GateAction::Deliver;
            }
            if wip.score >= policy.sink_threshold {
                break 'resolve GateAction::Sink;
            }
            policy.default_action
        };

        wip.action_hint = Some(action);

        let mut model_tier = wip
            .model_tier
            .or(policy.default_model_tier)
            .unwrap_or(ModelTier::Low);
        if action == GateAction::Deliver && overrides.force_low_model {
            model_tier = ModelTier::Low;
            wip.push_reason("override=force_low_model");
        }

        let response_policy = wip
            .response_policy
            .or(policy.default_response_policy)
            .unwrap_or(ResponsePolicy::RespondNow);

        let budget = ctx.config.select_budget(wip.score, scene);
        let mut hint = GateHint {
            model_tier,
            response_policy,
            budget,
            reason_tags: Vec::new(),
            debug: Default::default(),
        };
        hint.reason_tags.push(score_band_tag(wip.score, ctx).into());
        hint.debug
            .insert("scene".into(), Value::String(scene.as_str().into()));

        wip.model_tier = Some(model_tier);
        wip.response_policy = Some(response_policy);
        wip.hint = Some(hint);

        Ok(())
    }
}

fn score_band_tag(score: f64, ctx: &GateContext<'_>) -> &'static str {
    let thresholds = &ctx.config.budget_thresholds;
    if score >= thresholds.high_score {
        "score_high"
    } else if score >= thresholds.medium_score {
        "score_medium"
    } else {
        "score_low"
    }
}
