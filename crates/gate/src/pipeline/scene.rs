//! Scene inference: classify the observation before anything else runs.

use super::{GateStage, StageError};
use crate::config::Scene;
use crate::types::{GateContext, GateWip};
use synapse_core::{ActorType, Observation, ObservationType};

pub struct SceneInference;

impl GateStage for SceneInference {
    fn name(&self) -> &'static str {
        "scene"
    }

    fn apply(
        &self,
        obs: &Observation,
        ctx: &GateContext<'_>,
        wip: &mut GateWip,
    ) -> Result<(), StageError> {
        wip.scene = Some(infer_scene(obs, ctx.system_session_key));
        Ok(())
    }
}

fn infer_scene(obs: &Observation, system_session_key: &str) -> Scene {
    if obs.obs_type == ObservationType::Alert {
        return Scene::Alert;
    }
    if obs.session_key.as_deref() == Some(system_session_key) {
        return Scene::System;
    }
    if obs.obs_type == ObservationType::Message && obs.actor.actor_type == ActorType::User {
        return Scene::Dialogue;
    }
    if obs.source_name.contains("tool") {
        // World-data from a tool source is the result leg of a call.
        return if obs.obs_type == ObservationType::WorldData {
            Scene::ToolResult
        } else {
            Scene::ToolCall
        };
    }
    Scene::Unknown
}
