//! Per-scene weighted scoring, clamped to [0, 1].

use super::{GateStage, StageError};
use crate::config::Scene;
use crate::types::{GateContext, GateWip};
use synapse_core::Observation;

/// Fixed baselines for scenes whose priority is structural, not textual.
const ALERT_BASE_SCORE: f64 = 0.6;
const TOOL_CALL_BASE_SCORE: f64 = 0.7;
const TOOL_RESULT_BASE_SCORE: f64 = 0.5;

/// Length bonus divisor and cap.
const LENGTH_BONUS_DIVISOR: f64 = 200.0;
const LENGTH_BONUS_CAP: f64 = 0.2;

pub struct Scoring;

impl GateStage for Scoring {
    fn name(&self) -> &'static str {
        "score"
    }

    fn apply(
        &self,
        obs: &Observation,
        ctx: &GateContext<'_>,
        wip: &mut GateWip,
    ) -> Result<(), StageError> {
        let scene = wip.scene();
        let mut score: f64 = 0.0;

        match scene {
            Scene::Dialogue => {
                let rules = ctx.config.scene_rules(Scene::Dialogue);
                score += rules.weight("base");
                if wip.features.has_mention {
                    score += rules.weight("mention");
                }
                if wip.features.has_question {
                    score += rules.weight("question_mark");
                }
                if wip.features.text_len >= rules.long_text_len {
                    score += rules.weight("long_text");
                }

                if let Some(mp) = obs.message_payload() {
                    let text = mp.normalized_text().to_lowercase();
                    for (keyword, weight) in &rules.keywords {
                        if text.contains(keyword.as_str()) {
                            score += weight;
                        }
                    }
                }
            }
            Scene::Alert => score += ALERT_BASE_SCORE,
            Scene::ToolCall => score += TOOL_CALL_BASE_SCORE,
            Scene::ToolResult => score += TOOL_RESULT_BASE_SCORE,
            Scene::System => score += ctx.config.scene_rules(Scene::System).weight("base"),
            Scene::Unknown => {}
        }

        if wip.features.text_len > 0 {
            score += (wip.features.text_len as f64 / LENGTH_BONUS_DIVISOR).min(LENGTH_BONUS_CAP);
        }

        wip.score = score.clamp(0.0, 1.0);
        Ok(())
    }
}
