//! Feature extraction for the scoring stage.

use super::{GateStage, StageError};
use crate::types::{GateContext, GateWip};
use synapse_core::Observation;

pub struct FeatureExtract;

impl GateStage for FeatureExtract {
    fn name(&self) -> &'static str {
        "feature"
    }

    fn apply(
        &self,
        obs: &Observation,
        ctx: &GateContext<'_>,
        wip: &mut GateWip,
    ) -> Result<(), StageError> {
        if let Some(mp) = obs.message_payload() {
            let text = mp.normalized_text();
            wip.features.text_len = text.chars().count();
            wip.features.has_mention = text.contains('@') || !mp.mentions.is_empty();
            wip.features.has_question = text.contains('?');
            wip.features.attachment_count = mp.attachments.len();
            wip.features.mention_count = mp.mentions.len();
        }

        if let Some(alert) = obs.alert_payload() {
            wip.features.alert_severity = Some(alert.severity.as_str().to_string());
        }

        wip.features.recent_obs_len = ctx
            .session_state
            .map(|s| s.recent_obs.len())
            .unwrap_or(0);

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use chrono::Utc;
    use synapse_core::{Actor, SessionState, SYSTEM_SESSION_KEY};

    #[test]
    fn test_message_features() {
        let config = GateConfig::default();
        let mut state = SessionState::new("dm:a");
        let prior = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "x");
        state.record(prior);

        let ctx = GateContext {
            now: Utc::now(),
            config: &config,
            system_session_key: SYSTEM_SESSION_KEY,
            metrics: None,
            session_state: Some(&state),
            system_health: None,
        };

        let obs = Observation::message(
            "text_input",
            Some("dm:a".into()),
            Actor::user("a"),
            "hey @bot can you help?",
        );
        let mut wip = GateWip::default();
        FeatureExtract.apply(&obs, &ctx, &mut wip).unwrap();

        assert_eq!(wip.features.text_len, 22);
        assert!(wip.features.has_mention);
        assert!(wip.features.has_question);
        assert_eq!(wip.features.recent_obs_len, 1);
    }
}
