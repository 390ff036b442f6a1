//! Nociception vocabulary: standardized error-as-event surfacing.
//!
//! Any component that fails turns the failure into a pain ALERT via
//! [`make_pain_alert`] and publishes it on the bus. The system session
//! aggregates those alerts and drives protective reflexes (adapter
//! cooldowns, fanout suppression).

use crate::observation::{
    Actor, AlertPayload, Observation, ObservationType, Payload, Severity, SourceKind,
    SYSTEM_SESSION_KEY,
};
use serde_json::{Map, Value};

/// Sliding window for pain aggregation per source.
pub const PAIN_WINDOW_SECONDS: u64 = 60;

/// Pain alerts from one source within the window before protection kicks in.
pub const PAIN_BURST_THRESHOLD: usize = 5;

/// Cooldown applied to a misbehaving adapter.
pub const ADAPTER_COOLDOWN_SECONDS: u64 = 300;

/// Window for the drop-overload delta check.
pub const DROP_WINDOW_SECONDS: u64 = 30;

/// Bus drops per window that count as overload.
pub const DROP_BURST_THRESHOLD: u64 = 50;

/// How long tick fanout stays suppressed after an overload signal.
pub const FANOUT_SUPPRESS_SECONDS: u64 = 60;

/// Build a standardized pain ALERT observation.
///
/// `source_kind` is the failing component class ("adapter", "gate", "core",
/// "system", ...), `source_id` the concrete instance. The alert always lands
/// on the system session unless an explicit `session_key` is given.
#[allow(clippy::too_many_arguments)]
pub fn make_pain_alert(
    source_kind: &str,
    source_id: &str,
    severity: Severity,
    message: impl Into<String>,
    exception_type: Option<&str>,
    session_key: Option<&str>,
    data_extra: Option<Map<String, Value>>,
) -> Observation {
    let mut data = Map::new();
    data.insert("source_kind".into(), Value::String(source_kind.into()));
    data.insert("source_id".into(), Value::String(source_id.into()));
    if let Some(exc) = exception_type {
        data.insert("exception_type".into(), Value::String(exc.into()));
    }
    if let Some(extra) = data_extra {
        data.extend(extra);
    }

    let mut obs = Observation::new(
        ObservationType::Alert,
        format!("{}:{}", source_kind, source_id),
        Payload::Alert(AlertPayload {
            alert_type: "pain".into(),
            severity,
            message: Some(message.into()),
            data,
        }),
    );
    obs.source_kind = SourceKind::Internal;
    obs.session_key = Some(session_key.unwrap_or(SYSTEM_SESSION_KEY).to_string());
    obs.actor = Actor::system();
    obs
}

/// Aggregation key for a pain alert: `"source_kind:source_id"`.
pub fn extract_pain_key(obs: &Observation) -> String {
    let Some(alert) = obs.alert_payload() else {
        return "unknown:unknown".into();
    };
    let kind = alert
        .data
        .get("source_kind")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let id = alert
        .data
        .get("source_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    format!("{}:{}", kind, id)
}

/// Severity of a pain alert, or `None` for non-alert observations.
pub fn extract_pain_severity(obs: &Observation) -> Option<Severity> {
    obs.alert_payload().map(|a| a.severity)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_pain_alert_shape() {
        let obs = make_pain_alert(
            "adapter",
            "text_input",
            Severity::High,
            "read failed",
            Some("IoError"),
            None,
            None,
        );
        assert_eq!(obs.obs_type, ObservationType::Alert);
        assert_eq!(obs.session_key.as_deref(), Some(SYSTEM_SESSION_KEY));
        assert_eq!(obs.source_name, "adapter:text_input");
        assert_eq!(obs.source_kind, SourceKind::Internal);

        let alert = obs.alert_payload().unwrap();
        assert_eq!(alert.alert_type, "pain");
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.data["source_kind"], "adapter");
        assert_eq!(alert.data["source_id"], "text_input");
        assert_eq!(alert.data["exception_type"], "IoError");
    }

    #[test]
    fn test_extract_pain_key() {
        let obs = make_pain_alert("adapter", "timer", Severity::Low, "", None, None, None);
        assert_eq!(extract_pain_key(&obs), "adapter:timer");
    }

    #[test]
    fn test_extract_pain_key_fallback() {
        let obs = Observation::message("t", None, Actor::user("a"), "hi");
        assert_eq!(extract_pain_key(&obs), "unknown:unknown");
    }

    #[test]
    fn test_data_extra_merged() {
        let mut extra = Map::new();
        extra.insert("drops_delta".into(), Value::from(63));
        let obs = make_pain_alert(
            "system",
            "drop_overload",
            Severity::High,
            "overload",
            None,
            None,
            Some(extra),
        );
        assert_eq!(obs.alert_payload().unwrap().data["drops_delta"], 63);
    }
}
