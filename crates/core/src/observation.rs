//! Observation model - the universal event carried through the runtime.
//!
//! Every adapter, the gate, the reflex controller and the egress path speak
//! exactly one type: [`Observation`]. The payload is a tagged union keyed by
//! [`ObservationType`]; only `metadata` stays free-form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

/// Reserved session key for the system session (pain aggregation point).
pub const SYSTEM_SESSION_KEY: &str = "system";

/// Source-name prefix that marks handler-emitted observations.
pub const AGENT_SOURCE_PREFIX: &str = "agent:";

/// Actor id used by the intelligent handler.
pub const AGENT_ACTOR_ID: &str = "agent";

/// Validation errors raised at publish time.
#[derive(Error, Debug)]
pub enum ObservationError {
    #[error("source_name must not be empty")]
    EmptySourceName,

    #[error("world_data payload requires a schema_id")]
    MissingSchemaId,

    #[error("payload variant {payload} does not match obs_type {obs_type}")]
    PayloadMismatch {
        obs_type: &'static str,
        payload: &'static str,
    },
}

/// What kind of world event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    Message,
    Alert,
    Control,
    Schedule,
    WorldData,
    System,
}

/// Provenance of the input source (observability only, never decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    External,
    Internal,
    System,
}

/// Who caused the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    Agent,
    System,
    Service,
    Unknown,
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Quality markers attached during validation. Hints, not decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    EmptyContent,
    MissingIdentity,
    MissingSession,
    Duplicate,
    Truncated,
}

/// The subject that triggered an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub actor_type: ActorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Actor {
    pub fn user(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            actor_type: ActorType::User,
            display_name: None,
        }
    }

    pub fn system() -> Self {
        Self {
            actor_id: Some("system".to_string()),
            actor_type: ActorType::System,
            display_name: None,
        }
    }

    pub fn agent() -> Self {
        Self {
            actor_id: Some(AGENT_ACTOR_ID.to_string()),
            actor_type: ActorType::Agent,
            display_name: None,
        }
    }

    pub fn unknown() -> Self {
        Self {
            actor_id: None,
            actor_type: ActorType::Unknown,
            display_name: None,
        }
    }

    pub fn actor_id(&self) -> &str {
        self.actor_id.as_deref().unwrap_or("")
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Reference to the raw evidence behind an observation (audit / replay).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_event_uri: Option<String>,
}

/// Attachment reference carried by message payloads. No raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Message-like observation payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl MessagePayload {
    /// Whitespace-trimmed text, or empty string.
    pub fn normalized_text(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.normalized_text().is_empty() && self.attachments.is_empty()
    }
}

/// Alert / anomaly payload. Pain alerts carry `source_kind`, `source_id`
/// and optionally `exception_type` inside `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_type: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Control-plane payload (tuning suggestions and their acknowledgements).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPayload {
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Scheduled / timer payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePayload {
    pub schedule_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Structured world-data payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDataPayload {
    pub schema_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_seconds: Option<u64>,
}

/// Internal system payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemPayload {
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Tagged payload union, keyed by the observation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Message(MessagePayload),
    Alert(AlertPayload),
    Control(ControlPayload),
    Schedule(SchedulePayload),
    WorldData(WorldDataPayload),
    System(SystemPayload),
}

impl Payload {
    fn variant_name(&self) -> &'static str {
        match self {
            Payload::Message(_) => "message",
            Payload::Alert(_) => "alert",
            Payload::Control(_) => "control",
            Payload::Schedule(_) => "schedule",
            Payload::WorldData(_) => "world_data",
            Payload::System(_) => "system",
        }
    }

    fn matches(&self, obs_type: ObservationType) -> bool {
        matches!(
            (self, obs_type),
            (Payload::Message(_), ObservationType::Message)
                | (Payload::Alert(_), ObservationType::Alert)
                | (Payload::Control(_), ObservationType::Control)
                | (Payload::Schedule(_), ObservationType::Schedule)
                | (Payload::WorldData(_), ObservationType::WorldData)
                | (Payload::System(_), ObservationType::System)
        )
    }
}

/// Observation = "I observed something happened in the world".
///
/// The only output of adapters, and the only thing that flows between the
/// bus, the router, the gate and the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub obs_id: String,
    pub obs_type: ObservationType,
    pub source_name: String,
    pub source_kind: SourceKind,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default)]
    pub actor: Actor,
    pub payload: Payload,
    #[serde(default)]
    pub evidence: EvidenceRef,
    #[serde(default)]
    pub quality_flags: HashSet<QualityFlag>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Observation {
    /// Build an observation with a fresh id and current timestamps.
    pub fn new(obs_type: ObservationType, source_name: impl Into<String>, payload: Payload) -> Self {
        let now = Utc::now();
        Self {
            obs_id: uuid::Uuid::new_v4().simple().to_string(),
            obs_type,
            source_name: source_name.into(),
            source_kind: SourceKind::External,
            timestamp: now,
            received_at: now,
            session_key: None,
            actor: Actor::unknown(),
            payload,
            evidence: EvidenceRef::default(),
            quality_flags: HashSet::new(),
            metadata: Map::new(),
        }
    }

    /// Convenience constructor for a user MESSAGE observation.
    pub fn message(
        source_name: impl Into<String>,
        session_key: Option<String>,
        actor: Actor,
        text: impl Into<String>,
    ) -> Self {
        let mut obs = Self::new(
            ObservationType::Message,
            source_name,
            Payload::Message(MessagePayload {
                text: Some(text.into()),
                ..MessagePayload::default()
            }),
        );
        obs.session_key = session_key;
        obs.actor = actor;
        obs
    }

    /// Convenience constructor for an internal CONTROL observation.
    pub fn control(
        source_name: impl Into<String>,
        session_key: impl Into<String>,
        kind: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        let mut obs = Self::new(
            ObservationType::Control,
            source_name,
            Payload::Control(ControlPayload {
                kind: kind.into(),
                data,
            }),
        );
        obs.source_kind = SourceKind::Internal;
        obs.session_key = Some(session_key.into());
        obs.actor = Actor::system();
        obs
    }

    /// Convenience constructor for a SCHEDULE tick observation.
    pub fn schedule(source_name: impl Into<String>, schedule_id: impl Into<String>) -> Self {
        let mut obs = Self::new(
            ObservationType::Schedule,
            source_name,
            Payload::Schedule(SchedulePayload {
                schedule_id: schedule_id.into(),
                data: Map::new(),
            }),
        );
        obs.source_kind = SourceKind::Internal;
        obs.session_key = Some(SYSTEM_SESSION_KEY.to_string());
        obs.actor = Actor::system();
        obs
    }

    /// True when the observation was emitted by the handler itself.
    ///
    /// Canonical self-loop signal: the `"agent:"` source prefix or the
    /// reserved agent actor id.
    pub fn is_agent_sourced(&self) -> bool {
        self.source_name.starts_with(AGENT_SOURCE_PREFIX) || self.actor.actor_id() == AGENT_ACTOR_ID
    }

    pub fn message_payload(&self) -> Option<&MessagePayload> {
        match &self.payload {
            Payload::Message(p) => Some(p),
            _ => None,
        }
    }

    pub fn alert_payload(&self) -> Option<&AlertPayload> {
        match &self.payload {
            Payload::Alert(p) => Some(p),
            _ => None,
        }
    }

    pub fn control_payload(&self) -> Option<&ControlPayload> {
        match &self.payload {
            Payload::Control(p) => Some(p),
            _ => None,
        }
    }

    /// Minimal adapter-level validation.
    ///
    /// Structural problems are errors; content problems only set quality
    /// flags so the gate can decide.
    pub fn validate(&mut self) -> Result<(), ObservationError> {
        if self.source_name.is_empty() {
            return Err(ObservationError::EmptySourceName);
        }
        if !self.payload.matches(self.obs_type) {
            return Err(ObservationError::PayloadMismatch {
                obs_type: obs_type_name(self.obs_type),
                payload: self.payload.variant_name(),
            });
        }

        match &self.payload {
            Payload::Message(mp) => {
                if mp.is_empty() {
                    self.quality_flags.insert(QualityFlag::EmptyContent);
                }
                if self.session_key.is_none() {
                    self.quality_flags.insert(QualityFlag::MissingSession);
                }
                if self.actor.actor_id.is_none() {
                    self.quality_flags.insert(QualityFlag::MissingIdentity);
                }
            }
            Payload::WorldData(wp) => {
                if wp.schema_id.is_empty() {
                    return Err(ObservationError::MissingSchemaId);
                }
            }
            _ => {}
        }

        Ok(())
    }
}

fn obs_type_name(t: ObservationType) -> &'static str {
    match t {
        ObservationType::Message => "message",
        ObservationType::Alert => "alert",
        ObservationType::Control => "control",
        ObservationType::Schedule => "schedule",
        ObservationType::WorldData => "world_data",
        ObservationType::System => "system",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructor() {
        let obs = Observation::message("text_input", Some("dm:alice".into()), Actor::user("alice"), "hi");
        assert_eq!(obs.obs_type, ObservationType::Message);
        assert_eq!(obs.session_key.as_deref(), Some("dm:alice"));
        assert_eq!(obs.actor.actor_id(), "alice");
        assert_eq!(obs.message_payload().unwrap().normalized_text(), "hi");
    }

    #[test]
    fn test_obs_ids_are_unique() {
        let a = Observation::message("t", None, Actor::user("u"), "x");
        let b = Observation::message("t", None, Actor::user("u"), "x");
        assert_ne!(a.obs_id, b.obs_id);
    }

    #[test]
    fn test_validate_rejects_empty_source_name() {
        let mut obs = Observation::message("", None, Actor::user("u"), "x");
        assert!(matches!(
            obs.validate(),
            Err(ObservationError::EmptySourceName)
        ));
    }

    #[test]
    fn test_validate_flags_empty_message() {
        let mut obs = Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), "   ");
        obs.validate().unwrap();
        assert!(obs.quality_flags.contains(&QualityFlag::EmptyContent));
    }

    #[test]
    fn test_validate_flags_missing_session_and_identity() {
        let mut obs = Observation::message("text_input", None, Actor::unknown(), "hello");
        obs.validate().unwrap();
        assert!(obs.quality_flags.contains(&QualityFlag::MissingSession));
        assert!(obs.quality_flags.contains(&QualityFlag::MissingIdentity));
        assert!(!obs.quality_flags.contains(&QualityFlag::EmptyContent));
    }

    #[test]
    fn test_validate_rejects_payload_mismatch() {
        let mut obs = Observation::message("text_input", None, Actor::user("a"), "hi");
        obs.obs_type = ObservationType::Alert;
        assert!(matches!(
            obs.validate(),
            Err(ObservationError::PayloadMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_world_data_without_schema() {
        let mut obs = Observation::new(
            ObservationType::WorldData,
            "sensor",
            Payload::WorldData(WorldDataPayload {
                schema_id: String::new(),
                data: Map::new(),
                validity_seconds: None,
            }),
        );
        assert!(matches!(
            obs.validate(),
            Err(ObservationError::MissingSchemaId)
        ));
    }

    #[test]
    fn test_agent_sourced_detection() {
        let mut obs = Observation::message("agent:echo", Some("dm:a".into()), Actor::agent(), "reply");
        assert!(obs.is_agent_sourced());

        obs.source_name = "text_input".into();
        assert!(obs.is_agent_sourced(), "agent actor id still marks provenance");

        obs.actor = Actor::user("alice");
        assert!(!obs.is_agent_sourced());
    }

    #[test]
    fn test_payload_serialization_round_trip() {
        let obs = Observation::control("system_reflex", SYSTEM_SESSION_KEY, "tuning_applied", Map::new());
        let json = serde_json::to_string(&obs).unwrap();
        let back: Observation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.obs_type, ObservationType::Control);
        assert_eq!(back.control_payload().unwrap().kind, "tuning_applied");
    }

    #[test]
    fn test_payload_json_tag() {
        let obs = Observation::message("t", None, Actor::user("a"), "hi");
        let value = serde_json::to_value(&obs.payload).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["text"], "hi");
    }
}
