//! Synapse core types: the observation model, per-session runtime state,
//! the nociception vocabulary and the core metric counters.

pub mod metrics;
pub mod nociception;
pub mod observation;
pub mod session;

pub use metrics::{CoreMetrics, CoreMetricsSnapshot};
pub use nociception::{
    extract_pain_key, extract_pain_severity, make_pain_alert, ADAPTER_COOLDOWN_SECONDS,
    DROP_BURST_THRESHOLD, DROP_WINDOW_SECONDS, FANOUT_SUPPRESS_SECONDS, PAIN_BURST_THRESHOLD,
    PAIN_WINDOW_SECONDS,
};
pub use observation::{
    Actor, ActorType, AlertPayload, AttachmentRef, ControlPayload, EvidenceRef, MessagePayload,
    Observation, ObservationError, ObservationType, Payload, QualityFlag, SchedulePayload,
    Severity, SourceKind, SystemPayload, WorldDataPayload, AGENT_ACTOR_ID, AGENT_SOURCE_PREFIX,
    SYSTEM_SESSION_KEY,
};
pub use session::{SessionState, RECENT_OBS_CAP};
