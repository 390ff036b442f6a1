//! Synapse runtime core.
//!
//! The concurrent dispatch engine: input bus, session router, per-session
//! serial workers, pain aggregation, the system reflex controller and the
//! asynchronous egress path, orchestrated by [`Core`].

pub mod bus;
pub mod core;
pub mod egress;
pub mod interfaces;
pub mod pain;
pub mod reflex;
pub mod router;

pub use bus::{BusReceiver, InputBus, PublishError, DEFAULT_BUS_CAPACITY};
pub use core::{Core, CoreBuilder, CoreConfig};
pub use egress::{should_egress, EgressHub};
pub use interfaces::{
    Agent, AgentOutcome, AgentRequest, MemoryService, OutputAdapter, RuntimeError, TurnStatus,
};
pub use pain::{PainAggregator, PainEffects, PainSnapshot};
pub use reflex::{
    ReflexConfig, ReflexController, CONTROL_SYSTEM_MODE_CHANGED, CONTROL_TUNING_APPLIED,
    CONTROL_TUNING_REVERTED, CONTROL_TUNING_SUGGESTION, SUGGESTION_TTL_MAX_SECONDS,
};
pub use router::{SessionRouter, DEFAULT_INBOX_CAPACITY, UNKNOWN_SESSION_KEY};
