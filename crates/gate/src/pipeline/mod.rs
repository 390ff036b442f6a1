//! The seven-stage gate pipeline.
//!
//! Stages run in a fixed order and each mutates the shared [`GateWip`]
//! record. A failing stage never aborts the pipeline: its error is recorded
//! as a `<stage>_error:<kind>` reason and processing continues, so a
//! decision is always produced.

mod dedup;
mod feature;
mod finalize;
mod hard_bypass;
mod policy;
mod scene;
mod scoring;

pub use dedup::Deduplicator;
pub use feature::FeatureExtract;
pub use finalize::Finalize;
pub use hard_bypass::HardBypass;
pub use policy::PolicyMapper;
pub use scene::SceneInference;
pub use scoring::Scoring;

use crate::types::{GateContext, GateWip};
use synapse_core::Observation;

/// Error raised inside one pipeline stage; carries only a short kind tag.
#[derive(Debug)]
pub struct StageError {
    pub kind: String,
}

impl StageError {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.kind)
    }
}

/// One stage of the gate pipeline.
pub trait GateStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(
        &self,
        obs: &Observation,
        ctx: &GateContext<'_>,
        wip: &mut GateWip,
    ) -> Result<(), StageError>;
}

/// Fixed stage order: scene inference, hard bypass, feature extraction,
/// scoring, dedup, policy mapping, finalize.
pub struct DefaultGatePipeline {
    stages: Vec<Box<dyn GateStage>>,
}

impl DefaultGatePipeline {
    pub fn new() -> Self {
        Self {
            stages: vec![
                Box::new(SceneInference),
                Box::new(HardBypass::new()),
                Box::new(FeatureExtract),
                Box::new(Scoring),
                Box::new(Deduplicator::new()),
                Box::new(PolicyMapper),
                Box::new(Finalize),
            ],
        }
    }

    pub fn run(&self, obs: &Observation, ctx: &GateContext<'_>, wip: &mut GateWip) {
        for stage in &self.stages {
            if let Err(e) = stage.apply(obs, ctx, wip) {
                wip.push_reason(format!("{}_error:{}", stage.name(), e.kind));
            }
        }
    }
}

impl Default for DefaultGatePipeline {
    fn default() -> Self {
        Self::new()
    }
}
