//! Gate entry point: run the pipeline, then route ingested observations
//! into the inspection pools.

use crate::config::{GateAction, Scene};
use crate::metrics::GateMetrics;
use crate::pipeline::DefaultGatePipeline;
use crate::pools::{GatePool, POOL_CAPACITY};
use crate::types::{GateContext, GateDecision, GateOutcome, GateWip};
use std::sync::Arc;
use synapse_core::Observation;

/// The deterministic pre-processing gate.
///
/// `handle` computes a [`GateOutcome`] for one observation; the caller then
/// publishes `outcome.emit` on the bus and feeds `outcome.ingest` back into
/// [`Gate::ingest`]. A decision is always produced - stage failures degrade
/// to reason tags, never to a missing outcome.
pub struct Gate {
    pipeline: DefaultGatePipeline,
    metrics: Arc<GateMetrics>,
    sink_pool: GatePool,
    drop_pool: GatePool,
    tool_pool: GatePool,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            pipeline: DefaultGatePipeline::new(),
            metrics: GateMetrics::new(),
            sink_pool: GatePool::new("sink", POOL_CAPACITY),
            drop_pool: GatePool::new("drop", POOL_CAPACITY),
            tool_pool: GatePool::new("tool", POOL_CAPACITY),
        }
    }

    pub fn metrics(&self) -> &Arc<GateMetrics> {
        &self.metrics
    }

    pub fn sink_pool(&self) -> &GatePool {
        &self.sink_pool
    }

    pub fn drop_pool(&self) -> &GatePool {
        &self.drop_pool
    }

    pub fn tool_pool(&self) -> &GatePool {
        &self.tool_pool
    }

    pub fn handle(&self, obs: &Observation, ctx: &GateContext<'_>) -> GateOutcome {
        let mut wip = GateWip::default();
        self.pipeline.run(obs, ctx, &mut wip);

        let decision = wip.decision.take().unwrap_or_else(|| GateDecision {
            action: wip.action_hint.unwrap_or(GateAction::Sink),
            scene: wip.scene(),
            session_key: obs.session_key.clone().unwrap_or_default(),
            target_worker: None,
            score: wip.score,
            reasons: wip.reasons.clone(),
            tags: wip.tags.clone(),
            fingerprint: wip.fingerprint.clone(),
            hint: wip.hint.take().unwrap_or_default(),
        });

        GateOutcome {
            decision,
            emit: wip.emit,
            ingest: wip.ingest,
        }
    }

    /// Route one ingested observation into the matching pool.
    pub fn ingest(&self, obs: Observation, decision: &GateDecision) {
        if decision.action == GateAction::Drop {
            self.drop_pool.ingest(obs);
        } else if matches!(decision.scene, Scene::ToolCall | Scene::ToolResult) {
            self.tool_pool.ingest(obs);
        } else {
            self.sink_pool.ingest(obs);
        }
    }

    /// Context builder that wires in the gate's own metrics.
    pub fn context<'a>(
        &'a self,
        now: chrono::DateTime<chrono::Utc>,
        config: &'a crate::config::GateConfig,
        system_session_key: &'a str,
        session_state: Option<&'a synapse_core::SessionState>,
        system_health: Option<crate::types::SystemHealth>,
    ) -> GateContext<'a> {
        GateContext {
            now,
            config,
            system_session_key,
            metrics: Some(&self.metrics),
            session_state,
            system_health,
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
