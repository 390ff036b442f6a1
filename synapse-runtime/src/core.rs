//! The core worker orchestrator.
//!
//! Owns the bus, the router and every background task: the router loop,
//! the watcher that (re)creates per-session workers, the idle-session GC,
//! and the egress dispatcher. Per-session workers are the only writers of
//! their session state and process strictly FIFO; a slow agent call blocks
//! its own session and nothing else.

use crate::bus::{BusReceiver, InputBus, DEFAULT_BUS_CAPACITY};
use crate::egress::{should_egress, EgressHub};
use crate::interfaces::{Agent, AgentRequest, MemoryService, TurnStatus};
use crate::pain::{PainAggregator, PainSnapshot};
use crate::reflex::{ReflexConfig, ReflexController};
use crate::router::{SessionRouter, DEFAULT_INBOX_CAPACITY};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use synapse_core::{
    extract_pain_key, extract_pain_severity, make_pain_alert, Actor, CoreMetrics, Observation,
    ObservationType, Payload, SessionState, Severity, SourceKind, SystemPayload,
    SYSTEM_SESSION_KEY,
};
use synapse_gate::{Gate, GateConfigProvider, GateDecision, GateAction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Tunables for the dispatch core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub bus_capacity: usize,
    pub inbox_capacity: usize,
    pub system_session_key: String,
    pub watcher_interval_ms: u64,
    pub enable_session_gc: bool,
    pub idle_ttl_seconds: f64,
    pub gc_sweep_interval_seconds: f64,
    pub min_sessions_to_gc: usize,
    pub gc_cancel_wait_ms: u64,
    pub enable_system_fanout: bool,
    pub egress_capacity: usize,
    pub egress_timeout_ms: u64,
    pub shutdown_deadline_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_BUS_CAPACITY,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            system_session_key: SYSTEM_SESSION_KEY.to_string(),
            watcher_interval_ms: 50,
            enable_session_gc: true,
            idle_ttl_seconds: 600.0,
            gc_sweep_interval_seconds: 30.0,
            min_sessions_to_gc: 1,
            gc_cancel_wait_ms: 1000,
            enable_system_fanout: false,
            egress_capacity: 256,
            egress_timeout_ms: 1000,
            shutdown_deadline_ms: 1500,
        }
    }
}

/// Builder for [`Core`]; the gate config provider is the only required
/// collaborator.
pub struct CoreBuilder {
    config: CoreConfig,
    provider: Arc<GateConfigProvider>,
    reflex_config: ReflexConfig,
    agent: Option<Arc<dyn Agent>>,
    memory: Option<Arc<dyn MemoryService>>,
    egress_hub: Arc<EgressHub>,
}

impl CoreBuilder {
    pub fn new(provider: Arc<GateConfigProvider>) -> Self {
        Self {
            config: CoreConfig::default(),
            provider,
            reflex_config: ReflexConfig::default(),
            agent: None,
            memory: None,
            egress_hub: Arc::new(EgressHub::new()),
        }
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reflex_config(mut self, reflex: ReflexConfig) -> Self {
        self.reflex_config = reflex;
        self
    }

    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn egress_hub(mut self, hub: Arc<EgressHub>) -> Self {
        self.egress_hub = hub;
        self
    }

    pub fn build(self) -> Core {
        let (bus, bus_rx) = InputBus::new(self.config.bus_capacity);
        let (egress_tx, egress_rx) = mpsc::channel(self.config.egress_capacity);
        let router = SessionRouter::new(
            self.config.inbox_capacity,
            self.config.system_session_key.clone(),
        );
        let reflex = ReflexController::new(
            self.provider.clone(),
            self.reflex_config,
            self.config.system_session_key.clone(),
        );

        Core {
            inner: Arc::new(CoreInner {
                config: self.config,
                bus,
                bus_rx: Mutex::new(Some(bus_rx)),
                router,
                provider: self.provider,
                gate: Gate::new(),
                reflex,
                egress_hub: self.egress_hub,
                egress_tx,
                egress_rx: Mutex::new(Some(egress_rx)),
                agent: self.agent,
                memory: self.memory,
                metrics: CoreMetrics::new(),
                pain: Mutex::new(PainAggregator::new()),
                states: Mutex::new(HashMap::new()),
                workers: Mutex::new(HashMap::new()),
                background: Mutex::new(Vec::new()),
                closing: AtomicBool::new(false),
            }),
        }
    }
}

struct CoreInner {
    config: CoreConfig,
    bus: InputBus,
    bus_rx: Mutex<Option<BusReceiver>>,
    router: SessionRouter,
    provider: Arc<GateConfigProvider>,
    gate: Gate,
    reflex: ReflexController,
    egress_hub: Arc<EgressHub>,
    egress_tx: mpsc::Sender<Observation>,
    egress_rx: Mutex<Option<mpsc::Receiver<Observation>>>,
    agent: Option<Arc<dyn Agent>>,
    memory: Option<Arc<dyn MemoryService>>,
    metrics: Arc<CoreMetrics>,
    pain: Mutex<PainAggregator>,
    states: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    closing: AtomicBool,
}

pub struct Core {
    inner: Arc<CoreInner>,
}

impl Core {
    pub fn builder(provider: Arc<GateConfigProvider>) -> CoreBuilder {
        CoreBuilder::new(provider)
    }

    /// Producer handle onto the input bus.
    pub fn bus(&self) -> InputBus {
        self.inner.bus.clone()
    }

    pub fn metrics(&self) -> Arc<CoreMetrics> {
        self.inner.metrics.clone()
    }

    pub fn gate(&self) -> &Gate {
        &self.inner.gate
    }

    pub fn provider(&self) -> Arc<GateConfigProvider> {
        self.inner.provider.clone()
    }

    pub fn egress_hub(&self) -> Arc<EgressHub> {
        self.inner.egress_hub.clone()
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.inner.router.list_active_sessions()
    }

    pub fn has_worker(&self, session_key: &str) -> bool {
        self.inner
            .workers
            .lock()
            .get(session_key)
            .is_some_and(|h| !h.is_finished())
    }

    /// Cloned snapshot of one session's state.
    pub fn session_state(&self, session_key: &str) -> Option<SessionState> {
        self.inner
            .states
            .lock()
            .get(session_key)
            .map(|s| s.lock().clone())
    }

    pub fn pain_snapshot(&self) -> PainSnapshot {
        self.inner.pain.lock().snapshot()
    }

    /// Launch the router, watcher, GC and egress loops.
    pub fn start(&self) {
        let mut background = self.inner.background.lock();
        if !background.is_empty() {
            warn!("core already started");
            return;
        }

        info!("core starting");
        background.push(tokio::spawn(router_loop(self.inner.clone())));
        background.push(tokio::spawn(watcher_loop(self.inner.clone())));
        if self.inner.config.enable_session_gc {
            background.push(tokio::spawn(gc_loop(self.inner.clone())));
        }
        background.push(tokio::spawn(egress_loop(self.inner.clone())));
        info!("core startup complete");
    }

    /// Close the bus, cancel every task within the shutdown deadline, then
    /// close the memory service.
    pub async fn shutdown(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("core shutting down");

        self.inner.bus.close();

        let deadline = Duration::from_millis(self.inner.config.shutdown_deadline_ms);
        let started = Instant::now();

        let mut handles: Vec<JoinHandle<()>> = self.inner.background.lock().drain(..).collect();
        handles.extend(self.inner.workers.lock().drain().map(|(_, h)| h));

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let remaining = deadline
                .saturating_sub(started.elapsed())
                .max(Duration::from_millis(10));
            let _ = timeout(remaining, handle).await;
        }

        if let Some(memory) = &self.inner.memory {
            let remaining = deadline
                .saturating_sub(started.elapsed())
                .max(Duration::from_millis(10));
            if let Ok(Err(e)) = timeout(remaining, memory.close()).await {
                warn!(error = %e, "memory close failed during shutdown");
            }
        }

        info!("core shutdown complete");
    }
}

fn get_state(inner: &CoreInner, session_key: &str) -> Arc<Mutex<SessionState>> {
    let mut states = inner.states.lock();
    states
        .entry(session_key.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(session_key))))
        .clone()
}

fn publish(inner: &CoreInner, obs: Observation) {
    if let Err(e) = inner.bus.publish_nowait(obs) {
        debug!(error = %e, "re-publish failed");
    }
}

// ---------------------------------------------------------------------------
// Background loops
// ---------------------------------------------------------------------------

async fn router_loop(inner: Arc<CoreInner>) {
    let Some(mut rx) = inner.bus_rx.lock().take() else {
        error!("router loop started twice");
        return;
    };
    info!("router loop started");

    while let Some(obs) = rx.recv().await {
        if inner.closing.load(Ordering::Acquire) {
            break;
        }
        inner.router.route(obs);
    }
    info!("router loop ended");
}

async fn watcher_loop(inner: Arc<CoreInner>) {
    let interval = Duration::from_millis(inner.config.watcher_interval_ms);
    info!("session watcher started");

    while !inner.closing.load(Ordering::Acquire) {
        // Scan the full active set, not just new keys: a GC'd session whose
        // next event re-created its inbox must get its worker back.
        for session_key in inner.router.list_active_sessions() {
            ensure_worker(&inner, &session_key);
        }
        tokio::time::sleep(interval).await;
    }
    debug!("session watcher ended");
}

fn ensure_worker(inner: &Arc<CoreInner>, session_key: &str) {
    let mut workers = inner.workers.lock();
    if workers.get(session_key).is_some_and(|h| !h.is_finished()) {
        return;
    }

    let task = tokio::spawn(session_loop(inner.clone(), session_key.to_string()));
    workers.insert(session_key.to_string(), task);
    info!(session = %session_key, "worker started");
}

async fn gc_loop(inner: Arc<CoreInner>) {
    let sweep = Duration::from_secs_f64(inner.config.gc_sweep_interval_seconds.max(0.01));
    info!("session gc loop started");

    while !inner.closing.load(Ordering::Acquire) {
        tokio::time::sleep(sweep).await;
        if inner.closing.load(Ordering::Acquire) {
            break;
        }
        sweep_idle_sessions(&inner).await;
    }
    debug!("session gc loop ended");
}

async fn sweep_idle_sessions(inner: &Arc<CoreInner>) {
    let now = Utc::now();
    let candidates: Vec<String> = {
        let states = inner.states.lock();
        if states.len() < inner.config.min_sessions_to_gc {
            return;
        }
        states
            .iter()
            .filter(|(key, _)| key.as_str() != inner.config.system_session_key)
            .filter(|(_, state)| {
                state
                    .lock()
                    .idle_seconds(now)
                    .is_some_and(|idle| idle >= inner.config.idle_ttl_seconds)
            })
            .map(|(key, _)| key.clone())
            .collect()
    };

    for session_key in candidates {
        gc_session(inner, &session_key, "idle").await;
    }
}

async fn gc_session(inner: &Arc<CoreInner>, session_key: &str, reason: &str) {
    let handle = inner.workers.lock().remove(session_key);
    if let Some(handle) = handle {
        if !handle.is_finished() {
            handle.abort();
            let wait = Duration::from_millis(inner.config.gc_cancel_wait_ms);
            if timeout(wait, handle).await.is_err() {
                warn!(session = %session_key, "gc timed out waiting for worker, abandoning");
            }
        }
    }

    inner.states.lock().remove(session_key);
    // Removing the inbox last: the watcher stops seeing the session, and a
    // later event re-creates state and worker from scratch.
    inner.router.remove_session(session_key);
    inner.metrics.inc_gc(reason);
    info!(session = %session_key, reason, "session gc'd");
}

async fn egress_loop(inner: Arc<CoreInner>) {
    let Some(mut rx) = inner.egress_rx.lock().take() else {
        error!("egress loop started twice");
        return;
    };
    let per_dispatch = Duration::from_millis(inner.config.egress_timeout_ms);
    info!("egress loop started");

    while let Some(obs) = rx.recv().await {
        if inner.closing.load(Ordering::Acquire) {
            break;
        }
        match timeout(per_dispatch, inner.egress_hub.dispatch(&obs)).await {
            Ok(Ok(())) => inner.metrics.inc_egress_dispatched(),
            Ok(Err(e)) => {
                warn!(error = %e, obs_id = %obs.obs_id, "egress dispatch failed");
                inner.metrics.inc_egress_dropped();
            }
            Err(_) => {
                warn!(obs_id = %obs.obs_id, "egress dispatch timed out");
                inner.metrics.inc_egress_dropped();
            }
        }
    }
    debug!("egress loop ended");
}

// ---------------------------------------------------------------------------
// Per-session worker
// ---------------------------------------------------------------------------

async fn session_loop(inner: Arc<CoreInner>, session_key: String) {
    let Some(mut rx) = inner.router.take_receiver(&session_key) else {
        debug!(session = %session_key, "inbox already claimed, worker exiting");
        return;
    };
    let state = get_state(&inner, &session_key);

    while !inner.closing.load(Ordering::Acquire) {
        let Some(obs) = rx.recv().await else {
            break;
        };
        process_observation(&inner, &session_key, obs, &state).await;
    }
    debug!(session = %session_key, "worker ended");
}

async fn process_observation(
    inner: &Arc<CoreInner>,
    session_key: &str,
    mut obs: Observation,
    state: &Arc<Mutex<SessionState>>,
) {
    metrics::counter!("obs_processed", 1);
    state.lock().record(obs.clone());
    inner.metrics.inc_processed(session_key);

    if should_egress(&obs) {
        if inner.egress_tx.try_send(obs.clone()).is_err() {
            warn!(obs_id = %obs.obs_id, "egress queue full, dropping newest");
            inner.metrics.inc_egress_dropped();
        }
    }

    inner.provider.reload_if_changed();
    let snapshot = inner.provider.snapshot();

    let outcome = {
        let state_snapshot = state.lock().clone();
        let ctx = inner.gate.context(
            Utc::now(),
            &snapshot,
            &inner.config.system_session_key,
            Some(&state_snapshot),
            None,
        );
        inner.gate.handle(&obs, &ctx)
    };

    for emit in outcome.emit {
        publish(inner, emit);
    }
    for ingested in outcome.ingest {
        inner.gate.ingest(ingested, &outcome.decision);
    }

    // Persist every gated non-system observation, fail-open.
    if session_key != inner.config.system_session_key {
        if let Some(memory) = &inner.memory {
            match memory.append_event(&obs).await {
                Ok(Some(event_id)) => {
                    obs.metadata
                        .insert("memory_event_id".into(), Value::String(event_id));
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "memory append_event failed"),
            }
        }
    }

    if outcome.decision.action != GateAction::Deliver {
        return;
    }

    if session_key == inner.config.system_session_key {
        handle_system_observation(inner, &obs).await;
    } else {
        handle_user_observation(inner, session_key, obs, state, outcome.decision).await;
    }
}

// ---------------------------------------------------------------------------
// System session handling
// ---------------------------------------------------------------------------

async fn handle_system_observation(inner: &Arc<CoreInner>, obs: &Observation) {
    let now = Utc::now();

    match obs.obs_type {
        ObservationType::Alert => {
            let pain_key = extract_pain_key(obs);
            let severity = extract_pain_severity(obs)
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            inner.metrics.inc_pain(&pain_key, severity);

            let effects = inner.pain.lock().on_pain(obs, now);
            debug!(key = %pain_key, count = effects.window_count, "pain recorded");

            if let Some(source_id) = effects.cooldown_source {
                inner.metrics.inc_adapter_cooldown();
                warn!(adapter = %source_id, "pain burst, adapter cooled down");

                let mut extra = Map::new();
                extra.insert("adapter".into(), Value::String(source_id.clone()));
                publish(
                    inner,
                    make_pain_alert(
                        "system",
                        "adapter_cooldown",
                        Severity::High,
                        format!("adapter {} cooled down after pain burst", source_id),
                        None,
                        None,
                        Some(extra),
                    ),
                );
            }

            for emit in inner.reflex.evaluate_ttl(now) {
                publish(inner, emit);
            }
        }
        ObservationType::Control => {
            for emit in inner.reflex.handle_observation(obs, now) {
                publish(inner, emit);
            }
        }
        ObservationType::Schedule => {
            let overload_alert = inner.pain.lock().on_tick(inner.bus.dropped_total(), now);
            if let Some(alert) = overload_alert {
                inner.metrics.inc_drops_overload();
                warn!("drop overload detected");
                publish(inner, alert);
            }

            if inner.config.enable_system_fanout {
                fanout_tick(inner, obs, now);
            }

            for emit in inner.reflex.evaluate_ttl(now) {
                publish(inner, emit);
            }
        }
        _ => {
            debug!(obs_type = ?obs.obs_type, source = %obs.source_name, "system observation");
        }
    }
}

fn fanout_tick(inner: &Arc<CoreInner>, obs: &Observation, now: chrono::DateTime<Utc>) {
    if !inner.pain.lock().fanout_allowed(now) {
        inner.metrics.inc_fanout_skipped();
        return;
    }

    for session_key in inner.router.list_active_sessions() {
        if session_key == inner.config.system_session_key {
            continue;
        }

        let mut data = Map::new();
        data.insert("fanout_from".into(), Value::String(obs.obs_id.clone()));
        let mut tick = Observation::new(
            ObservationType::System,
            "core:fanout",
            Payload::System(SystemPayload { data }),
        );
        tick.source_kind = SourceKind::Internal;
        tick.session_key = Some(session_key.clone());
        tick.actor = Actor::system();

        if let Err(e) = inner.bus.publish_nowait(tick) {
            warn!(session = %session_key, error = %e, "fanout publish failed");
        }
    }
}

// ---------------------------------------------------------------------------
// User session handling
// ---------------------------------------------------------------------------

async fn handle_user_observation(
    inner: &Arc<CoreInner>,
    session_key: &str,
    obs: Observation,
    state: &Arc<Mutex<SessionState>>,
    decision: GateDecision,
) {
    // Self-loop prevention: the handler's own emissions never re-enter it.
    if obs.is_agent_sourced() {
        debug!(obs_id = %obs.obs_id, "agent-sourced observation, skipping handler");
        return;
    }

    if obs.obs_type != ObservationType::Message {
        return;
    }
    let Some(agent) = &inner.agent else {
        return;
    };

    let mut turn_id = None;
    if let Some(memory) = &inner.memory {
        if let Some(event_id) = obs.metadata.get("memory_event_id").and_then(Value::as_str) {
            match memory.start_turn(session_key, event_id, None).await {
                Ok(id) => turn_id = id,
                Err(e) => warn!(error = %e, "memory start_turn failed"),
            }
        }
    }

    let request = AgentRequest {
        obs: obs.clone(),
        hint: decision.hint.clone(),
        decision,
        session: state.lock().clone(),
        now: Utc::now(),
    };

    inner.metrics.inc_agent_invocation();
    let started = Instant::now();
    let result = agent.handle(request).await;
    metrics::histogram!("agent_latency_ms", started.elapsed().as_secs_f64() * 1000.0);

    match result {
        Ok(agent_outcome) => {
            let final_obs_id = agent_outcome.emit.first().map(|o| o.obs_id.clone());
            for emit in agent_outcome.emit {
                publish(inner, emit);
            }
            finish_turn(inner, turn_id, TurnStatus::Ok, None, final_obs_id.as_deref()).await;
        }
        Err(e) => {
            error!(session = %session_key, error = %e, "agent failed");
            state.lock().record_error();
            inner.metrics.inc_error(session_key);
            inner.metrics.inc_agent_failure();
            finish_turn(inner, turn_id, TurnStatus::Error, Some(e.to_string()), None).await;
        }
    }
}

async fn finish_turn(
    inner: &Arc<CoreInner>,
    turn_id: Option<String>,
    status: TurnStatus,
    error_message: Option<String>,
    final_output_obs_id: Option<&str>,
) {
    let (Some(memory), Some(turn_id)) = (&inner.memory, turn_id) else {
        return;
    };
    if let Err(e) = memory
        .finish_turn(&turn_id, status, error_message.as_deref(), final_output_obs_id)
        .await
    {
        warn!(error = %e, turn_id = %turn_id, "memory finish_turn failed");
    }
}
