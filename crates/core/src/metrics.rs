//! Core runtime counters consumed by the reflex controller and by tests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the dispatch core. Cheap to increment from any task;
/// structured snapshots are the read surface.
#[derive(Default)]
pub struct CoreMetrics {
    processed_total: AtomicU64,
    errors_total: AtomicU64,
    sessions_gc_total: AtomicU64,
    pain_total: AtomicU64,
    drops_overload_total: AtomicU64,
    adapters_cooldown_total: AtomicU64,
    fanout_skipped_total: AtomicU64,
    egress_dispatched_total: AtomicU64,
    egress_dropped_total: AtomicU64,
    agent_invocations_total: AtomicU64,
    agent_failures_total: AtomicU64,

    processed_by_session: Mutex<HashMap<String, u64>>,
    errors_by_session: Mutex<HashMap<String, u64>>,
    gc_by_reason: Mutex<HashMap<String, u64>>,
    pain_by_source: Mutex<HashMap<String, u64>>,
    pain_by_severity: Mutex<HashMap<String, u64>>,
}

impl CoreMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_processed(&self, session_key: &str) {
        self.processed_total.fetch_add(1, Ordering::Relaxed);
        bump(&self.processed_by_session, session_key);
    }

    pub fn inc_error(&self, session_key: &str) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        bump(&self.errors_by_session, session_key);
    }

    pub fn inc_gc(&self, reason: &str) {
        self.sessions_gc_total.fetch_add(1, Ordering::Relaxed);
        bump(&self.gc_by_reason, reason);
    }

    pub fn inc_pain(&self, source_key: &str, severity: &str) {
        self.pain_total.fetch_add(1, Ordering::Relaxed);
        bump(&self.pain_by_source, source_key);
        bump(&self.pain_by_severity, severity);
    }

    pub fn inc_drops_overload(&self) {
        self.drops_overload_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_adapter_cooldown(&self) {
        self.adapters_cooldown_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fanout_skipped(&self) {
        self.fanout_skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_egress_dispatched(&self) {
        self.egress_dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_egress_dropped(&self) {
        self.egress_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_agent_invocation(&self) {
        self.agent_invocations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_agent_failure(&self) {
        self.agent_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoreMetricsSnapshot {
        CoreMetricsSnapshot {
            processed_total: self.processed_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            sessions_gc_total: self.sessions_gc_total.load(Ordering::Relaxed),
            pain_total: self.pain_total.load(Ordering::Relaxed),
            drops_overload_total: self.drops_overload_total.load(Ordering::Relaxed),
            adapters_cooldown_total: self.adapters_cooldown_total.load(Ordering::Relaxed),
            fanout_skipped_total: self.fanout_skipped_total.load(Ordering::Relaxed),
            egress_dispatched_total: self.egress_dispatched_total.load(Ordering::Relaxed),
            egress_dropped_total: self.egress_dropped_total.load(Ordering::Relaxed),
            agent_invocations_total: self.agent_invocations_total.load(Ordering::Relaxed),
            agent_failures_total: self.agent_failures_total.load(Ordering::Relaxed),
            processed_by_session: self.processed_by_session.lock().clone(),
            errors_by_session: self.errors_by_session.lock().clone(),
            gc_by_reason: self.gc_by_reason.lock().clone(),
            pain_by_source: self.pain_by_source.lock().clone(),
            pain_by_severity: self.pain_by_severity.lock().clone(),
        }
    }
}

fn bump(map: &Mutex<HashMap<String, u64>>, key: &str) {
    let mut map = map.lock();
    *map.entry(key.to_string()).or_insert(0) += 1;
}

/// Point-in-time copy of all core counters.
#[derive(Debug, Clone, Default)]
pub struct CoreMetricsSnapshot {
    pub processed_total: u64,
    pub errors_total: u64,
    pub sessions_gc_total: u64,
    pub pain_total: u64,
    pub drops_overload_total: u64,
    pub adapters_cooldown_total: u64,
    pub fanout_skipped_total: u64,
    pub egress_dispatched_total: u64,
    pub egress_dropped_total: u64,
    pub agent_invocations_total: u64,
    pub agent_failures_total: u64,
    pub processed_by_session: HashMap<String, u64>,
    pub errors_by_session: HashMap<String, u64>,
    pub gc_by_reason: HashMap<String, u64>,
    pub pain_by_source: HashMap<String, u64>,
    pub pain_by_severity: HashMap<String, u64>,
}
