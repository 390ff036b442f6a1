//! Gate decision counters, broken down by scene and action.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{GateAction, Scene};

#[derive(Default)]
pub struct GateMetrics {
    processed_total: AtomicU64,
    dropped_total: AtomicU64,
    sunk_total: AtomicU64,
    delivered_total: AtomicU64,
    by_scene: Mutex<HashMap<String, u64>>,
    by_action: Mutex<HashMap<String, u64>>,
}

impl GateMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_decision(&self, scene: Scene, action: GateAction) {
        self.processed_total.fetch_add(1, Ordering::Relaxed);
        match action {
            GateAction::Drop => self.dropped_total.fetch_add(1, Ordering::Relaxed),
            GateAction::Sink => self.sunk_total.fetch_add(1, Ordering::Relaxed),
            GateAction::Deliver => self.delivered_total.fetch_add(1, Ordering::Relaxed),
        };

        let mut by_scene = self.by_scene.lock();
        *by_scene.entry(scene.as_str().to_string()).or_insert(0) += 1;
        drop(by_scene);

        let mut by_action = self.by_action.lock();
        *by_action.entry(action.as_str().to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> GateMetricsSnapshot {
        GateMetricsSnapshot {
            processed_total: self.processed_total.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
            sunk_total: self.sunk_total.load(Ordering::Relaxed),
            delivered_total: self.delivered_total.load(Ordering::Relaxed),
            by_scene: self.by_scene.lock().clone(),
            by_action: self.by_action.lock().clone(),
        }
    }
}

/// Point-in-time copy of the gate counters.
#[derive(Debug, Clone, Default)]
pub struct GateMetricsSnapshot {
    pub processed_total: u64,
    pub dropped_total: u64,
    pub sunk_total: u64,
    pub delivered_total: u64,
    pub by_scene: HashMap<String, u64>,
    pub by_action: HashMap<String, u64>,
}
