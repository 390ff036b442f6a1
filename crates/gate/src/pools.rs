//! Bounded ring buffers holding ingested observations for inspection.
//!
//! Pools are post-mortem/debug surfaces only; nothing is persisted and the
//! oldest entry is evicted on overflow. Ingest happens inside the owning
//! worker, so contention on the inner lock is negligible.

use parking_lot::Mutex;
use std::collections::VecDeque;
use synapse_core::Observation;

/// Default pool capacity.
pub const POOL_CAPACITY: usize = 1000;

/// Fixed-capacity observation ring.
pub struct GatePool {
    name: &'static str,
    capacity: usize,
    buf: Mutex<VecDeque<Observation>>,
}

impl GatePool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            buf: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ingest(&self, obs: Observation) {
        let mut buf = self.buf.lock();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(obs);
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }

    /// Most recent entries, oldest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<Observation> {
        let buf = self.buf.lock();
        buf.iter()
            .skip(buf.len().saturating_sub(limit))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use synapse_core::Actor;

    fn obs(text: &str) -> Observation {
        Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), text)
    }

    #[test]
    fn test_ingest_and_recent() {
        let pool = GatePool::new("sink", 10);
        pool.ingest(obs("one"));
        pool.ingest(obs("two"));

        let recent = pool.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message_payload().unwrap().normalized_text(), "one");
        assert_eq!(recent[1].message_payload().unwrap().normalized_text(), "two");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let pool = GatePool::new("drop", 3);
        for i in 0..5 {
            pool.ingest(obs(&format!("m{}", i)));
        }
        assert_eq!(pool.len(), 3);
        let recent = pool.recent(3);
        assert_eq!(recent[0].message_payload().unwrap().normalized_text(), "m2");
        assert_eq!(recent[2].message_payload().unwrap().normalized_text(), "m4");
    }

    #[test]
    fn test_recent_limit() {
        let pool = GatePool::new("tool", 10);
        for i in 0..6 {
            pool.ingest(obs(&format!("m{}", i)));
        }
        let recent = pool.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message_payload().unwrap().normalized_text(), "m4");
    }
}
