//! Runtime-only session state. Owned by exactly one worker; never persisted.

use crate::observation::Observation;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// How many recent observations a session keeps for context building.
pub const RECENT_OBS_CAP: usize = 20;

/// Lightweight per-session runtime state.
///
/// Single-writer: only the session's worker mutates it. The GC loop reads
/// `idle_seconds` through the worker's shared handle.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_key: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub processed_total: u64,
    pub error_total: u64,
    pub recent_obs: VecDeque<Observation>,
}

impl SessionState {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            created_at: Utc::now(),
            last_active_at: None,
            processed_total: 0,
            error_total: 0,
            recent_obs: VecDeque::with_capacity(RECENT_OBS_CAP),
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Some(Utc::now());
    }

    /// Record a processed observation: bumps counters, refreshes activity,
    /// appends to the recent ring (oldest evicted).
    pub fn record(&mut self, obs: Observation) {
        self.touch();
        self.processed_total += 1;
        if self.recent_obs.len() == RECENT_OBS_CAP {
            self.recent_obs.pop_front();
        }
        self.recent_obs.push_back(obs);
    }

    pub fn record_error(&mut self) {
        self.touch();
        self.error_total += 1;
    }

    /// Seconds since last activity, or `None` if never active.
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_active_at
            .map(|last| (now - last).num_milliseconds() as f64 / 1000.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::observation::Actor;
    use chrono::Duration;

    fn obs(text: &str) -> Observation {
        Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), text)
    }

    #[test]
    fn test_record_updates_counters_and_activity() {
        let mut state = SessionState::new("dm:a");
        assert!(state.last_active_at.is_none());

        state.record(obs("one"));
        state.record(obs("two"));

        assert_eq!(state.processed_total, 2);
        assert_eq!(state.recent_obs.len(), 2);
        assert!(state.last_active_at.is_some());
    }

    #[test]
    fn test_recent_obs_evicts_oldest() {
        let mut state = SessionState::new("dm:a");
        for i in 0..(RECENT_OBS_CAP + 5) {
            state.record(obs(&format!("m{}", i)));
        }
        assert_eq!(state.recent_obs.len(), RECENT_OBS_CAP);
        let first = state.recent_obs.front().unwrap();
        assert_eq!(
            first.message_payload().unwrap().normalized_text(),
            "m5",
            "oldest entries are evicted first"
        );
    }

    #[test]
    fn test_record_error() {
        let mut state = SessionState::new("dm:a");
        state.record_error();
        assert_eq!(state.error_total, 1);
        assert!(state.last_active_at.is_some());
    }

    #[test]
    fn test_idle_seconds() {
        let mut state = SessionState::new("dm:a");
        assert!(state.idle_seconds(Utc::now()).is_none());

        state.touch();
        let later = Utc::now() + Duration::seconds(90);
        let idle = state.idle_seconds(later).unwrap();
        assert!(idle >= 89.0 && idle <= 91.0, "idle={}", idle);
    }
}
