//! Pain aggregation: sliding-window burst detection over pain alerts, plus
//! the drop-overload check driven by schedule ticks.
//!
//! State is owned by the core and mutated only inside the system session's
//! worker; the struct itself is not synchronized.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use synapse_core::{
    extract_pain_key, make_pain_alert, Observation, Severity, ADAPTER_COOLDOWN_SECONDS,
    DROP_BURST_THRESHOLD, FANOUT_SUPPRESS_SECONDS, PAIN_BURST_THRESHOLD, PAIN_WINDOW_SECONDS,
};

/// What a pain alert triggered.
#[derive(Debug, Clone, Default)]
pub struct PainEffects {
    /// Alerts from this source inside the current window.
    pub window_count: usize,
    /// Source id put into cooldown by this alert, if any.
    pub cooldown_source: Option<String>,
}

/// Copy of the protective state, for tests and introspection.
#[derive(Debug, Clone, Default)]
pub struct PainSnapshot {
    pub adapter_cooldowns: HashMap<String, DateTime<Utc>>,
    pub fanout_suppress_until: Option<DateTime<Utc>>,
}

pub struct PainAggregator {
    timestamps: HashMap<String, VecDeque<DateTime<Utc>>>,
    adapter_cooldowns: HashMap<String, DateTime<Utc>>,
    fanout_suppress_until: Option<DateTime<Utc>>,
    drops_last: u64,
}

impl PainAggregator {
    pub fn new() -> Self {
        Self {
            timestamps: HashMap::new(),
            adapter_cooldowns: HashMap::new(),
            fanout_suppress_until: None,
            drops_last: 0,
        }
    }

    /// Record one pain alert and evaluate the burst rule.
    ///
    /// Five alerts from the same `adapter` source inside the 60s window
    /// cool that adapter down for 300s and suppress fanout for 60s.
    pub fn on_pain(&mut self, obs: &Observation, now: DateTime<Utc>) -> PainEffects {
        let key = extract_pain_key(obs);
        let window = self.timestamps.entry(key.clone()).or_default();
        window.push_back(now);

        let cutoff = now - Duration::seconds(PAIN_WINDOW_SECONDS as i64);
        while window.front().is_some_and(|ts| *ts <= cutoff) {
            window.pop_front();
        }

        let mut effects = PainEffects {
            window_count: window.len(),
            cooldown_source: None,
        };

        if window.len() >= PAIN_BURST_THRESHOLD {
            let (source_kind, source_id) = key.split_once(':').unwrap_or((key.as_str(), "unknown"));
            if source_kind == "adapter" {
                self.adapter_cooldowns.insert(
                    source_id.to_string(),
                    now + Duration::seconds(ADAPTER_COOLDOWN_SECONDS as i64),
                );
                self.fanout_suppress_until =
                    Some(now + Duration::seconds(FANOUT_SUPPRESS_SECONDS as i64));
                effects.cooldown_source = Some(source_id.to_string());
            }
        }

        effects
    }

    /// Per-tick drop-overload check against the bus drop counter.
    ///
    /// A delta of 50+ since the previous tick suppresses fanout and yields
    /// a synthesized system pain alert the caller must publish.
    pub fn on_tick(&mut self, drop_total: u64, now: DateTime<Utc>) -> Option<Observation> {
        let delta = drop_total.saturating_sub(self.drops_last);
        self.drops_last = drop_total;

        if delta < DROP_BURST_THRESHOLD {
            return None;
        }

        self.fanout_suppress_until = Some(now + Duration::seconds(FANOUT_SUPPRESS_SECONDS as i64));

        let mut extra = Map::new();
        extra.insert("drops_delta".into(), Value::from(delta));
        Some(make_pain_alert(
            "system",
            "drop_overload",
            Severity::High,
            format!("dropped {} observations since last tick", delta),
            None,
            None,
            Some(extra),
        ))
    }

    pub fn fanout_allowed(&self, now: DateTime<Utc>) -> bool {
        self.fanout_suppress_until.map_or(true, |until| now >= until)
    }

    pub fn adapter_in_cooldown(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        self.adapter_cooldowns
            .get(source_id)
            .is_some_and(|until| now < *until)
    }

    pub fn snapshot(&self) -> PainSnapshot {
        PainSnapshot {
            adapter_cooldowns: self.adapter_cooldowns.clone(),
            fanout_suppress_until: self.fanout_suppress_until,
        }
    }
}

impl Default for PainAggregator {
    fn default() -> Self {
        Self::new()
    }
}
