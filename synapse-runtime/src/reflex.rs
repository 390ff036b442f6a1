//! System reflex controller: turn CONTROL tuning suggestions into
//! whitelisted, TTL-bounded config overrides with automatic revert.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use synapse_core::Observation;
use synapse_gate::{GateConfigProvider, OverridePatch};
use tracing::{info, warn};

/// Hard upper bound on suggestion TTLs, regardless of what the payload asks
/// for.
pub const SUGGESTION_TTL_MAX_SECONDS: i64 = 3600;

/// Control kinds consumed and emitted by the controller.
pub const CONTROL_TUNING_SUGGESTION: &str = "tuning_suggestion";
pub const CONTROL_TUNING_APPLIED: &str = "tuning_applied";
pub const CONTROL_TUNING_REVERTED: &str = "tuning_reverted";
pub const CONTROL_SYSTEM_MODE_CHANGED: &str = "system_mode_changed";

const REFLEX_SOURCE: &str = "system_reflex";

#[derive(Debug, Clone)]
pub struct ReflexConfig {
    pub allow_agent_suggestions: bool,
    pub suggestion_ttl_default_sec: i64,
    pub suggestion_cooldown_sec: i64,
    /// Override keys the agent may touch. `emergency_mode` is deliberately
    /// absent and must stay operator-only.
    pub whitelist: HashSet<String>,
}

impl Default for ReflexConfig {
    fn default() -> Self {
        Self {
            allow_agent_suggestions: true,
            suggestion_ttl_default_sec: 60,
            suggestion_cooldown_sec: 30,
            whitelist: HashSet::from(["force_low_model".to_string()]),
        }
    }
}

/// Live override bookkeeping for one whitelisted key.
#[derive(Debug, Clone)]
struct OverrideEntry {
    applied: bool,
    prior: bool,
    active_until: DateTime<Utc>,
    applied_reason: String,
}

pub struct ReflexController {
    provider: Arc<GateConfigProvider>,
    config: ReflexConfig,
    system_session_key: String,
    entries: Mutex<HashMap<String, OverrideEntry>>,
    /// Cooldown tracking survives entry expiry.
    last_applied: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ReflexController {
    pub fn new(
        provider: Arc<GateConfigProvider>,
        config: ReflexConfig,
        system_session_key: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            config,
            system_session_key: system_session_key.into(),
            entries: Mutex::new(HashMap::new()),
            last_applied: Mutex::new(HashMap::new()),
        }
    }

    /// Process one system-session observation. Tuning suggestions are
    /// applied; every call also evaluates override TTLs. Returned
    /// observations must be published on the bus by the caller.
    pub fn handle_observation(&self, obs: &Observation, now: DateTime<Utc>) -> Vec<Observation> {
        let mut emits = Vec::new();

        if let Some(control) = obs.control_payload() {
            if control.kind == CONTROL_TUNING_SUGGESTION {
                emits.extend(self.handle_suggestion(&control.data, now));
            }
        }

        emits.extend(self.evaluate_ttl(now));
        emits
    }

    fn handle_suggestion(&self, data: &Map<String, Value>, now: DateTime<Utc>) -> Vec<Observation> {
        let mut emits = Vec::new();
        let mut approved = Map::new();
        let mut denied = Map::new();

        if !self.config.allow_agent_suggestions {
            emits.push(self.emit_tuning_applied(&approved, &denied, 0, now, "agent_suggestion_disabled"));
            return emits;
        }

        let Some(suggested) = data.get("suggested_overrides").and_then(Value::as_object) else {
            warn!("tuning_suggestion without suggested_overrides map");
            emits.push(self.emit_tuning_applied(&approved, &denied, 0, now, "invalid_payload"));
            return emits;
        };

        let ttl_sec = data
            .get("ttl_sec")
            .and_then(Value::as_i64)
            .unwrap_or(self.config.suggestion_ttl_default_sec)
            .clamp(1, SUGGESTION_TTL_MAX_SECONDS);

        let mut patch = OverridePatch::default();
        let last_applied = self.last_applied.lock().clone();

        for (key, value) in suggested {
            if !self.config.whitelist.contains(key.as_str()) {
                denied.insert(key.clone(), Value::from("not_whitelisted"));
                continue;
            }
            let Some(flag) = value.as_bool() else {
                denied.insert(key.clone(), Value::from("invalid_payload"));
                continue;
            };
            if let Some(last) = last_applied.get(key.as_str()) {
                if (now - *last).num_seconds() < self.config.suggestion_cooldown_sec {
                    denied.insert(key.clone(), Value::from("cooldown"));
                    continue;
                }
            }

            match key.as_str() {
                "force_low_model" => patch.force_low_model = Some(flag),
                "emergency_mode" => patch.emergency_mode = Some(flag),
                _ => {
                    denied.insert(key.clone(), Value::from("not_whitelisted"));
                    continue;
                }
            }
            approved.insert(key.clone(), Value::Bool(flag));
        }

        if approved.is_empty() {
            let reason = if denied.values().any(|v| v.as_str() == Some("cooldown")) {
                "cooldown"
            } else {
                "no_allowed_overrides"
            };
            emits.push(self.emit_tuning_applied(&approved, &denied, ttl_sec, now, reason));
            return emits;
        }

        let prior = self.provider.snapshot().overrides.clone();
        let changed = self.provider.update_overrides(&patch);

        if changed {
            let until = now + Duration::seconds(ttl_sec);
            let mut entries = self.entries.lock();
            let mut last = self.last_applied.lock();
            for (key, value) in &approved {
                let prior_value = match key.as_str() {
                    "force_low_model" => prior.force_low_model,
                    "emergency_mode" => prior.emergency_mode,
                    _ => false,
                };
                entries.insert(
                    key.clone(),
                    OverrideEntry {
                        applied: value.as_bool().unwrap_or(false),
                        prior: prior_value,
                        active_until: until,
                        applied_reason: "agent_suggestion".into(),
                    },
                );
                last.insert(key.clone(), now);
            }
            drop(entries);
            drop(last);

            info!(ttl_sec, "tuning suggestion applied");
            emits.push(self.emit_tuning_applied(&approved, &denied, ttl_sec, now, "agent_suggestion"));
            emits.push(self.emit_system_mode_changed(&approved, "agent_suggestion"));
        } else {
            approved.clear();
            emits.push(self.emit_tuning_applied(&approved, &denied, ttl_sec, now, "no_change"));
        }

        emits
    }

    /// Revert every override whose TTL has expired.
    pub fn evaluate_ttl(&self, now: DateTime<Utc>) -> Vec<Observation> {
        let expired: Vec<(String, OverrideEntry)> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, e)| now >= e.active_until)
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect()
        };

        if expired.is_empty() {
            return Vec::new();
        }

        let mut patch = OverridePatch::default();
        let mut reverted = Map::new();
        for (key, entry) in &expired {
            match key.as_str() {
                "force_low_model" => patch.force_low_model = Some(entry.prior),
                "emergency_mode" => patch.emergency_mode = Some(entry.prior),
                _ => continue,
            }
            reverted.insert(key.clone(), Value::Bool(entry.prior));
        }

        let changed = self.provider.update_overrides(&patch);
        {
            let mut entries = self.entries.lock();
            for (key, _) in &expired {
                entries.remove(key);
            }
        }

        info!(keys = ?reverted.keys().collect::<Vec<_>>(), "tuning overrides reverted");
        let mut emits = vec![self.emit_tuning_reverted(&reverted, "ttl_expired")];
        if changed {
            emits.push(self.emit_system_mode_changed(&reverted, "ttl_expired"));
        }
        emits
    }

    /// Override keys currently active (tests/inspection).
    pub fn active_overrides(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Live bookkeeping per active key: applied value, expiry, reason.
    pub fn suggestion_state(&self) -> HashMap<String, (bool, DateTime<Utc>, String)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, e)| (k.clone(), (e.applied, e.active_until, e.applied_reason.clone())))
            .collect()
    }

    fn emit_tuning_applied(
        &self,
        approved: &Map<String, Value>,
        denied: &Map<String, Value>,
        ttl_sec: i64,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Observation {
        let until_ts = (now + Duration::seconds(ttl_sec)).timestamp();
        let data = control_data(json!({
            "approved": approved,
            "denied": denied,
            "ttl_sec": ttl_sec,
            "until_ts": until_ts,
            "reason": reason,
        }));
        Observation::control(
            REFLEX_SOURCE,
            self.system_session_key.as_str(),
            CONTROL_TUNING_APPLIED,
            data,
        )
    }

    fn emit_system_mode_changed(&self, changed: &Map<String, Value>, reason: &str) -> Observation {
        let snapshot = self.provider.snapshot();
        let data = control_data(json!({
            "changed_overrides": changed,
            "mode": {
                "emergency_mode": snapshot.overrides.emergency_mode,
                "force_low_model": snapshot.overrides.force_low_model,
            },
            "reason": reason,
        }));
        Observation::control(
            REFLEX_SOURCE,
            self.system_session_key.as_str(),
            CONTROL_SYSTEM_MODE_CHANGED,
            data,
        )
    }

    fn emit_tuning_reverted(&self, reverted: &Map<String, Value>, reason: &str) -> Observation {
        let data = control_data(json!({
            "reverted_overrides": reverted,
            "reason": reason,
        }));
        Observation::control(
            REFLEX_SOURCE,
            self.system_session_key.as_str(),
            CONTROL_TUNING_REVERTED,
            data,
        )
    }
}

fn control_data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
