//! Duplicate suppression inside a per-scene time window.
//!
//! A duplicate is the same fingerprint seen again within the scene's dedup
//! window: it is demoted to SINK instead of reaching the handler twice.
//! ALERT observations are never deduplicated - losing a repeated pain
//! signal would blind the protection loop.

use super::{GateStage, StageError};
use crate::config::Scene;
use crate::types::{GateContext, GateWip};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use synapse_core::Observation;

/// Entries above this count trigger an expiry sweep on insert.
const PRUNE_THRESHOLD: usize = 8192;

/// Stable content fingerprint: normalized text for messages (the payload
/// JSON for everything else), scene, actor, session and observation type.
pub fn compute_fingerprint(obs: &Observation, scene: Scene) -> String {
    let text = match obs.message_payload() {
        Some(p) => p.normalized_text().to_lowercase(),
        None => serde_json::to_string(&obs.payload).unwrap_or_default(),
    };

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(scene.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(obs.actor.actor_id().as_bytes());
    hasher.update(b"|");
    hasher.update(obs.session_key.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{:?}", obs.obs_type).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct Deduplicator {
    last_seen: Mutex<HashMap<String, f64>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl GateStage for Deduplicator {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn apply(
        &self,
        obs: &Observation,
        ctx: &GateContext<'_>,
        wip: &mut GateWip,
    ) -> Result<(), StageError> {
        let scene = wip.scene();
        if scene == Scene::Alert {
            return Ok(());
        }

        let window = ctx.config.scene_policy(scene).dedup_window_sec;
        let fingerprint = compute_fingerprint(obs, scene);
        wip.fingerprint = Some(fingerprint.clone());

        let now_s = ctx.now.timestamp_millis() as f64 / 1000.0;
        let mut seen = self.last_seen.lock();

        if let Some(last) = seen.get(&fingerprint) {
            if now_s - last <= window {
                wip.tags.insert("dedup".into(), "hit".into());
                wip.action_hint = Some(crate::config::GateAction::Sink);
                wip.push_reason("dedup_hit");
            }
        }
        seen.insert(fingerprint, now_s);

        if seen.len() > PRUNE_THRESHOLD {
            let cutoff = now_s - window.max(60.0);
            seen.retain(|_, ts| *ts >= cutoff);
        }

        Ok(())
    }
}
