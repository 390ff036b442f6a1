//! Single source of truth for the current gate config snapshot.
//!
//! Readers take one `Arc` clone per observation and keep working against it
//! even if a reload lands mid-flight; replacement is an atomic swap of the
//! shared reference. Failed parses never replace the current snapshot.

use crate::config::{GateConfig, OverridePatch};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// File identity used for cheap change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    mtime_ns: u128,
    size: u64,
}

pub struct GateConfigProvider {
    path: Option<PathBuf>,
    current: RwLock<Arc<GateConfig>>,
    last_stamp: Mutex<Option<FileStamp>>,
    last_hash: Mutex<Option<String>>,
}

impl GateConfigProvider {
    /// Provider backed by a config file; loads it eagerly, falling back to
    /// defaults when the initial load fails.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let provider = Self {
            path: Some(path.into()),
            current: RwLock::new(Arc::new(GateConfig::default())),
            last_stamp: Mutex::new(None),
            last_hash: Mutex::new(None),
        };
        provider.force_reload();
        provider
    }

    /// Provider without a backing file (tests, embedded setups).
    pub fn from_config(config: GateConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
            last_stamp: Mutex::new(None),
            last_hash: Mutex::new(None),
        }
    }

    /// Current snapshot. O(1): one Arc clone, no parsing, no file IO.
    pub fn snapshot(&self) -> Arc<GateConfig> {
        self.current.read().clone()
    }

    /// Reload when the backing file changed.
    ///
    /// `(mtime_ns, size)` is the primary check; when the stamp is unchanged
    /// a content hash settles it, because some filesystems round mtime to
    /// whole seconds. Returns whether a new snapshot was published.
    pub fn reload_if_changed(&self) -> bool {
        let Some(path) = self.path.as_deref() else {
            return false;
        };
        let Some(stamp) = safe_file_stamp(path) else {
            return false;
        };

        if Some(stamp) == *self.last_stamp.lock() {
            let current_hash = safe_file_hash(path);
            if current_hash.is_none() || current_hash == *self.last_hash.lock() {
                return false;
            }
        }

        self.force_reload()
    }

    /// Unconditionally reload from the backing file. Keeps the previous
    /// snapshot on any failure.
    pub fn force_reload(&self) -> bool {
        let Some(path) = self.path.as_deref() else {
            return false;
        };

        match GateConfig::from_yaml_file(path) {
            Ok(config) => {
                *self.current.write() = Arc::new(config);
                *self.last_stamp.lock() = safe_file_stamp(path);
                *self.last_hash.lock() = safe_file_hash(path);
                info!(path = %path.display(), "gate config reloaded");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "gate config reload failed, keeping previous snapshot");
                false
            }
        }
    }

    /// Apply an override patch by swapping in a new snapshot.
    ///
    /// Returns `false` when the patch changes nothing (the reference is
    /// left untouched in that case).
    pub fn update_overrides(&self, patch: &OverridePatch) -> bool {
        let mut guard = self.current.write();
        match guard.with_overrides(patch) {
            Some(next) => {
                *guard = Arc::new(next);
                debug!("gate overrides updated");
                true
            }
            None => false,
        }
    }
}

fn safe_file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime_ns = meta
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_nanos();
    Some(FileStamp {
        mtime_ns,
        size: meta.len(),
    })
}

fn safe_file_hash(path: &Path) -> Option<String> {
    let data = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Some(format!("{:x}", hasher.finalize()))
}
