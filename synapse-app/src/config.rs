use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use synapse_runtime::CoreConfig;

/// App-level configuration (`synapse.yaml`). The gate's own policy lives in
/// a separate file so it can hot-reload independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gate_config_path: String,
    pub bus_capacity: usize,
    pub inbox_capacity: usize,
    pub enable_session_gc: bool,
    pub idle_ttl_seconds: f64,
    pub gc_sweep_interval_seconds: f64,
    pub egress_timeout_ms: u64,
    /// Interval for the heartbeat SCHEDULE tick, 0 disables it.
    pub tick_interval_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gate_config_path: "gate.yaml".to_string(),
            bus_capacity: 1000,
            inbox_capacity: 256,
            enable_session_gc: true,
            idle_ttl_seconds: 600.0,
            gc_sweep_interval_seconds: 30.0,
            egress_timeout_ms: 1000,
            tick_interval_seconds: 30,
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: AppConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.bus_capacity == 0 {
            bail!("bus_capacity must be > 0");
        }
        if self.inbox_capacity == 0 {
            bail!("inbox_capacity must be > 0");
        }
        if self.idle_ttl_seconds <= 0.0 {
            bail!("idle_ttl_seconds must be > 0");
        }
        Ok(())
    }

    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            bus_capacity: self.bus_capacity,
            inbox_capacity: self.inbox_capacity,
            enable_session_gc: self.enable_session_gc,
            idle_ttl_seconds: self.idle_ttl_seconds,
            gc_sweep_interval_seconds: self.gc_sweep_interval_seconds,
            egress_timeout_ms: self.egress_timeout_ms,
            ..CoreConfig::default()
        }
    }
}
