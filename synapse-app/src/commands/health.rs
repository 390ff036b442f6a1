use crate::config::AppConfig;
use anyhow::Result;
use synapse_gate::GateConfig;

pub fn run(config_path: &str) -> Result<()> {
    let app_config = AppConfig::load(config_path)?;
    println!("app config: ok ({})", config_path);

    match GateConfig::from_yaml_file(&app_config.gate_config_path) {
        Ok(gate) => {
            println!("gate config: ok ({})", app_config.gate_config_path);
            println!("  scene policies: {}", gate.scene_policies.len());
            println!("  budget profiles: {}", gate.budget_profiles.len());
            println!(
                "  overrides: emergency_mode={} force_low_model={}",
                gate.overrides.emergency_mode, gate.overrides.force_low_model
            );
        }
        Err(e) => {
            println!(
                "gate config: FAILED ({}): {} - the core would run on defaults",
                app_config.gate_config_path, e
            );
        }
    }

    println!(
        "sessions: gc={} idle_ttl={}s sweep={}s",
        app_config.enable_session_gc,
        app_config.idle_ttl_seconds,
        app_config.gc_sweep_interval_seconds
    );
    Ok(())
}
