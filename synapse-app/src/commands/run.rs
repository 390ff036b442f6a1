use crate::adapters::{stdin_text_adapter, timer_tick_adapter, ConsoleOutputAdapter, EchoAgent};
use crate::config::AppConfig;
use anyhow::Result;
use std::sync::Arc;
use synapse_gate::GateConfigProvider;
use synapse_runtime::{Core, EgressHub};
use tracing::info;

pub async fn run(config_path: &str) -> Result<()> {
    let app_config = AppConfig::load(config_path)?;
    let provider = Arc::new(GateConfigProvider::from_file(&app_config.gate_config_path));

    let hub = Arc::new(EgressHub::new());
    hub.register_default(Arc::new(ConsoleOutputAdapter));

    let core = Core::builder(provider)
        .config(app_config.core_config())
        .agent(EchoAgent::shared())
        .egress_hub(hub)
        .build();

    core.start();

    let bus = core.bus();
    let user = whoami();
    tokio::spawn(stdin_text_adapter(bus.clone(), user));
    if app_config.tick_interval_seconds > 0 {
        tokio::spawn(timer_tick_adapter(bus.clone(), app_config.tick_interval_seconds));
    }

    info!("synapse running, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    core.shutdown().await;
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "operator".to_string())
}
