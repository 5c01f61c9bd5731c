use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use omni_core::chat::{ChatService, TelegramClient};
use omni_core::completion::{CompletionService, OpenAiClient};
use omni_core::config::MonitorConfig;
use omni_core::logger;
use omni_core::orchestrator::{MonitoringSystem, Services};
use omni_core::platform::{create_platform, interrupt};
use omni_core::supervisor::{DryRunSupervisor, ProcessControl, Supervisor};

fn main() -> Result<()> {
    let force_stub = std::env::args().any(|a| a == "--stub");
    let config_path = std::env::args()
        .skip(1)
        .find(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));

    // A missing .env is fine; the config file may carry the credentials.
    dotenvy::dotenv().ok();

    let config = MonitorConfig::load(&config_path)?;

    logger::init(&config.log_dir, true);
    interrupt::install();

    let platform = create_platform(force_stub);
    let supervisor: Arc<dyn ProcessControl> = if force_stub {
        Arc::new(DryRunSupervisor::new())
    } else {
        Arc::new(Supervisor::new(&config.interpreters))
    };
    let chat: Arc<dyn ChatService> = Arc::new(TelegramClient::new(&config.chat)?);
    let completion: Arc<dyn CompletionService> = Arc::new(OpenAiClient::new(&config.completion)?);

    logger::info(&format!(
        "loaded {} ({} pixel(s), {} hotkey(s), {} chain(s))",
        config_path.display(),
        config.pixels.len(),
        config.hotkeys.len(),
        config.chained_scripts.len()
    ));

    let system = MonitoringSystem::new(config, Services { platform, supervisor, chat, completion })?;
    system.run(&interrupt::requested);
    Ok(())
}
