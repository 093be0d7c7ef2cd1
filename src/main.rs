//! slircbot - Straylight IRC bot
//!
//! Runs the bot core with no plugins of its own. Applications embed the
//! library and register their plugins in the catalog instead.

use slircbot::config::{Config, validate};
use slircbot::plugins::Catalog;
use slircbot::runtime::Bot;
use slircbot::telemetry::{self, LogFormat};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    telemetry::init(LogFormat::from_env());

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "slircbot.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    info!(
        path = %config_path,
        networks = config.networks.len(),
        connections = config.connections.len(),
        "Starting slircbot"
    );

    let bot = Bot::new(config, Catalog::new())?;
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(bot.run());

    info!("Shutdown complete");
    Ok(())
}
