use firstblood::chat::discord::DiscordClient;
use firstblood::config::Config;
use firstblood::driver::Poller;
use firstblood::fetcher::NotificationFeed;
use firstblood::store::StateStore;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

const CONFIG_FILE: &str = "firstblood.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = if Path::new(CONFIG_FILE).exists() {
        Config::load(Path::new(CONFIG_FILE))?
    } else {
        Config::from_env()?
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("firstblood v{} starting", env!("CARGO_PKG_VERSION"));

    if !config.has_credentials() {
        error!("DISCORD_TOKEN not set. Exiting.");
        return Ok(());
    }
    config.require_backend()?;

    let chat = match DiscordClient::connect(&config.discord).await {
        Ok(c) => c,
        Err(e) => {
            error!(channel = config.discord.channel_id, error = %e, "channel not found, exiting");
            return Ok(());
        }
    };

    let source = NotificationFeed::new(&config.backend)?;
    let store = StateStore::new(&config.poller.history_file, &config.poller.state_file);
    info!(
        history = %store.history_path().display(),
        state = %store.state_path().display(),
        interval_secs = config.poller.interval_secs,
        "state files"
    );

    let poller = Poller::new(
        source,
        chat,
        store,
        Duration::from_secs(config.poller.interval_secs),
        config.discord.mention.clone(),
    );

    poller.bootstrap().await;
    poller
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    info!("firstblood stopped");
    Ok(())
}
