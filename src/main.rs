use std::sync::Arc;

use tracing::{error, info};

use feed_relay::{Config, Database, FeedRelay, HttpSourceClient, Scheduler, WebhookMessenger};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = feed_relay::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feed_relay::logging::init_console_only(&config.logging.level);
    }

    info!("Feed relay starting");

    if let Err(e) = run(config).await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> feed_relay::Result<()> {
    config.validate()?;

    let db = Database::open(&config.database.path).await?;
    let source = HttpSourceClient::new(&config.feed)?;
    let messenger = WebhookMessenger::new(&config.delivery)?;

    let relay = FeedRelay::new(
        config.feed.id.clone(),
        &db,
        Arc::new(source),
        Arc::new(messenger),
        config.feed.message_template.clone(),
    );
    let enabled = relay.registry().count_enabled(&config.feed.id).await?;
    info!(
        "Relaying feed {} to {} subscription(s)",
        config.feed.id, enabled
    );

    // Webhook delivery needs no session, so the messaging side is ready at once
    let scheduler = Scheduler::with_interval_secs(Arc::new(relay), config.feed.poll_interval_secs);
    let handle = scheduler.start(async {});

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    handle.stop().await;
    db.close().await;
    info!("Feed relay stopped");
    Ok(())
}
