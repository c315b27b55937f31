use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hangman_client::{channels, config, ClientEvent, ClientEventKind, StatusTracker, WsClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    // Initialize the tracing subscriber for structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "hangman_client=debug,warn".into()
            } else {
                "hangman_client=info,warn".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    info!(version = hangman_client::VERSION, "Hangman client starting");

    // Log environment loading after logger is initialized
    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let config = config::load_config().await?;
    let client = WsClient::new(config.server_url.clone(), config.client.clone())?;
    let tracker = StatusTracker::attach(&client);

    // Report status changes
    let mut status = tracker.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!(status = %current, "Connection status changed");
        }
    });

    client.on_message(|channel, sender, payload| {
        info!(channel, sender = ?sender, payload = ?payload, "Message received");
    });
    client.on_close(|reason, code, was_clean| {
        warn!(code, reason, was_clean, "Connection closed");
    });
    client.on(ClientEventKind::Error, |event| {
        if let ClientEvent::Error { message } = event {
            error!(message = %message, "Client error");
        }
    });

    // Optionally look for a game once identified
    if std::env::var("HANGMAN_FIND_GAME").is_ok() {
        let finder = client.downgrade();
        client.on(ClientEventKind::Connect, move |_| {
            if let Some(client) = finder.upgrade() {
                client.send_empty(channels::FIND);
            }
        });
    }

    client.connect();
    info!(url = %config.server_url, "Press Ctrl+C to stop the client");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, closing connection...");

    client.shutdown();

    info!("Client shutdown complete");
    Ok(())
}
