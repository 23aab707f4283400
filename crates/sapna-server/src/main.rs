// sapna11 entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config
// 3. Open database
// 4. Build the feed client and poller registry
// 5. Spawn the overlay WebSocket server
// 6. Serve the HTTP API until Ctrl+C
// 7. Stop pollers and the overlay server

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use sapna_core::config;
use sapna_core::db::RoomStore;
use sapna_feed::{FancrazeClient, MatchFeed, PollOptions};
use sapna_server::{build_router, overlay, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("sapna11 starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: api={}:{}, overlay port {}, refresh every {}s",
        config.server.bind, config.server.port, config.overlay.port, config.refresh.interval_secs
    );

    // 3. Open database
    let store = RoomStore::open(&config.database.path).context("failed to open database")?;
    info!("Database opened at {}", config.database.path);

    // 4. Feed client and pollers
    let client = FancrazeClient::from_config(&config.feed).context("failed to build feed client")?;
    info!("Match feed at {}", client.base_url());
    let feed: Arc<dyn MatchFeed> = Arc::new(client);
    let state = AppState::new(store, feed, PollOptions::from_config(&config.refresh));

    // 5. Spawn overlay WebSocket server
    let overlay_state = state.clone();
    let overlay_bind = config.server.bind.clone();
    let overlay_port = config.overlay.port;
    let overlay_handle = tokio::spawn(async move {
        match overlay::bind(&overlay_bind, overlay_port).await {
            Ok(listener) => {
                if let Err(e) = overlay::run(listener, overlay_state).await {
                    error!("Overlay server error: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to bind overlay server on port {}: {}", overlay_port, e);
            }
        }
    });

    // 6. Serve the HTTP API
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP API on {addr}"))?;
    info!("Application ready. HTTP API listening on http://{addr}");

    axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // 7. Cleanup
    state.pollers.stop_all().await;
    overlay_handle.abort();

    info!("sapna11 shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sapna=info,tower_http=info,warn")),
        )
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
