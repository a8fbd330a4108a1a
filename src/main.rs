// Rosterwatch entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Build the API client
// 4. Create the shared player store
// 5. Create mpsc channels
// 6. Spawn the app event loop (which spawns the initial bulk load)
// 7. Run the terminal view until the user quits
// 8. Cleanup on exit

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

use rosterwatch::api::ApiClient;
use rosterwatch::app;
use rosterwatch::config;
use rosterwatch::store::PlayerStore;
use rosterwatch::tui;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not the terminal the view uses)
    init_tracing()?;
    info!("rosterwatch starting up");

    // 2. Load config (missing file means defaults)
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "config loaded: api={}, pacing {:.1}s/{:.1}s, {} pages per games fetch",
        config.api.base_url,
        config.tracker.single_request_interval,
        config.tracker.group_request_interval,
        config.tracker.game_list_count
    );
    info!("player file: {}", config.players_path().display());

    // 3. Build the API client with its bounded per-request timeout
    let api = Arc::new(
        ApiClient::new(config.api.base_url.clone(), config.request_timeout())
            .context("failed to build HTTP client")?,
    );

    // 4. Shared player store; populated by the initial load task
    let store = Arc::new(Mutex::new(PlayerStore::new()));

    // 5. Channels: task events into the app loop, commands from the view,
    //    UI updates out to the view
    let (task_tx, task_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ui_tx, ui_rx) = mpsc::channel(256);

    let state = app::AppState::new(config, store, api, task_tx);

    // 6. Spawn the app event loop
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(task_rx, cmd_rx, ui_tx, state).await {
            error!("application loop error: {e}");
        }
    });

    // 7. Run the terminal view (blocks until the user quits)
    if let Err(e) = tui::run(ui_rx, cmd_tx).await {
        error!("view error: {e}");
    }

    // 8. Cleanup: wait for the app loop to finish (with timeout)
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;

    info!("rosterwatch shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (not the terminal, which is used by
/// the view).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("rosterwatch.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rosterwatch=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
