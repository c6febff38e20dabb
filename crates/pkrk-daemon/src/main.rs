mod core;
mod http;
mod mpv;

use std::sync::Arc;

use pkrk_proto::catalog::CatalogClient;
use pkrk_proto::cdn::PathEncoder;
use pkrk_proto::config::Config;
use pkrk_proto::store::CatalogStore;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|a| a == "--use-system-deps") {
        pkrk_proto::platform::set_use_system_deps(true);
    }

    let config = Config::load()?;

    // File logging; stdout belongs to whoever launched us.
    if let Some(dir) = config.daemon.log_file.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.daemon.log_file)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,pkrk_daemon=debug,pkrk_proto=debug,hyper=warn,reqwest=warn",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", config.daemon.log_file);
    info!("Config loaded from: {:?}", Config::config_path());

    let encoder = PathEncoder::new(config.cdn.origin.clone());
    let client = CatalogClient::new(&config.catalog)?;
    info!("Catalog service at {}", client.base_url());
    let store = Arc::new(CatalogStore::new(client));

    // The category list is fetched once at startup; failures land on the
    // built-in catalog.
    let warmup = Arc::clone(&store);
    tokio::spawn(async move {
        let view = warmup.categories().await;
        info!(
            "Categories ready: {} entries ({:?})",
            view.categories.len(),
            view.outcome
        );
    });

    // Event channel — all playback inputs funnel into PlayerCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::CoreEvent>(256);
    let player_core = core::PlayerCore::new(config.playback.clone(), encoder.clone(), event_tx.clone());

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState {
                store: Arc::clone(&store),
                player: player_core.handle(),
                encoder,
            },
        );
    } else {
        warn!("HTTP API disabled; nothing can drive playback");
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(core::CoreEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    player_core.run(event_rx).await?;

    Ok(())
}
