use clap::Parser;
use rbd_backup_server::config::AppConfig;
use rbd_backup_server::services::cluster::RbdCli;
use rbd_backup_server::services::runner::OperationRunner;
use rbd_backup_server::state::AppState;
use rbd_backup_server::{routes, store, utils};
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Job store: redis://host:port/db or a SQLite file (overrides STORE_URL)
    #[arg(short, long)]
    store_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.store_url {
        config.store_url = url;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    utils::logger::init(&config.log_level)?;
    tracing::info!("Starting rbd-backup-server v{}", env!("CARGO_PKG_VERSION"));

    if config.uses_sqlite() {
        std::fs::create_dir_all(&config.data_dir)?;
    }
    let kv = store::open(&config.store_url).await?;

    let runner = OperationRunner::new(config.runner_config());
    let cluster = Arc::new(RbdCli::new(config.rbd_bin.clone(), config.rados_bin.clone()));
    let state = Arc::new(AppState::new(config.clone(), kv, runner, cluster));

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    state.jobs.shutdown().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
