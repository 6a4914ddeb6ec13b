use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use saltychat_core::SystemClock;
use saltychat_server::network;
use saltychat_server::{logging, storage, App, AppConfig};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = AppConfig::parse();
    if let Err(e) = logging::init(&config.log_config()) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "server error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    let store = storage::open(&config).await?;

    let bus_config = config.bus_config();
    if bus_config.is_memory() {
        warn!("serving on the in-process bus; no external client can reach it");
    }
    let transport = network::connect(&bus_config).await?;

    let app = App::new(&config, store, Arc::new(SystemClock), transport)?;
    info!(
        service = %config.service_name,
        environment = %config.environment,
        store = ?config.store,
        "starting application"
    );
    app.run(shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
