//! contest-notify-bot binary entrypoint.
//! Loads configuration, initializes logging/metrics, and runs the poll loop
//! until Ctrl-C or SIGTERM.

use anyhow::Result;
use contest_notify_bot::{build_scheduler, metrics, telemetry, BotConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();

    let cfg = BotConfig::load()?;
    telemetry::init_tracing(&cfg)?;

    if let Some(addr) = cfg.metrics_addr {
        metrics::install_prometheus(addr)?;
    }

    let scheduler = build_scheduler(&cfg)?;
    tracing::info!(
        interval_secs = cfg.poll_interval_secs,
        snapshot = %cfg.snapshot_path.display(),
        "competition notification bot started"
    );

    tokio::select! {
        _ = scheduler.run() => {}
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
