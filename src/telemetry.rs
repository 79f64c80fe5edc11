// src/telemetry.rs
use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

use crate::config::{BotConfig, LogFormat};

pub const DEFAULT_FILTER: &str = "contest_notify_bot=info,warn";

/// Console logging plus an optional append-only log file.
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(cfg: &BotConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = match cfg.log_format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    let file = match &cfg.log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating log dir {}", dir.display()))?;
            }
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(f));
            Some(match cfg.log_format {
                LogFormat::Json => layer.json().boxed(),
                LogFormat::Compact => layer.boxed(),
            })
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}
