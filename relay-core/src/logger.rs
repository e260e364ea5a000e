//! Tracing setup for the relay bot: a coloured console layer and a plain-text file layer.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. The Matrix SDK logs every sync at info.
pub const DEFAULT_LOG_FILTER: &str = "info,matrix_sdk=warn,matrix_sdk_base=warn";

/// Installs the global subscriber. Events go to stdout and are appended to `log_file`, whose
/// parent directories are created when missing.
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`]; load `.env` before calling this.
pub fn init_tracing(log_file: &Path) -> anyhow::Result<()> {
    let file = open_log_file(log_file)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console = fmt::layer().with_target(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(())
}

fn open_log_file(path: &Path) -> anyhow::Result<File> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}
