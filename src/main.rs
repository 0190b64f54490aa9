use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod blog;
mod cli;
mod config;
mod pagination;
mod query;
mod storage;
mod tui;
mod utils;

use cli::Cli;

#[tokio::main]
async fn main() {
    // Set up panic hook for graceful error recovery. Panics off the main
    // thread are only logged; they unwind into the task that raised them.
    std::panic::set_hook(Box::new(|panic_info| {
        if std::thread::current().name() != Some("main") {
            error!("Task panicked: {}", panic_info);
            return;
        }
        tui::restore_terminal_on_panic();
        error!("Application panicked: {}", panic_info);
        eprintln!("folio panicked: {}", panic_info);
        std::process::exit(1);
    }));

    // Load environment variables from .env file; a missing file is fine
    let _ = dotenvy::dotenv();

    if let Err(e) = Cli::parse().execute().await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Install the global subscriber. `log_file` redirects output away from the
/// terminal while the TUI owns it.
pub(crate) fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let default_filter = if debug { "folio=debug" } else { "folio=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
        }
        None => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}
