//! lspwire - Content-Length framed JSON-RPC server
//!
//! Serves the LSP lifecycle over stdin/stdout.

use std::fs::OpenOptions;
use std::path::Path;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lspwire::app::App;
use lspwire::cli::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("Failed to open log file: {}", e);
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async_main(cli));
    // a read blocked on stdin must not hold the process open
    runtime.shutdown_background();

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("lspwire: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the transport loop ended cleanly.
async fn async_main(cli: Cli) -> anyhow::Result<bool> {
    let app = App::new(cli.config.as_deref(), cli.log_wire)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize: {}", e))?;

    tracing::info!("lspwire {} started", env!("CARGO_PKG_VERSION"));

    let reason = app.run_stdio().await?;
    Ok(reason.is_clean())
}

// stdout is the protocol channel, so logs go to stderr or a file
fn init_tracing(log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lspwire=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false)
                        .compact(),
                )
                .init();
        }
        None => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .compact(),
                )
                .init();
        }
    }
    Ok(())
}
