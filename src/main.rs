//! configsample
//!
//! Serves the live configuration of one scope over HTTP and logs every
//! reload of its `configs.json`.

use anyhow::Result;
use clap::Parser;
use config_manager::cli::Cli;
use config_manager::client::Client;
use config_manager::logging::{LogLevel, LogLevelFilter, Logger};
use config_manager::model::{FileStateManager, StateManager, StateManagerOptions};
use config_manager::server::{SampleServer, run_server};
use serde_json::json;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::sync::mpsc::sync_channel;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global subscriber selected by `--log`. `RUST_LOG` overrides
/// the level chosen by `--verbose`.
fn init_tracing(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
    };

    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let level_filter = Arc::new(LogLevelFilter::new(if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }));
    let logger = Logger::new()
        .with_level_filter(level_filter)
        .with_name("config_manager");

    // At most one pending notification; bursts of reloads coalesce.
    let (update_tx, update_rx) = sync_channel::<()>(1);
    let options = StateManagerOptions::default().with_update_channel(update_tx);

    info!("Loading scope '{}' from {}", cli.scope, cli.dir.display());
    let sm = {
        let dir = cli.dir.clone();
        let scope = cli.scope.clone();
        let logger = logger.clone();
        // Construction blocks until the first successful load.
        tokio::task::spawn_blocking(move || {
            FileStateManager::with_options(dir, &scope, options, logger)
        })
        .await??
    };
    let sm = Arc::new(sm);

    let notifier = {
        let logger = logger.scoped("updates");
        let sm = Arc::downgrade(&sm);
        tokio::task::spawn_blocking(move || {
            // Ends once the manager, and with it the sender, is dropped.
            while update_rx.recv().is_ok() {
                let generation = sm
                    .upgrade()
                    .and_then(|sm| sm.snapshot())
                    .map(|s| s.generation());
                logger.log_with_data(
                    LogLevel::Info,
                    "configuration updated",
                    json!({ "generation": generation }),
                );
            }
        })
    };

    let client = Arc::new(Client::from_state_manager(
        Arc::clone(&sm) as Arc<dyn StateManager>,
        logger.clone(),
    ));
    let state =
        SampleServer::new(Arc::clone(&client), &cli.scope).with_state_manager(Arc::clone(&sm));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let served = run_server(state, cli.listen_addr(), shutdown).await;

    client.close();
    drop(client);
    drop(sm);
    notifier.await?;

    served
}
