use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod block_processor;
mod checkpoint;
mod config;
mod database;
mod encoder;
mod error;
#[cfg(test)]
mod fixtures;
mod models;
mod processing;
mod rpc;

use checkpoint::Checkpoint;
use config::{Cli, Config, ConfigFile, Subcommand};
use database::PgStore;
use processing::Pipeline;
use rpc::{ChainSource, RpcClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    if cli.subcommand() == Subcommand::Init {
        println!("{}", toml::to_string(&ConfigFile::example())?);
        return Ok(());
    }

    let config = Config::load(cli, |key| std::env::var(key).ok())?;
    init_tracing(config.log_level());

    let pg_config = config
        .database_url()
        .parse::<tokio_postgres::Config>()
        .context("failed to parse the database url")?;
    info!("Connecting to the database...");
    let store = PgStore::connect(pg_config, config.pool_size(), config.statement_timeout()).await?;
    info!("Connected to the database.");

    if config.cli.subcommand() == Subcommand::Setup {
        info!("Setting up the database schema...");
        store.setup_database().await?;
        info!("Database schema setup complete.");
        return Ok(());
    }

    index(&config, store).await
}

async fn index(config: &Config, store: PgStore) -> anyhow::Result<()> {
    let chain = RpcClient::new(&config.rpc()?)?;
    match chain.get_chain_info().await {
        Ok(info) => {
            info!(
                chain = %info.chain,
                tip = info.tip_height,
                best_block_hash = %info.best_block_hash,
                "Connected to the node."
            );
            if info.initial_block_download {
                warn!(
                    "Node is still syncing ({:.2}% verified); indexing follows its current tip.",
                    info.sync_progress * 100.0
                );
            }
        }
        Err(e) => warn!("Node not reachable yet: {e}"),
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let mut pipeline = Pipeline::new(
        chain,
        store,
        Checkpoint::new(config.start_height()),
        config.poll_interval(),
        config.retry(),
    );
    if let Err(e) = pipeline.run(&shutdown).await {
        error!("Fatal: {e}");
        return Err(e.into());
    }
    info!("Indexer stopped.");
    Ok(())
}

async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c().await;

    info!("Shutdown signal received, finishing the current block.");
    shutdown.cancel();
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).init();
}
