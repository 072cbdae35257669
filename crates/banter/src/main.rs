//! HTTP server binary for the Banter chat backend.

use anyhow::Context;
use banter_config::BanterConfig;
use banter_core::{
    ChatService, Dispatcher, EchoAgent, HistoryStore, JsonlHistoryStore, MemoryHistoryStore,
};
use banter_store::{ConversationLog, JsonlConversationLog, MemoryStore};
use clap::Parser;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command-line options for the Banter server.
#[derive(Parser)]
#[command(name = "banter", version)]
struct Cli {
    /// Optional path to a banter.json5 config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bind host override
    #[arg(long)]
    host: Option<String>,
    /// Bind port override
    #[arg(long)]
    port: Option<u16>,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();
    info!(
        "starting banter (config_set={}, host_set={}, port_set={})",
        cli.config.is_some(),
        cli.host.is_some(),
        cli.port.is_some()
    );
    let mut config = if let Some(path) = cli.config.as_ref() {
        info!("loading config from path: {}", path.display());
        BanterConfig::load_from_path(path).context("failed to load config")?
    } else {
        BanterConfig::default()
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let relay = Arc::new(MemoryStore::new(config.relay.chunk_ttl()));
    let (log, history): (Arc<dyn ConversationLog>, Arc<dyn HistoryStore>) =
        match config.store.path.as_deref() {
            Some(dir) => {
                info!("opening jsonl stores (dir={dir})");
                let dir = PathBuf::from(dir);
                let log = JsonlConversationLog::open(dir.join("queue.jsonl"))
                    .context("failed to open conversation log")?;
                let history = JsonlHistoryStore::open(dir.join("history.jsonl"))
                    .context("failed to open history store")?;
                (Arc::new(log), Arc::new(history))
            }
            None => (relay.clone(), Arc::new(MemoryHistoryStore::new())),
        };

    let service = ChatService::new(log.clone(), relay.clone(), history.clone());
    let dispatcher =
        Dispatcher::new(log, relay.clone(), history, Arc::new(EchoAgent), &config).start();
    let sweeper = tokio::spawn({
        let relay = relay.clone();
        async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = relay.sweep();
                if removed > 0 {
                    debug!("swept expired jobs (count={removed})");
                }
            }
        }
    });

    banter_server::serve(&config.server.bind_addr(), service, shutdown_signal()).await?;

    sweeper.abort();
    dispatcher.shutdown().await;
    info!("banter stopped");
    Ok(())
}

/// Resolves when the process receives ctrl-c.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
}
