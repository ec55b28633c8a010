//! deskrelay: multi-tenant support desk relay.
//!
//! Connects every provisioned tenant bot, routes inbound Telegram
//! updates through the conversation pipeline, and serves the agent
//! WebSocket gateway.
//!
//! Usage:
//!   deskrelay [--config deskrelay.toml] [--port 18790] [--seed seed.toml]
//!
//! Environment variables:
//!   DESKRELAY_GATEWAY_PORT     - Gateway listen port
//!   DESKRELAY_TELEGRAM_API_BASE - Bot API base URL
//!   DESKRELAY_SEED_FILE        - Store seed file

use anyhow::Result;
use clap::Parser;
use deskrelay::bot::registry::BotRegistry;
use deskrelay::config::Config;
use deskrelay::gateway::hub::AgentHub;
use deskrelay::gateway::server::{self, GatewayState};
use deskrelay::router::locks::KeyedLocks;
use deskrelay::router::UpdateRouter;
use deskrelay::store::memory::MemStore;
use deskrelay::store::Store;
use deskrelay::Args;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = if let Some(path) = &args.config {
        Config::load_from(path)?
    } else {
        Config::load()
    };
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    if let Some(seed) = &args.seed {
        config.seed_file = Some(seed.display().to_string());
    }

    eprintln!("deskrelay starting...");
    eprintln!("Gateway port: {}", config.gateway.port);

    let store = MemStore::new();
    if let Some(seed_path) = config.resolve_seed_file() {
        let tenants = store.load_seed(&seed_path)?;
        eprintln!(
            "[main] Seeded {} tenant(s) from {}",
            tenants,
            seed_path.display()
        );
    } else {
        eprintln!("[main] No seed file configured; starting empty");
    }
    let store: Arc<dyn Store> = store;

    let (update_tx, update_rx) = mpsc::channel(config.router.queue_depth);

    let registry = BotRegistry::new(&config.telegram, update_tx);
    registry.start_all(store.as_ref()).await?;

    let hub = AgentHub::new();
    let locks = Arc::new(KeyedLocks::new());

    let router = UpdateRouter::new(
        store.clone(),
        registry.clone(),
        hub.clone(),
        locks.clone(),
    );
    tokio::spawn(router.run(update_rx));

    let state = Arc::new(GatewayState {
        port: config.gateway.port,
        hub,
        store,
        transport: registry.clone(),
        locks,
    });

    let result = server::run(state).await;
    registry.shutdown();
    result
}
