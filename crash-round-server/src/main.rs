//! Crash Round Server
//!
//! Runs the round loop and the WebSocket front end against an in-memory
//! ledger seeded with demo accounts.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crash_round::{
    fairness::simulate_rounds,
    ledger::{Account, MemoryStore},
    network::GameServer,
    Amount, CrashCurve, GameConfig, GameManager, VERSION,
};

/// Demo accounts: (user id, username, balance in units).
const DEMO_ACCOUNTS: [(&str, &str, i64); 3] = [
    ("user-1", "alice", 1_000),
    ("user-2", "bob", 1_000),
    ("user-3", "carol", 250),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GameConfig::from_env();
    config.validate().context("invalid configuration")?;

    info!("Crash Round Server v{}", VERSION);
    info!(
        "Tick: {:?}, betting window: {:?}, house edge: {} bps",
        config.tick_interval, config.betting_duration, config.house_edge_bps
    );

    // Sanity check the curve before taking money on it.
    let report = simulate_rounds(1_000, None, &CrashCurve::from(&config))?;
    info!(
        "Simulated {} rounds: average {:.2}x, median {}",
        report.num_rounds, report.statistics.average, report.statistics.median
    );

    let store = Arc::new(MemoryStore::with_accounts(
        DEMO_ACCOUNTS
            .iter()
            .map(|(id, name, units)| Account::new(*id, *name, Amount::from_units(*units))),
    ));

    let manager = Arc::new(GameManager::new(config.clone(), store));
    let rounds = manager.start();
    let server = Arc::new(GameServer::new(config, manager.clone()));

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Ctrl-C received, shutting down");
        }
        result = rounds => {
            warn!("Round loop exited unexpectedly: {:?}", result);
        }
    }

    server.shutdown();
    manager.shutdown();
    serving.await.context("server task panicked")??;

    info!("Bye");
    Ok(())
}
