//! Runs the reputation monitor (K) and sandbox monitor (L): both pure DB
//! sweeps with no in-process state, so they share a process separate from
//! the send worker, which the SLO controller (M) must instead live inside.

use sendgate::config::{DbConfig, QueueConfig};
use sendgate::{connect_db, connect_redis, init_tracing, run_periodic_monitors, shutdown_signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let pool = connect_db(&DbConfig::from_env()).await;
    let redis = connect_redis(&QueueConfig::from_env()).await;

    let shutdown = CancellationToken::new();
    run_periodic_monitors(pool, redis, shutdown.clone());

    shutdown_signal(shutdown.clone()).await;
    info!("received shutdown signal, stopping periodic monitors");
    shutdown.cancel();
}
