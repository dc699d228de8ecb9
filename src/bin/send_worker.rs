use sendgate::config::{DbConfig, ProviderConfig, QueueConfig, WorkerConfig};
use sendgate::metrics::Metrics;
use sendgate::{
    connect_db, connect_redis, init_tracing, install_crypto_provider, run_send_worker,
    run_slo_controller, shutdown_signal,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    install_crypto_provider();

    let pool = connect_db(&DbConfig::from_env()).await;
    let redis = connect_redis(&QueueConfig::from_env()).await;
    let provider_config = ProviderConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    let drain_timeout = worker_config.shutdown_drain_timeout;
    let metrics = Metrics::default();

    let shutdown = CancellationToken::new();

    // The SLO controller (M) mutates the same `ConcurrencyHandle` the send
    // worker (H) exposes, so both live in this process, sharing one
    // `Metrics` instance.
    let concurrency = run_send_worker(
        pool,
        redis,
        provider_config,
        worker_config,
        metrics.clone(),
        shutdown.clone(),
    )
    .await;
    run_slo_controller(concurrency, metrics, shutdown.clone());

    shutdown_signal(shutdown.clone()).await;
    info!("received shutdown signal, stopping send worker");
    shutdown.cancel();

    tokio::time::sleep(drain_timeout).await;
}
