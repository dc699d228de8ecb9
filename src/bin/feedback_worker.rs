use sendgate::config::{DbConfig, FeedbackWorkerConfig, QueueConfig};
use sendgate::{connect_db, connect_redis, init_tracing, run_feedback_worker, shutdown_signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let pool = connect_db(&DbConfig::from_env()).await;
    let redis = connect_redis(&QueueConfig::from_env()).await;
    let config = FeedbackWorkerConfig::from_env();

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    let worker = tokio::spawn(run_feedback_worker(pool, redis, config, shutdown_clone));

    shutdown_signal(shutdown.clone()).await;
    info!("received shutdown signal, stopping feedback worker");
    shutdown.cancel();

    tokio::select! {
        _ = worker => info!("feedback worker shut down"),
        _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
            tracing::warn!("feedback worker drain took too long, hard shutdown");
        }
    }
}
