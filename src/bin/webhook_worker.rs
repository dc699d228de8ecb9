use sendgate::config::{DbConfig, WebhookWorkerConfig};
use sendgate::{connect_db, init_tracing, install_crypto_provider, run_webhook_worker, shutdown_signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    install_crypto_provider();

    let pool = connect_db(&DbConfig::from_env()).await;
    let config = WebhookWorkerConfig::from_env();

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    let worker = tokio::spawn(run_webhook_worker(pool, config, shutdown_clone));

    shutdown_signal(shutdown.clone()).await;
    info!("received shutdown signal, stopping webhook worker");
    shutdown.cancel();

    tokio::select! {
        _ = worker => info!("webhook worker shut down"),
        _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
            tracing::warn!("webhook worker drain took too long, hard shutdown");
        }
    }
}
