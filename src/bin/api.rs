//! HTTP entrypoint for the admin DLQ facade (§4.N). The only HTTP surface
//! this core owns — tenant-facing ingress/auth is an external collaborator
//! (§1, §6).

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use sendgate::config::{DbConfig, QueueConfig};
use sendgate::{admin_router, connect_db, connect_redis, init_tracing, shutdown_signal, SendQueueImpl};
use sendgate::queue::Channel;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pool = connect_db(&DbConfig::from_env()).await;

    #[cfg(feature = "apply-db-migrations")]
    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis = connect_redis(&QueueConfig::from_env()).await;
    let send_queue = Arc::new(SendQueueImpl::new(redis, Channel::SendJobs));

    let router = admin_router(pool, send_queue);

    let port: u16 = std::env::var("ADMIN_PORT")
        .unwrap_or("4100".to_owned())
        .parse()
        .expect("ADMIN_PORT must be a u16");
    let socket = SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), port);
    let listener = tokio::net::TcpListener::bind(socket).await?;
    info!("admin api serving on port {}", socket.port());

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone.clone()).await;
        info!("received shutdown signal, stopping admin api");
        shutdown_clone.cancel();
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
