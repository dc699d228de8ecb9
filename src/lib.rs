use std::env;
use std::sync::Arc;

use derive_more::FromStr;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod admin;
pub mod bus;
pub mod config;
pub mod errors;
pub mod feedback;
pub mod ippool;
pub mod metrics;
pub mod models;
pub mod periodically;
pub mod provider;
pub mod queue;
pub mod ratelimit;
pub mod reputation;
pub mod sandbox;
pub mod slo;
pub mod validation;
pub mod worker;

use crate::config::{DbConfig, ProviderConfig, QueueConfig, WebhookWorkerConfig, WorkerConfig};
use crate::models::{
    DeadLetterRepository, DomainRepository, EmailEventRepository, EmailLogRepository,
    EmailTrackingRepository, IpPoolRepository, OutboxRepository, RecipientRepository,
    ReputationMetricRepository, SuppressionRepository, TenantRepository, WebhookDeliveryRepository,
    WebhookRepository,
};
use crate::provider::api_driver::{ApiDriver, ApiDriverConfig};
use crate::provider::smtp_driver::{SmtpDriver, SmtpDriverConfig};
use crate::provider::{BreakerDriver, CircuitBreaker, DriverSet};
use crate::queue::{Channel, FeedbackEventJob, RedisQueue, SendJob};
use crate::ratelimit::{MxRateLimiter, RedisRateLimitStore};
use crate::reputation::ReputationMonitor;
use crate::sandbox::SandboxMonitor;
use crate::slo::SloController;
use crate::worker::feedback::FeedbackWorker;
use crate::worker::send::SendWorker;
use crate::worker::webhook::WebhookWorker;

/// The concrete queue and rate-limit store this binary ships with. The
/// `Queue`/`RateLimitStore` traits stay generic so tests can swap in
/// in-memory fakes without touching worker code (§1, §6: broker and store
/// are both external collaborators, specified only through the operations
/// the core performs on them).
pub type Store = RedisRateLimitStore;
pub type SendQueueImpl = RedisQueue<SendJob>;
pub type FeedbackQueueImpl = RedisQueue<FeedbackEventJob>;

#[derive(Debug, Default, Clone, Copy, FromStr, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub enum Environment {
    Staging,
    Production,
    #[default]
    Development,
}

impl Environment {
    pub fn from_env() -> Self {
        env::var("ENVIRONMENT")
            .map(|s| s.parse())
            .inspect_err(|_| warn!("Did not find ENVIRONMENT env var, defaulting to development"))
            .unwrap_or(Ok(Environment::Development))
            .expect(
                "Invalid ENVIRONMENT env var, must be one of: development, production, or staging",
            )
    }
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "{}=trace,tower_http=debug,axum=trace,info",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Installs `aws-lc-rs` as the process-wide default rustls crypto provider.
/// Needed once, before any TLS connection is opened (SMTP driver, API
/// driver's `reqwest` client, webhook delivery's `reqwest` client).
pub fn install_crypto_provider() {
    use tokio_rustls::rustls::crypto::{CryptoProvider, aws_lc_rs};
    if CryptoProvider::get_default().is_none() {
        CryptoProvider::install_default(aws_lc_rs::default_provider())
            .expect("failed to install crypto provider");
    }
}

pub async fn connect_db(config: &DbConfig) -> PgPool {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database")
}

pub async fn connect_redis(config: &QueueConfig) -> deadpool_redis::Pool {
    deadpool_redis::Config::from_url(&config.redis_url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("failed to build redis connection pool")
}

/// Builds the fallback-ordered driver chain (§4.D): the configured primary
/// driver, circuit-breaker-wrapped, optionally followed by the other driver
/// when `EMAIL_PROVIDER_FALLBACK` is set.
pub fn build_driver_set(
    config: &ProviderConfig,
    http: reqwest::Client,
    tenants: TenantRepository,
    domains: DomainRepository,
) -> Arc<DriverSet> {
    let api_driver = || {
        ApiDriver::new(
            ApiDriverConfig {
                region: config.api_region.clone(),
                endpoint: config.api_endpoint.clone(),
                from_address: config.api_from_address.clone(),
                from_name: None,
                reply_to: config.api_reply_to.clone(),
                configuration_set: config.api_configuration_set.clone(),
                chaos_ses_429: config.chaos_ses_429,
            },
            http.clone(),
            tenants.clone(),
            domains.clone(),
        )
    };
    let smtp_driver = || {
        SmtpDriver::new(SmtpDriverConfig {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            secure: config.smtp_secure,
            username: config.smtp_username.clone(),
            password: config.smtp_password.clone(),
            from_address: config.smtp_from_address.clone(),
            return_path_domain: config.return_path_domain.clone(),
        })
    };

    let mut drivers = Vec::new();
    match config.primary {
        crate::config::EmailProvider::Api => {
            drivers.push(BreakerDriver::new(Arc::new(api_driver()), CircuitBreaker::new()));
            if config.fallback_enabled {
                drivers.push(BreakerDriver::new(Arc::new(smtp_driver()), CircuitBreaker::new()));
            }
        }
        crate::config::EmailProvider::Smtp => {
            drivers.push(BreakerDriver::new(Arc::new(smtp_driver()), CircuitBreaker::new()));
            if config.fallback_enabled {
                drivers.push(BreakerDriver::new(Arc::new(api_driver()), CircuitBreaker::new()));
            }
        }
    }

    Arc::new(DriverSet::new(drivers))
}

/// Assembles and spawns the send pipeline worker (component H). Returns the
/// `ConcurrencyHandle` the SLO controller (M) needs to mutate at runtime.
pub async fn run_send_worker(
    pool: PgPool,
    redis: deadpool_redis::Pool,
    provider_config: ProviderConfig,
    worker_config: WorkerConfig,
    metrics: metrics::Metrics,
    shutdown: CancellationToken,
) -> worker::send::ConcurrencyHandle {
    let queue = Arc::new(RedisQueue::<SendJob>::new(redis.clone(), Channel::SendJobs));
    let tenants = TenantRepository::new(pool.clone());
    let domains = DomainRepository::new(pool.clone());
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build http client");

    let rate_limiter = Arc::new(MxRateLimiter::new(
        Arc::new(RedisRateLimitStore::new(redis.clone())),
        std::collections::HashMap::new(),
    ));
    let warmup_store = Arc::new(RedisRateLimitStore::new(redis));
    let pool_selector = ippool::IpPoolSelector::new(IpPoolRepository::new(pool.clone()));
    let validation = validation::ValidationStage::new(
        OutboxRepository::new(pool.clone()),
        RecipientRepository::new(pool.clone()),
    );
    let worker_tenants = tenants.clone();
    let drivers = build_driver_set(&provider_config, http, tenants, domains);

    let worker = Arc::new(SendWorker::new(
        queue,
        OutboxRepository::new(pool.clone()),
        EmailLogRepository::new(pool.clone()),
        EmailEventRepository::new(pool.clone()),
        SuppressionRepository::new(pool.clone()),
        worker_tenants,
        DeadLetterRepository::new(pool),
        rate_limiter,
        warmup_store,
        pool_selector,
        validation,
        drivers,
        metrics,
        worker_config.clone(),
        shutdown,
    ));

    let handle = worker.concurrency_handle(worker_config.concurrency);
    tokio::spawn(worker.run());
    handle
}

pub async fn run_webhook_worker(
    pool: PgPool,
    config: WebhookWorkerConfig,
    shutdown: CancellationToken,
) {
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build http client");
    let worker = Arc::new(WebhookWorker::new(
        http,
        WebhookRepository::new(pool.clone()),
        WebhookDeliveryRepository::new(pool),
        config,
        shutdown,
    ));
    worker.run().await;
}

pub async fn run_feedback_worker(
    pool: PgPool,
    redis: deadpool_redis::Pool,
    config: config::FeedbackWorkerConfig,
    shutdown: CancellationToken,
) {
    let queue = Arc::new(RedisQueue::<FeedbackEventJob>::new(redis, Channel::FeedbackEvents));
    let worker = Arc::new(FeedbackWorker::new(
        queue,
        EmailLogRepository::new(pool.clone()),
        EmailEventRepository::new(pool.clone()),
        SuppressionRepository::new(pool.clone()),
        EmailTrackingRepository::new(pool.clone()),
        WebhookRepository::new(pool.clone()),
        WebhookDeliveryRepository::new(pool),
        config,
        shutdown,
    ));
    worker.run().await;
}

/// Wires and spawns the standalone periodic monitors (K, L) — run from
/// `bin/periodic.rs`, a process of its own since neither needs anything a
/// live worker process holds.
pub fn run_periodic_monitors(pool: PgPool, redis: deadpool_redis::Pool, shutdown: CancellationToken) {
    let warmup_store = Arc::new(RedisRateLimitStore::new(redis));
    let reputation = ReputationMonitor::new(
        TenantRepository::new(pool.clone()),
        DomainRepository::new(pool.clone()),
        EmailLogRepository::new(pool.clone()),
        ReputationMetricRepository::new(pool.clone()),
        SuppressionRepository::new(pool.clone()),
        warmup_store,
    );
    let sandbox = SandboxMonitor::new(TenantRepository::new(pool));

    let monitors = periodically::PeriodicMonitors::new(reputation, sandbox);
    monitors.spawn(shutdown);
}

/// Spawns the SLO controller (M) in-process with the send worker it
/// mutates via `send_concurrency`; called from `bin/send_worker.rs` right
/// after `run_send_worker`, not from the `periodic` binary.
pub fn run_slo_controller(
    send_concurrency: worker::send::ConcurrencyHandle,
    metrics: metrics::Metrics,
    shutdown: CancellationToken,
) {
    let slo = SloController::new(metrics, send_concurrency);
    periodically::spawn_slo_controller(slo, shutdown);
}

pub fn admin_router(pool: PgPool, send_queue: Arc<SendQueueImpl>) -> axum::Router {
    admin::router(admin::AdminState {
        dead_letter: DeadLetterRepository::new(pool),
        send_queue,
    })
}

pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = token.cancelled() => {},
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
