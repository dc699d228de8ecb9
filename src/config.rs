//! Environment-variable driven configuration (§10.3), one struct per
//! subsystem, following the teacher's `HandlerConfig`/`Environment::from_env`
//! idiom: fatal-at-startup on missing required variables, no config-file
//! parser, no DI container.

use std::env;
use std::time::Duration;

fn env_var(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} must be set"))
}

fn env_var_opt(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
}

impl DbConfig {
    pub fn from_env() -> Self {
        DbConfig {
            database_url: env_var("DATABASE_URL"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub message_bus_port: u16,
    pub message_bus_fqdn: String,
    pub redis_url: String,
}

impl QueueConfig {
    pub fn from_env() -> Self {
        QueueConfig {
            message_bus_port: env_parse_or("MESSAGE_BUS_PORT", 4000),
            message_bus_fqdn: env_var_or("MESSAGE_BUS_FQDN", "localhost"),
            redis_url: env_var_or("REDIS_URL", "redis://127.0.0.1:6379"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProvider {
    Api,
    Smtp,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub primary: EmailProvider,
    pub fallback_enabled: bool,

    pub api_region: String,
    pub api_endpoint: String,
    pub api_from_address: String,
    pub api_reply_to: Option<String>,
    pub api_configuration_set: Option<String>,

    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_secure: bool,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from_address: String,
    pub return_path_domain: String,

    pub chaos_ses_429: bool,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let primary = match env_var_or("EMAIL_PROVIDER", "api").as_str() {
            "smtp" => EmailProvider::Smtp,
            _ => EmailProvider::Api,
        };

        ProviderConfig {
            primary,
            fallback_enabled: env_parse_or("EMAIL_PROVIDER_FALLBACK", false),

            api_region: env_var_or("API_PROVIDER_REGION", "us-east-1"),
            api_endpoint: env_var_or(
                "API_PROVIDER_ENDPOINT",
                "https://email.us-east-1.amazonaws.com/v2/email/outbound-emails",
            ),
            api_from_address: env_var_or("API_PROVIDER_FROM_ADDRESS", "no-reply@example.com"),
            api_reply_to: env_var_opt("API_PROVIDER_REPLY_TO"),
            api_configuration_set: env_var_opt("API_PROVIDER_CONFIGURATION_SET"),

            smtp_host: env_var_or("SMTP_PROVIDER_HOST", "localhost"),
            smtp_port: env_parse_or("SMTP_PROVIDER_PORT", 587),
            smtp_secure: env_parse_or("SMTP_PROVIDER_SECURE", false),
            smtp_username: env_var_opt("SMTP_PROVIDER_USER"),
            smtp_password: env_var_opt("SMTP_PROVIDER_PASS"),
            smtp_from_address: env_var_or("SMTP_PROVIDER_FROM_ADDRESS", "no-reply@example.com"),
            return_path_domain: env_var_or("SMTP_RETURN_PATH_DOMAIN", "bounces.example.com"),

            chaos_ses_429: cfg!(feature = "chaos") && env_parse_or("CHAOS_SES_429", false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delays: Vec<Duration>,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 6,
            base_delays: [5, 15, 60, 300, 900, 3600]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            jitter_fraction: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Base delay for a given 1-indexed attempt number, modulated by
    /// ±jitter_fraction (§4.H retry policy).
    pub fn delay_for_attempt(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.base_delays.len() - 1);
        let base = self.base_delays[idx].as_secs_f64();
        let jitter = 1.0 + (jitter_unit * 2.0 - 1.0) * self.jitter_fraction;
        Duration::from_secs_f64((base * jitter).max(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub in_flight_budget_per_second: u32,
    pub shutdown_drain_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let default_concurrency = std::thread::available_parallelism()
            .map(|n| (n.get() * 2).min(16))
            .unwrap_or(4);

        WorkerConfig {
            concurrency: env_parse_or("WORKER_CONCURRENCY", default_concurrency),
            in_flight_budget_per_second: env_parse_or("WORKER_IN_FLIGHT_BUDGET", 50),
            shutdown_drain_timeout: Duration::from_secs(env_parse_or(
                "WORKER_SHUTDOWN_DRAIN_SECS",
                30,
            )),
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SloConfig {
    pub error_rate_threshold: f64,
    pub queue_age_p95_threshold: Duration,
    pub evaluation_interval: Duration,
    pub recovery_streak_required: u32,
}

impl Default for SloConfig {
    fn default() -> Self {
        SloConfig {
            error_rate_threshold: 0.05,
            queue_age_p95_threshold: Duration::from_secs(120),
            evaluation_interval: Duration::from_secs(5 * 60),
            recovery_streak_required: 3,
        }
    }
}

impl SloConfig {
    pub fn from_env() -> Self {
        let mut config = SloConfig::default();
        config.error_rate_threshold = env_parse_or("SLO_ERROR_RATE_THRESHOLD", config.error_rate_threshold);
        config.queue_age_p95_threshold = Duration::from_secs(env_parse_or(
            "SLO_QUEUE_AGE_P95_SECS",
            config.queue_age_p95_threshold.as_secs(),
        ));
        config
    }
}

#[derive(Debug, Clone)]
pub struct WebhookWorkerConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub concurrency: usize,
    pub rate_per_second: u32,
}

impl Default for WebhookWorkerConfig {
    fn default() -> Self {
        WebhookWorkerConfig {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            concurrency: 10,
            rate_per_second: 100,
        }
    }
}

impl WebhookWorkerConfig {
    pub fn from_env() -> Self {
        let mut config = WebhookWorkerConfig::default();
        config.concurrency = env_parse_or("WEBHOOK_WORKER_CONCURRENCY", config.concurrency);
        config.max_attempts = env_parse_or("WEBHOOK_WORKER_MAX_ATTEMPTS", config.max_attempts);
        config.rate_per_second = env_parse_or("WEBHOOK_WORKER_RATE_PER_SECOND", config.rate_per_second);
        config
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackWorkerConfig {
    pub concurrency: usize,
}

impl Default for FeedbackWorkerConfig {
    fn default() -> Self {
        FeedbackWorkerConfig { concurrency: 10 }
    }
}

impl FeedbackWorkerConfig {
    pub fn from_env() -> Self {
        let mut config = FeedbackWorkerConfig::default();
        config.concurrency = env_parse_or("FEEDBACK_WORKER_CONCURRENCY", config.concurrency);
        config
    }
}
