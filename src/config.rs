//! Runtime Configuration
//!
//! Environment-driven settings consumed by the daemon and the subsystems.
//! Every knob has a default that works for local development against the
//! in-memory store; production deployments override via environment.

use std::time::Duration;

/// Settings shared across the daemon and the task handlers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection URL for the key-value store (e.g. "redis://localhost:6379").
    /// When absent the daemon falls back to the in-memory backend.
    pub kv_url: Option<String>,
    /// Optional auth token appended to the KV connection.
    pub kv_token: Option<String>,
    /// Connection URL for the external document store.
    pub document_store_url: Option<String>,
    /// Bucket handle for the external blob store.
    pub blob_bucket: String,
    /// API key for the outbound mail transport.
    pub mail_api_key: Option<String>,
    /// Default from-address for outbound mail.
    pub default_from: String,
    /// Domain used when generating Message-ID headers.
    pub email_domain: String,

    /// Number of concurrent task workers.
    pub worker_count: usize,
    /// How long an idle worker sleeps between lease attempts.
    pub poll_interval: Duration,
    /// Age after which a `processing` entry is considered abandoned.
    pub lease_timeout: Duration,
    /// Default retry budget for enqueued tasks.
    pub default_max_attempts: u32,
    /// First retry delay; doubles per attempt under exponential backoff.
    pub retry_initial: Duration,
    /// Upper bound on any single retry delay.
    pub retry_cap: Duration,

    /// Ready + scheduled depth above which the monitor raises an alert.
    pub queue_depth_alert: usize,
    /// Largest accepted attachment, in bytes.
    pub attachment_size_limit: u64,
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            kv_url: std::env::var("KV_URL").ok(),
            kv_token: std::env::var("KV_TOKEN").ok(),
            document_store_url: std::env::var("DOCUMENT_STORE_URL").ok(),
            blob_bucket: std::env::var("BLOB_BUCKET").unwrap_or(defaults.blob_bucket),
            mail_api_key: std::env::var("MAIL_API_KEY").ok(),
            default_from: std::env::var("DEFAULT_FROM").unwrap_or(defaults.default_from),
            email_domain: std::env::var("EMAIL_DOMAIN").unwrap_or(defaults.email_domain),
            worker_count: env_parse("WORKER_COUNT", defaults.worker_count),
            poll_interval: Duration::from_millis(env_parse(
                "POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            lease_timeout: Duration::from_millis(env_parse(
                "LEASE_TIMEOUT_MS",
                defaults.lease_timeout.as_millis() as u64,
            )),
            default_max_attempts: env_parse("MAX_ATTEMPTS", defaults.default_max_attempts),
            retry_initial: Duration::from_millis(env_parse(
                "RETRY_INITIAL_MS",
                defaults.retry_initial.as_millis() as u64,
            )),
            retry_cap: Duration::from_millis(env_parse(
                "RETRY_CAP_MS",
                defaults.retry_cap.as_millis() as u64,
            )),
            queue_depth_alert: env_parse("QUEUE_DEPTH_ALERT", defaults.queue_depth_alert),
            attachment_size_limit: env_parse(
                "ATTACHMENT_SIZE_LIMIT",
                defaults.attachment_size_limit,
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kv_url: None,
            kv_token: None,
            document_store_url: None,
            blob_bucket: "mailroom-attachments".to_string(),
            mail_api_key: None,
            default_from: "noreply@mailroom.local".to_string(),
            email_domain: "mailroom.local".to_string(),
            worker_count: 4,
            poll_interval: Duration::from_secs(1),
            lease_timeout: Duration::from_secs(300),
            default_max_attempts: 3,
            retry_initial: Duration::from_secs(1),
            retry_cap: Duration::from_secs(30),
            queue_depth_alert: 1_000,
            attachment_size_limit: 25 * 1024 * 1024,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}
