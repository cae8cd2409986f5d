use std::path::PathBuf;
use std::time::Duration;

/// default auto-transfer window for an unanswered host request
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 30;

/// application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// directory uploads are stored in and served from under /files
    pub files_dir: PathBuf,
    /// directory the web client is served from
    pub static_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// maximum upload size in bytes
    pub max_upload_size: usize,
    /// number of tokio worker threads
    pub worker_threads: usize,
    /// cors allowed origins (comma-separated, `*` for any)
    pub cors_origins: Vec<String>,
    /// upload rate limit: replenished requests per second per client ip
    pub rate_limit_per_second: u64,
    /// upload rate limit: burst size
    ///
    /// A host sends one request per product part back to back, so this caps
    /// how many parts a product can have before uploads start getting 429s.
    pub rate_limit_burst: u32,
    /// how long a host has to answer a transfer request before it happens anyway
    pub transfer_timeout: Duration,
    /// frames buffered per connection before a slow client is dropped
    pub client_queue_depth: usize,
}

impl Config {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        // parse cors origins
        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let transfer_timeout_secs = env_parse("HOST_TRANSFER_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TRANSFER_TIMEOUT_SECS);

        Self {
            files_dir: std::env::var("FILES_DIR")
                .unwrap_or_else(|_| "./files".to_string())
                .into(),
            static_dir: std::env::var("STATIC_DIR")
                .unwrap_or_else(|_| "./public".to_string())
                .into(),
            host: std::env::var("HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("PORT").unwrap_or(3000),
            max_upload_size: env_parse("MAX_UPLOAD_SIZE").unwrap_or(512 * 1024 * 1024), // 512MB default
            worker_threads: env_parse("WORKER_THREADS").unwrap_or(4),
            cors_origins,
            rate_limit_per_second: env_parse("RATE_LIMIT_PER_SECOND").unwrap_or(10),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST").unwrap_or(64),
            transfer_timeout: Duration::from_secs(transfer_timeout_secs),
            client_queue_depth: env_parse("CLIENT_QUEUE_DEPTH").unwrap_or(256),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("⚠️  Ignoring unparseable {}={:?}, using default", key, raw);
            None
        }
    }
}
