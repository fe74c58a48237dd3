use clap::{Parser, ValueEnum};
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tinylink_storage::PurgeConfig;

pub const SERVER_ADDRESS_ENV: &str = "SERVER_ADDRESS";
pub const BASE_URL_ENV: &str = "BASE_URL";
pub const FILE_STORAGE_PATH_ENV: &str = "FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "DATABASE_DSN";
pub const SECRET_KEY_ENV: &str = "SECRET_KEY";
pub const PURGE_BATCH_SIZE_ENV: &str = "PURGE_BATCH_SIZE";
pub const PURGE_INTERVAL_SECS_ENV: &str = "PURGE_INTERVAL_SECS";
pub const PURGE_QUEUE_CAPACITY_ENV: &str = "PURGE_QUEUE_CAPACITY";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// The storage backend picked from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    File(PathBuf),
    Postgres(String),
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::InMemory => write!(f, "in-memory"),
            StorageBackend::File(path) => write!(f, "file ({})", path.display()),
            // the DSN may carry credentials
            StorageBackend::Postgres(_) => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "tinylink", about = "URL shortener with per-user links")]
pub struct Cli {
    #[arg(short = 'a', long, env = SERVER_ADDRESS_ENV, default_value = DEFAULT_SERVER_ADDRESS)]
    pub server_address: SocketAddr,

    /// Prefix of the short URLs handed out to clients.
    #[arg(short = 'b', long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Journal file for the file backend.
    #[arg(short = 'f', long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    /// PostgreSQL connection string; takes precedence over the file backend.
    #[arg(short = 'd', long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    /// Key signing the user cookie. A random key is used when unset, which
    /// invalidates all cookies on restart.
    #[arg(short = 'k', long, env = SECRET_KEY_ENV, hide_env_values = true)]
    pub secret_key: Option<String>,

    #[arg(long, env = PURGE_BATCH_SIZE_ENV, default_value_t = 10)]
    pub purge_batch_size: usize,

    #[arg(long, env = PURGE_INTERVAL_SECS_ENV, default_value_t = 10)]
    pub purge_interval_secs: u64,

    #[arg(long, env = PURGE_QUEUE_CAPACITY_ENV, default_value_t = 1024)]
    pub purge_queue_capacity: usize,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Database beats file, file beats memory.
    pub fn storage_backend(&self) -> StorageBackend {
        match (&self.database_dsn, &self.file_storage_path) {
            (Some(dsn), _) if !dsn.is_empty() => StorageBackend::Postgres(dsn.clone()),
            (_, Some(path)) if !path.as_os_str().is_empty() => StorageBackend::File(path.clone()),
            _ => StorageBackend::InMemory,
        }
    }

    pub fn purge_config(&self) -> PurgeConfig {
        PurgeConfig::builder()
            .batch_capacity(self.purge_batch_size)
            .flush_interval(Duration::from_secs(self.purge_interval_secs))
            .queue_capacity(self.purge_queue_capacity)
            .build()
    }
}
