//! Catalog Harvester: a concurrent catalog scraping pipeline
//!
//! This crate discovers catalog items on paginated web sources, enriches each
//! item from its detail page and persists the resulting records, either
//! through a single-process pipeline or by fanning the work out to isolated
//! worker processes.

pub mod config;
pub mod extract;
pub mod fanout;
pub mod fetch;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod storage;

use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue closed: {0}")]
    QueueClosed(&'static str),

    #[error("Worker {worker_id} failed: {message}")]
    Worker { worker_id: usize, message: String },

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{Record, WorkItem, UNAVAILABLE};
