//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, with environment overrides for the values that usually differ
//! between deployments.
//!
//! # Example
//!
//! ```no_run
//! use catalog_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Detail workers: {}", config.workers.detail_workers());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, FetchConfig, FieldConfig, OutputConfig, SelectorConfig, SourceConfig, WorkerConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, apply_overrides, compute_config_hash, load_config, load_config_with_hash,
    ENV_BASE_URL, ENV_DATABASE_PATH, ENV_EXPORT_PATH,
};
pub use validation::validate;
