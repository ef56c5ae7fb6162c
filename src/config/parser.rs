use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variable overriding `source.base-url`
pub const ENV_BASE_URL: &str = "HARVEST_BASE_URL";

/// Environment variable overriding `output.database-path`
pub const ENV_DATABASE_PATH: &str = "HARVEST_DATABASE_PATH";

/// Environment variable overriding `output.export-path`
pub const ENV_EXPORT_PATH: &str = "HARVEST_EXPORT_PATH";

/// Loads and parses a configuration file from the given path
///
/// Values from the process environment (see [`apply_env_overrides`]) are
/// applied before validation.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use catalog_harvester::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Harvesting from: {}", config.source.base_url);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let mut config: Config = toml::from_str(&content)?;

    apply_env_overrides(&mut config);

    validate(&config)?;

    Ok(config)
}

/// Applies overrides from the process environment
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Applies overrides using the given lookup function
///
/// Empty values are ignored.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(base_url) = lookup(ENV_BASE_URL) {
        tracing::debug!("Overriding base URL from {}", ENV_BASE_URL);
        config.source.base_url = base_url;
    }

    if let Some(database_path) = lookup(ENV_DATABASE_PATH) {
        tracing::debug!("Overriding database path from {}", ENV_DATABASE_PATH);
        config.output.database_path = database_path;
    }

    if let Some(export_path) = lookup(ENV_EXPORT_PATH) {
        tracing::debug!("Overriding export path from {}", ENV_EXPORT_PATH);
        config.output.export_path = export_path;
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Stored with every run so a database can be traced back to the
/// configuration that produced it.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Backoff;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL: &str = r#"
[source]
base-url = "https://shop.example.com/"

[output]
database-path = "./test.db"
export-path = "./records.json"
"#;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let file = create_temp_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.source.page_param, "page");
        assert_eq!(config.source.max_pages, 1000);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.fetch.retry_delay_secs, 5);
        assert_eq!(config.fetch.backoff, Backoff::Fixed);
        assert_eq!(config.workers.discovery, 3);
        assert_eq!(config.workers.work_queue_capacity, 256);
        assert!(!config.selectors.fields.is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
[source]
base-url = "https://shop.example.com/catalog/"
page-template = "page-{page}.html"
max-pages = 50

[fetch]
max-attempts = 5
retry-delay-secs = 2
backoff = "exponential"
timeout-secs = 10
user-agent = "TestHarvester/1.0"

[workers]
discovery = 2
detail = 8
fanout = 3
work-queue-capacity = 16
persist-queue-capacity = 32
politeness-min-ms = 10
politeness-max-ms = 50

[output]
database-path = "./test.db"
export-path = "./records.json"

[selectors]
category = "nav a.category"
subcategory = "ul.sub a"
item = "a.product"

[[selectors.field]]
name = "title"
selector = "h1"

[[selectors.field]]
name = "image"
selector = "img.main"
attr = "src"

[[selectors.field]]
name = "rating"
selector = "p.star-rating"
attr = "class"
strip = "star-rating"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.source.page_template.as_deref(), Some("page-{page}.html"));
        assert_eq!(config.source.max_pages, 50);
        assert_eq!(config.fetch.backoff, Backoff::Exponential);
        assert_eq!(config.workers.detail_workers(), 8);
        assert_eq!(config.selectors.fields.len(), 3);
        assert_eq!(config.selectors.fields[1].attr.as_deref(), Some("src"));
        assert!(config.selectors.fields[1].strip.is_none());
        assert_eq!(config.selectors.fields[2].strip.as_deref(), Some("star-rating"));
        assert!(config.selectors.table_rows.is_none());
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/harvest.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[source]
base-url = "https://shop.example.com/"

[fetch]
max-attempts = 0

[output]
database-path = "./test.db"
export-path = "./records.json"
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_overrides_replace_values() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_BASE_URL, "https://other.example.com/"),
            (ENV_DATABASE_PATH, "/tmp/other.db"),
            (ENV_EXPORT_PATH, "   "),
        ]);

        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.source.base_url, "https://other.example.com/");
        assert_eq!(config.output.database_path, "/tmp/other.db");
        // Blank values are ignored
        assert_eq!(config.output.export_path, "./records.json");
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
