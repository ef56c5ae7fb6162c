use crate::config::types::{
    Config, FetchConfig, OutputConfig, SelectorConfig, SourceConfig, WorkerConfig,
};
use crate::model::SOURCE_URL_KEY;
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_source_config(&config.source)?;
    validate_fetch_config(&config.fetch)?;
    validate_worker_config(&config.workers)?;
    validate_output_config(&config.output)?;
    validate_selector_config(&config.selectors)?;
    Ok(())
}

/// Validates the source section
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            config.base_url
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max_pages must be >= 1".to_string(),
        ));
    }

    match &config.page_template {
        Some(template) if !template.contains("{page}") => {
            return Err(ConfigError::Validation(format!(
                "page_template must contain a {{page}} placeholder, got '{}'",
                template
            )));
        }
        None if config.page_param.trim().is_empty() => {
            return Err(ConfigError::Validation(
                "page_param cannot be empty".to_string(),
            ));
        }
        _ => {}
    }

    Ok(())
}

/// Validates the fetch section
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker and queue sizing
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.discovery < 1 || config.discovery > 64 {
        return Err(ConfigError::Validation(format!(
            "workers.discovery must be between 1 and 64, got {}",
            config.discovery
        )));
    }

    if config.fanout < 1 {
        return Err(ConfigError::Validation(
            "workers.fanout must be >= 1".to_string(),
        ));
    }

    if config.work_queue_capacity < 1 || config.persist_queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue capacities must be >= 1".to_string(),
        ));
    }

    if config.politeness_min_ms > config.politeness_max_ms {
        return Err(ConfigError::Validation(format!(
            "politeness_min_ms ({}) must not exceed politeness_max_ms ({})",
            config.politeness_min_ms, config.politeness_max_ms
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.export_path.is_empty() {
        return Err(ConfigError::Validation(
            "export_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates that every selector compiles and field names are usable
fn validate_selector_config(config: &SelectorConfig) -> Result<(), ConfigError> {
    validate_selector("category", &config.category)?;
    validate_selector("subcategory", &config.subcategory)?;
    validate_selector("item", &config.item)?;

    if let Some(rows) = &config.table_rows {
        validate_selector("table_rows", rows)?;
    }

    let mut seen = HashSet::new();
    for field in &config.fields {
        if field.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "field name cannot be empty".to_string(),
            ));
        }

        if field.name == SOURCE_URL_KEY {
            return Err(ConfigError::Validation(format!(
                "field name '{}' is reserved",
                SOURCE_URL_KEY
            )));
        }

        if !seen.insert(field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate field name '{}'",
                field.name
            )));
        }

        validate_selector(&field.name, &field.selector)?;
    }

    Ok(())
}

fn validate_selector(name: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("{} '{}': {:?}", name, selector, e)))
}
