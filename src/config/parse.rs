use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use regex::Regex;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string)
}

/// Parse and validate config from a YAML string
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let unexpanded = unexpanded_env_vars(yaml_string);
    if unexpanded.is_empty() {
        return Ok(());
    }

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded.join(", ")
    )))
}

fn expand_paths(config: &mut Config) {
    for source in config.sources.values_mut() {
        if let Some(path) = &source.path {
            source.path = Some(expand_tilde(path));
        }
    }
    config.buffer.overflow_dir = expand_tilde(&config.buffer.overflow_dir);
    config.checkpoint.dir = expand_tilde(&config.checkpoint.dir);
    config.dead_letter.path = expand_tilde(&config.dead_letter.path);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.sources.is_empty() {
        errors.push("config must define at least one source".to_string());
    }

    let mut source_names: Vec<&String> = config.sources.keys().collect();
    source_names.sort();
    for name in source_names {
        validate_source(name, &config.sources[name], &mut errors);
    }

    validate_buffer(&config.buffer, &mut errors);
    validate_shipper(&config.shipper, &mut errors);

    if let Some(status) = &config.status {
        if status.listen.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "status.listen: '{}' is not a valid socket address",
                status.listen
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_source(name: &str, source: &SourceConfig, errors: &mut Vec<String>) {
    let prefix = format!("source '{}'", name);

    if name.is_empty() {
        errors.push("source names cannot be empty".to_string());
    }

    match source.source_type {
        SourceType::File => {
            if source.path.is_none() {
                errors.push(format!("{}: file sources require 'path'", prefix));
            }
        }
        SourceType::Socket => match &source.listen {
            Some(listen) => {
                if listen.parse::<std::net::SocketAddr>().is_err() {
                    errors.push(format!(
                        "{}: '{}' is not a valid listen address",
                        prefix, listen
                    ));
                }
            }
            None => errors.push(format!("{}: socket sources require 'listen'", prefix)),
        },
    }

    if let Some(timestamp) = &source.timestamp {
        validate_named_group(&prefix, "timestamp pattern", &timestamp.pattern, "ts", errors);
    }
    if let Some(level_pattern) = &source.level_pattern {
        validate_named_group(&prefix, "level pattern", level_pattern, "level", errors);
    }

    if source.read.max_line_bytes == 0 {
        errors.push(format!("{}: read.max_line_bytes must be positive", prefix));
    }
    validate_retry(&format!("{}: read.retry", prefix), &source.read.retry, errors);
}

fn validate_named_group(
    prefix: &str,
    what: &str,
    pattern: &str,
    group: &str,
    errors: &mut Vec<String>,
) {
    match Regex::new(pattern) {
        Ok(re) => {
            if re.capture_names().all(|name| name != Some(group)) {
                errors.push(format!(
                    "{}: {} must contain named capture group '{}': {}",
                    prefix, what, group, pattern
                ));
            }
        }
        Err(e) => {
            errors.push(format!(
                "{}: invalid {} regex: {} (error: {})",
                prefix, what, pattern, e
            ));
        }
    }
}

fn validate_buffer(buffer: &BufferConfig, errors: &mut Vec<String>) {
    if buffer.capacity == 0 {
        errors.push("buffer.capacity must be positive".to_string());
    }
    if buffer.low_watermark >= buffer.high_watermark {
        errors.push(format!(
            "buffer.low_watermark ({}) must be below buffer.high_watermark ({})",
            buffer.low_watermark, buffer.high_watermark
        ));
    }
    if buffer.high_watermark > buffer.capacity {
        errors.push(format!(
            "buffer.high_watermark ({}) must not exceed buffer.capacity ({})",
            buffer.high_watermark, buffer.capacity
        ));
    }
    if buffer.spill_chunk == 0 {
        errors.push("buffer.spill_chunk must be positive".to_string());
    }
    if buffer.channel_capacity == 0 {
        errors.push("buffer.channel_capacity must be positive".to_string());
    }
    if buffer.flush_interval.is_zero() {
        errors.push("buffer.flush_interval must be positive".to_string());
    }
    if buffer.batch.max_events == 0 {
        errors.push("buffer.batch.max_events must be positive".to_string());
    }
    if buffer.batch.max_bytes == 0 {
        errors.push("buffer.batch.max_bytes must be positive".to_string());
    }
}

fn validate_shipper(shipper: &ShipperConfig, errors: &mut Vec<String>) {
    if shipper.endpoint.is_empty() {
        errors.push("shipper.endpoint cannot be empty".to_string());
    } else if !(shipper.endpoint.starts_with("http://") || shipper.endpoint.starts_with("https://"))
    {
        errors.push(format!(
            "shipper.endpoint must be an http(s) URL: {}",
            shipper.endpoint
        ));
    }
    if shipper.concurrency == 0 {
        errors.push("shipper.concurrency must be positive".to_string());
    }
    validate_retry("shipper.retry", &shipper.retry, errors);
}

fn validate_retry(prefix: &str, retry: &RetryConfig, errors: &mut Vec<String>) {
    if retry.max_attempts == 0 {
        errors.push(format!("{}.max_attempts must be at least 1", prefix));
    }
    if retry.initial_backoff > retry.max_backoff {
        errors.push(format!(
            "{}.initial_backoff must not exceed max_backoff",
            prefix
        ));
    }
}
