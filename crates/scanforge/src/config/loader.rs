use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Overrides `reconstruction.binary` when set and non-empty.
pub const ENGINE_BINARY_ENV: &str = "SCANFORGE_ENGINE_BINARY";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: Config = serde_json::from_value(json_value)?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(binary) = std::env::var(ENGINE_BINARY_ENV) {
        if !binary.trim().is_empty() {
            log::debug!("Engine binary overridden from {}", ENGINE_BINARY_ENV);
            config.reconstruction.binary = binary;
        }
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    let threshold = config.extraction.sharpness_threshold;
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(ConfigError::Validation {
            message: format!("Invalid sharpness_threshold: {}", threshold),
        });
    }

    if !(1..=100).contains(&config.extraction.jpeg_quality) {
        return Err(ConfigError::Validation {
            message: format!(
                "jpeg_quality must be between 1 and 100, got {}",
                config.extraction.jpeg_quality
            ),
        });
    }

    if config.reconstruction.binary.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: format!(
                "reconstruction.binary is empty (set it in the config or via {})",
                ENGINE_BINARY_ENV
            ),
        });
    }

    Ok(())
}
