use std::path::Path;

use reqwest::Url;

use crate::config::schema::IngestConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngestConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<IngestConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: IngestConfig = serde_json::from_value(json_value)?;

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

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &IngestConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let endpoint =
        Url::parse(&config.graph_store.endpoint).map_err(|e| ConfigError::Validation {
            message: format!("graph_store.endpoint is not a valid URL: {}", e),
        })?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            message: format!(
                "graph_store.endpoint must use http or https, got '{}'",
                endpoint.scheme()
            ),
        });
    }

    if config.default_graph.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "default_graph must not be empty".to_string(),
        });
    }

    let limits = &config.limits;
    if limits.max_concurrency == 0 || limits.default_concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "concurrency limits must be at least 1".to_string(),
        });
    }
    if limits.default_concurrency > limits.max_concurrency {
        return Err(ConfigError::Validation {
            message: format!(
                "limits.default_concurrency ({}) exceeds limits.max_concurrency ({})",
                limits.default_concurrency, limits.max_concurrency
            ),
        });
    }
    if limits.result_batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "limits.result_batch_size must be at least 1".to_string(),
        });
    }

    // A live job must never look reclaimable.
    let recovery = &config.recovery;
    if recovery.min_age_secs <= limits.job_timeout_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "recovery.min_age_secs ({}) must exceed limits.job_timeout_secs ({})",
                recovery.min_age_secs, limits.job_timeout_secs
            ),
        });
    }
    if recovery.min_age_secs >= recovery.max_age_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "recovery.min_age_secs ({}) must be below recovery.max_age_secs ({})",
                recovery.min_age_secs, recovery.max_age_secs
            ),
        });
    }

    if config.chunking.max_triples == 0 || config.chunking.very_large_max_triples == 0 {
        return Err(ConfigError::Validation {
            message: "chunk sizes must be at least one triple".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
    {
        "version": "1.0",
        "default_graph": "https://example.org/graph/default",
        "graph_store": { "endpoint": "http://localhost:3030/ds/data" }
    }
    "#;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.graph_store.endpoint, "http://localhost:3030/ds/data");
        assert_eq!(config.limits.result_batch_size, 10);
        assert_eq!(config.recovery.min_age_secs, 10_800);
        assert!(config.chunking.enabled);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database_path": "/var/lib/kgingest/kgingest.db",
            "jobs_directory": "/var/lib/kgingest/jobs",
            "default_graph": "https://example.org/graph/default",
            "status_url_base": "/api/ingest",
            "provenance_namespace": "https://kg.example.org/",
            "graph_store": {
                "endpoint": "https://store.example.org/ds/data",
                "username": "loader",
                "password": { "env_var": "KGINGEST_STORE_PASSWORD" },
                "connect_timeout_secs": 5,
                "request_timeout_secs": 600
            },
            "limits": {
                "default_concurrency": 2,
                "max_concurrency": 4,
                "job_timeout_secs": 60
            },
            "chunking": { "enabled": false },
            "recovery": { "min_age_secs": 120, "max_age_secs": 3600, "on_startup": true },
            "logging": { "filter": "kgingest=debug", "json": true }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.graph_store.username.as_deref(), Some("loader"));
        assert_eq!(
            config.graph_store.password.env_var.as_deref(),
            Some("KGINGEST_STORE_PASSWORD")
        );
        assert_eq!(config.limits.max_concurrency, 4);
        assert!(!config.chunking.enabled);
        assert!(config.recovery.on_startup);
        assert!(config.logging.json);
        assert_eq!(config.provenance_options().default_namespace, "https://kg.example.org/");
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(&MINIMAL.replace("\"1.0\"", "\"2.0\""));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_field_rejected_by_schema() {
        let config_json = r#"
        {
            "version": "1.0",
            "default_graph": "urn:g",
            "graph_store": { "endpoint": "http://localhost/ds" },
            "worker_count": 4
        }
        "#;
        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_bad_endpoint() {
        let mut config = IngestConfig::with_endpoint("ftp://store.example/ds", "urn:g");
        assert!(validate_config(&config).is_err());
        config.graph_store.endpoint = "not a url".to_string();
        assert!(validate_config(&config).is_err());
        config.graph_store.endpoint = "http://store.example/ds".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_recovery_window_must_exceed_job_timeout() {
        let mut config = IngestConfig::with_endpoint("http://store.example/ds", "urn:g");
        config.limits.job_timeout_secs = 7200;
        config.recovery.min_age_secs = 3600;
        assert!(validate_config(&config).is_err());

        config.recovery.min_age_secs = 10_800;
        config.recovery.max_age_secs = 10_800;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_concurrency_bounds() {
        let mut config = IngestConfig::with_endpoint("http://store.example/ds", "urn:g");
        config.limits.default_concurrency = 20;
        config.limits.max_concurrency = 16;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/kgingest.json"),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
