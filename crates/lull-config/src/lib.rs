use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub limits: Limits,
    pub cache: Cache,
    pub gate: Gate,
    pub generator: Generator,
    pub agent: Agent,
    pub upstream: Upstream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

/// Sliding-window admission control, per identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

/// Upstream generation concurrency ceiling. One permit fully serializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    pub model: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub endpoint: String,
    pub app_name: String,
    pub user_id: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> usize {
    3
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    1
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_retry_max_attempts() -> usize {
    3
}

fn default_retry_base_delay_secs() -> u64 {
    5
}

fn default_retry_max_delay_secs() -> u64 {
    60
}

fn default_chunk_size_bytes() -> usize {
    512 * 1024
}

fn default_timeout_ms() -> u64 {
    30_000
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.limits.window_secs == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "limits.window_secs must be >= 1".to_string(),
        ));
    }
    if cfg.limits.max_requests == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "limits.max_requests must be >= 1".to_string(),
        ));
    }
    if cfg.gate.max_concurrent == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "gate.max_concurrent must be >= 1".to_string(),
        ));
    }
    if cfg.generator.poll_interval_secs == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "generator.poll_interval_secs must be >= 1".to_string(),
        ));
    }
    if cfg.generator.chunk_size_bytes == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "generator.chunk_size_bytes must be >= 1".to_string(),
        ));
    }
    if cfg.generator.retry_max_delay_secs < cfg.generator.retry_base_delay_secs {
        return Err(ConfigError::UnsupportedConfig(
            "generator.retry_max_delay_secs must be >= retry_base_delay_secs".to_string(),
        ));
    }
    if cfg.generator.model.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "generator.model must not be empty".to_string(),
        ));
    }
    if cfg.agent.endpoint.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "agent.endpoint must not be empty".to_string(),
        ));
    }
    if cfg.upstream.endpoint.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "upstream.endpoint must not be empty".to_string(),
        ));
    }
    if cfg.upstream.api_key_env.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "upstream.api_key_env must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp_config(contents: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("lull-config-test-{nanos}.yaml"));
        std::fs::write(&path, contents).expect("write temp config");
        path.to_string_lossy().to_string()
    }

    fn base_yaml() -> String {
        r#"
server:
  listen_addr: "127.0.0.1:0"

limits:
  window_secs: 60
  max_requests: 3

cache:
  ttl_secs: 300

gate:
  max_concurrent: 1

generator:
  model: "veo-3.1-generate-preview"
  poll_interval_secs: 2
  retry_max_attempts: 3
  retry_base_delay_secs: 5
  retry_max_delay_secs: 60

agent:
  endpoint: "http://127.0.0.1:8080"
  app_name: "my_agent"
  user_id: "default"

upstream:
  endpoint: "https://generativelanguage.googleapis.com"
  api_key_env: "GEMINI_API_KEY"
"#
        .to_string()
    }

    #[test]
    fn accepts_base_config_and_applies_defaults() {
        let path = write_temp_config(&base_yaml());
        let cfg = load_and_validate(&path).expect("base config should be accepted");
        assert_eq!(cfg.limits.max_requests, 3);
        assert_eq!(cfg.generator.chunk_size_bytes, 512 * 1024);
    }

    #[test]
    fn rejects_zero_window() {
        let path =
            write_temp_config(&base_yaml().replace("window_secs: 60", "window_secs: 0"));
        let err = load_and_validate(&path).expect_err("expected rejection");
        assert!(matches!(
            err,
            ConfigError::SchemaValidation(_) | ConfigError::UnsupportedConfig(_)
        ));
    }

    #[test]
    fn rejects_zero_gate_permits() {
        let path =
            write_temp_config(&base_yaml().replace("max_concurrent: 1", "max_concurrent: 0"));
        let err = load_and_validate(&path).expect_err("expected rejection");
        assert!(matches!(
            err,
            ConfigError::SchemaValidation(_) | ConfigError::UnsupportedConfig(_)
        ));
    }

    #[test]
    fn rejects_backoff_cap_below_base() {
        let path = write_temp_config(
            &base_yaml().replace("retry_max_delay_secs: 60", "retry_max_delay_secs: 1"),
        );
        let err = load_and_validate(&path).expect_err("expected rejection");
        assert!(matches!(err, ConfigError::UnsupportedConfig(_)));
    }
}
