use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Redis backend for shared rate-limit state; in-memory when absent
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Per-endpoint rate limit settings
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

/// One endpoint family's rate limit settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Maximum requests per window
    pub max_requests: u32,
}

/// Rate limit settings per endpoint family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// POST /store/reviews and friends
    #[serde(default = "default_review_submission")]
    pub review_submission: LimitSettings,
    /// GET /store/reviews and friends
    #[serde(default = "default_review_read")]
    pub review_read: LimitSettings,
    /// Admin API endpoints
    #[serde(default = "default_general_api")]
    pub general_api: LimitSettings,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_review_submission() -> LimitSettings {
    // 5 submissions per 15 minutes
    LimitSettings {
        window_ms: 15 * 60 * 1000,
        max_requests: 5,
    }
}

fn default_review_read() -> LimitSettings {
    LimitSettings {
        window_ms: 60 * 1000,
        max_requests: 60,
    }
}

fn default_general_api() -> LimitSettings {
    LimitSettings {
        window_ms: 60 * 1000,
        max_requests: 100,
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            review_submission: default_review_submission(),
            review_read: default_review_read(),
            general_api: default_general_api(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, settings) in [
            ("review_submission", &self.limits.review_submission),
            ("review_read", &self.limits.review_read),
            ("general_api", &self.limits.general_api),
        ] {
            if settings.window_ms == 0 {
                return Err(GateError::Config(format!(
                    "Rate limit window_ms must be > 0 for: {}",
                    name
                )));
            }
            if settings.max_requests == 0 {
                return Err(GateError::Config(format!(
                    "Rate limit max_requests must be > 0 for: {}",
                    name
                )));
            }
        }

        if let Some(redis) = &self.redis {
            if !redis.url.starts_with("redis://") && !redis.url.starts_with("rediss://") {
                return Err(GateError::Config(format!(
                    "Redis URL must start with redis:// or rediss://: {}",
                    redis.url
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert!(config.redis.is_none());
        assert_eq!(config.limits.review_submission.max_requests, 5);
        assert_eq!(config.limits.review_submission.window_ms, 900_000);
        assert_eq!(config.limits.review_read.max_requests, 60);
        assert_eq!(config.limits.general_api.max_requests, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  host: 127.0.0.1
  port: 8080
redis:
  url: redis://localhost:6379
limits:
  review_read:
    window_ms: 30000
    max_requests: 20
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.redis.unwrap().url, "redis://localhost:6379");
        assert_eq!(config.limits.review_read.max_requests, 20);
        // Unspecified sections keep their defaults
        assert_eq!(config.limits.review_submission.max_requests, 5);
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let yaml = r#"
limits:
  general_api:
    window_ms: 0
    max_requests: 100
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_redis_url() {
        let yaml = r#"
redis:
  url: http://localhost:6379
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.yaml");
        std::fs::write(&path, "server:\n  port: 7777\n").unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 7777);

        assert!(AppConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }
}
