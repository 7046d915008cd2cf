use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Lifetime of job, history and batch records.
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
    /// Deadline applied to every store call made by the engine.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_page_limit")]
    pub default_page_limit: usize,
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: usize,
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
    /// Snapshot store state to `<data_dir>/state.json`.
    #[serde(default)]
    pub persist: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_job_ttl_secs() -> u64 {
    86_400 // 24h
}

fn default_store_timeout_ms() -> u64 {
    3_000
}

fn default_page_limit() -> usize {
    10
}

fn default_max_page_limit() -> usize {
    100
}

fn default_purge_interval_secs() -> u64 {
    60
}

impl ServiceConfig {
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }

    /// Resolve a requested page size: missing or zero falls back to the
    /// default, anything larger than the maximum is capped.
    pub fn page_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if n > 0 => n.min(self.max_page_limit),
            _ => self.default_page_limit,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            job_ttl_secs: default_job_ttl_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            default_page_limit: default_page_limit(),
            max_page_limit: default_max_page_limit(),
            purge_interval_secs: default_purge_interval_secs(),
            persist: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert!(config.data_dir.is_none());
        assert_eq!(config.job_ttl_secs, 86_400);
        assert_eq!(config.store_timeout_ms, 3_000);
        assert_eq!(config.default_page_limit, 10);
        assert_eq!(config.max_page_limit, 100);
        assert_eq!(config.purge_interval_secs, 60);
        assert!(!config.persist);
    }

    #[test]
    fn test_service_config_partial_deserialization_empty() {
        let config: ServiceConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.job_ttl_secs, 86_400);
        assert!(!config.persist);
    }

    #[test]
    fn test_service_config_partial_deserialization_some_fields() {
        let json = r#"{"port": 9000, "job_ttl_secs": 60, "persist": true}"#;
        let config: ServiceConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.host, "127.0.0.1"); // default
        assert_eq!(config.port, 9000);
        assert_eq!(config.job_ttl(), Duration::from_secs(60));
        assert!(config.persist);
        assert_eq!(config.store_timeout(), Duration::from_millis(3_000)); // default
    }

    #[test]
    fn test_service_config_with_data_dir() {
        let json = r#"{"data_dir": "/custom/path"}"#;
        let config: ServiceConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.data_dir, Some(PathBuf::from("/custom/path")));
    }

    #[test]
    fn test_page_limit_resolution() {
        let config = ServiceConfig::default();
        assert_eq!(config.page_limit(None), 10);
        assert_eq!(config.page_limit(Some(0)), 10);
        assert_eq!(config.page_limit(Some(25)), 25);
        assert_eq!(config.page_limit(Some(10_000)), 100);
    }

    #[test]
    fn test_purge_interval_never_zero() {
        let config = ServiceConfig {
            purge_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.purge_interval(), Duration::from_secs(1));
    }
}
