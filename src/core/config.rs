use crate::core::model::Projection;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

/// Hosted API deployments.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Staging,
    Development,
    #[default]
    Local,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://api.realestate-ai-platform.com/v1",
            Environment::Staging => "https://staging-api.realestate-ai-platform.com/v1",
            Environment::Development => "https://dev-api.realestate-ai-platform.com/v1",
            Environment::Local => "http://localhost:3001/api",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Rest {
        #[serde(default)]
        environment: Environment,
        /// Takes precedence over `environment`.
        #[serde(default)]
        base_url: Option<String>,
    },
    Supabase {
        url: String,
        anon_key: String,
    },
    Mock {
        #[serde(default)]
        latency_ms: u64,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Rest {
            environment: Environment::default(),
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStoreKind {
    #[default]
    Disk,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub store: CredentialStoreKind,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total tries per read, including the first.
    #[serde(default = "default_attempts")]
    pub attempts: usize,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> usize {
    3
}

fn default_delay_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_market_cache_ttl_secs() -> u64 {
    300
}

fn default_projection() -> Projection {
    Projection {
        appreciation_rate: 0.035,
        selling_cost_rate: 0.0,
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub data_path: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_market_cache_ttl_secs")]
    pub market_cache_ttl_secs: u64,
    #[serde(default = "default_projection")]
    pub projection: Projection,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            backend: BackendConfig::default(),
            credentials: CredentialsConfig::default(),
            data_path: None,
            retry: RetryConfig::default(),
            market_cache_ttl_secs: default_market_cache_ttl_secs(),
            projection: default_projection(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "dealdesk", "dealdesk")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("com", "dealdesk", "dealdesk")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn market_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.market_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(
            config.backend,
            BackendConfig::Rest {
                environment: Environment::Local,
                base_url: None
            }
        );
        assert_eq!(config.credentials.store, CredentialStoreKind::Disk);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.market_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.projection.appreciation_rate, 0.035);
    }

    #[test]
    fn test_backend_variants() {
        let yaml_str = r#"
backend:
  kind: rest
  environment: staging
credentials:
  store: memory
retry:
  attempts: 5
projection:
  appreciation_rate: 0.02
  selling_cost_rate: 0.06
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Rest {
                environment: Environment::Staging,
                base_url: None
            }
        );
        assert_eq!(config.credentials.store, CredentialStoreKind::Memory);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.delay_ms, 500);
        assert_eq!(config.projection.selling_cost_rate, 0.06);

        let yaml_str = r#"
backend:
  kind: supabase
  url: "https://abc.supabase.co"
  anon_key: "anon"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert!(matches!(config.backend, BackendConfig::Supabase { ref url, .. } if url == "https://abc.supabase.co"));

        let config: AppConfig =
            serde_yaml::from_str("backend:\n  kind: mock\n  latency_ms: 25\n").unwrap();
        assert_eq!(config.backend, BackendConfig::Mock { latency_ms: 25 });
    }

    #[test]
    fn test_environment_urls() {
        assert_eq!(
            Environment::Production.base_url(),
            "https://api.realestate-ai-platform.com/v1"
        );
        assert_eq!(Environment::Local.base_url(), "http://localhost:3001/api");
    }

    #[test]
    fn test_example_config_parses() {
        let config: AppConfig =
            serde_yaml::from_str(include_str!("../../docs/example_config.yaml")).unwrap();
        assert!(matches!(config.backend, BackendConfig::Rest { .. }));
    }

    #[test]
    fn test_custom_data_path() {
        let config = AppConfig {
            data_path: Some("/tmp/dealdesk".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.default_data_path().unwrap(),
            PathBuf::from("/tmp/dealdesk")
        );
    }
}
