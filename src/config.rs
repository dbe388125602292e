//! Configuration management for the LendFlow Orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub transfer: TransferConfig,
    pub supply: SupplyConfig,
    pub notifications: NotificationsConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub instance_id: String,
    pub poll_interval_ms: u64,
    pub cleanup_interval_secs: u64,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Connection settings for the cross-chain transfer provider.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub api_urls: Vec<String>,
    pub request_timeout_ms: u64,
}

/// Connection settings for the supply planner service.
#[derive(Debug, Clone, Deserialize)]
pub struct SupplyConfig {
    pub planner_url: String,
    pub request_timeout_ms: u64,
    pub enable_health_factor_preview: bool,
    pub on_behalf_of: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    pub slack_webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub pool_address: String,
    pub enabled: bool,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("LENDFLOW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings = toml::from_str(&config_str)
            .with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        // At least one chain must be enabled
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        // Validate chain configurations
        for (name, chain) in &self.chains {
            if chain.enabled {
                if chain.chain_id == 0 {
                    anyhow::bail!("Chain {} has chain_id 0", name);
                }
                if chain.pool_address.is_empty() {
                    tracing::warn!("Chain {} has no pool address - supply will fail", name);
                }
            }
        }

        if self.transfer.api_urls.is_empty() {
            anyhow::bail!("No transfer provider URLs configured");
        }

        if self.supply.planner_url.is_empty() {
            anyhow::bail!("No supply planner URL configured");
        }

        if self.orchestrator.poll_interval_ms == 0 {
            anyhow::bail!("Poll interval must be non-zero");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains
            .iter()
            .filter(|(_, c)| c.enabled)
            .collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config() -> String {
        r#"
[orchestrator]
instance_id = "orchestrator-test"
poll_interval_ms = 500
cleanup_interval_secs = 60
session_ttl_secs = 300
max_sessions = 100

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[transfer]
api_urls = ["http://localhost:9100"]
request_timeout_ms = 5000

[supply]
planner_url = "http://localhost:9200"
request_timeout_ms = 5000
enable_health_factor_preview = true

[notifications]

[chains.ethereum]
chain_id = 1
name = "Ethereum"
pool_address = "0x87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2"
enabled = true

[chains.arbitrum]
chain_id = 42161
name = "Arbitrum"
pool_address = "0x794a61358D6845594F94dc1DB02A252b5b4814aD"
enabled = false
"#
        .to_string()
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("LENDFLOW_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${LENDFLOW_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_parse_and_query_chains() {
        let settings: Settings = toml::from_str(&sample_config()).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.chains.len(), 2);
        assert_eq!(settings.enabled_chains().len(), 1);
        assert_eq!(settings.enabled_chains()[0].1.chain_id, 1);
        assert!(settings.supply.enable_health_factor_preview);
        assert!(settings.supply.on_behalf_of.is_none());
    }

    #[test]
    fn test_validate_rejects_no_enabled_chains() {
        let config = sample_config().replace("enabled = true", "enabled = false");
        let settings: Settings = toml::from_str(&config).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_transfer_urls() {
        let config = sample_config().replace(
            "api_urls = [\"http://localhost:9100\"]",
            "api_urls = []",
        );
        let settings: Settings = toml::from_str(&config).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_config().as_bytes()).unwrap();
        env::set_var("LENDFLOW_CONFIG", file.path());

        let settings = Settings::load().unwrap();
        assert_eq!(settings.orchestrator.instance_id, "orchestrator-test");
        assert_eq!(settings.transfer.api_urls.len(), 1);

        env::remove_var("LENDFLOW_CONFIG");
    }
}
