//! Configuration management for the swap relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    pub poll_interval_ms: u64,
    #[serde(default = "default_sign_attempts")]
    pub sign_attempts: u32,
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    pub max_concurrent_swaps: usize,
    #[serde(default = "default_max_count_of_results")]
    pub max_count_of_results: usize,
    /// Only swaps newer than this are picked up by the workers
    pub rescan_window_secs: i64,
    pub health_check_interval_secs: u64,
}

fn default_sign_attempts() -> u32 {
    5
}

fn default_send_attempts() -> u32 {
    3
}

fn default_send_interval_ms() -> u64 {
    1000
}

fn default_max_count_of_results() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL, or "memory" for the in-process store
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url == "memory"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for the admin endpoints; admin is disabled when unset
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: String,
    pub name: String,
    pub rpc_urls: Vec<String>,
    /// JSON-RPC endpoint of the MPC signing service
    pub signer_url: String,
    pub router_contract: String,
    pub mpc_address: String,
    pub confirmations: u64,
    #[serde(default)]
    pub gas_price_buffer_percent: u64,
    /// Swaps above this value (token base units) wait for operator approval
    pub big_value_threshold: Option<String>,
    pub enabled: bool,
}

impl Settings {
    /// Load settings from the file named by `SWAP_RELAYER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        // At least one chain must be enabled
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in self.enabled_chains() {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.mpc_address.is_empty() {
                anyhow::bail!("Chain {} has no MPC address configured", name);
            }
        }

        if self.relayer.sign_attempts == 0 || self.relayer.send_attempts == 0 {
            anyhow::bail!("Retry budgets must allow at least one attempt");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        let mut chains: Vec<_> = self.chains.iter().filter(|(_, c)| c.enabled).collect();
        chains.sort_by(|a, b| a.0.cmp(b.0));
        chains
    }

    /// Get chain config by chain ID
    #[cfg(test)]
    pub fn get_chain_by_id(&self, chain_id: &str) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
