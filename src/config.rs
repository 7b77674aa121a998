use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chain: ChainConfig,
    pub artifacts: ArtifactConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// How often installed event filters are polled.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub api_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_contract: Option<String>,
    pub account: Option<String>,
    pub log_capacity: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            poll_interval_ms: 1000,
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/contract".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_contract: None,
            account: None,
            log_capacity: 1000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars();
        config
    }

    fn apply_env_vars(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// `API_URL`, `RPC_URL` and `ACCOUNT` take precedence over the file.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_url) = lookup("API_URL") {
            tracing::debug!("Using API_URL for the artifact service");
            self.artifacts.api_url = api_url;
        }

        if let Some(rpc_url) = lookup("RPC_URL") {
            tracing::debug!("Using RPC_URL for the chain endpoint");
            self.chain.rpc_url = rpc_url;
        }

        if let Some(account) = lookup("ACCOUNT") {
            self.session.account = Some(account);
        }

        if self.session.log_capacity == 0 {
            tracing::warn!("session.log_capacity must be positive, keeping one entry");
            self.session.log_capacity = 1;
        }
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<std::path::PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("abi-console").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# ABI Console Configuration File

[chain]
# JSON-RPC endpoint. The node (or wallet proxy) signs transactions for the
# connected account; the console never holds keys.
rpc_url = "http://localhost:8545"
# Event filters are polled at this interval
poll_interval_ms = 1000

[artifacts]
# Contract registry; GET {api_url}/{name} returns {address, artifact: {abi}}
api_url = "http://localhost:8000/contract"
timeout_secs = 30

[session]
# Contract opened at startup
# default_contract = "GumiSpacecraft"
# Sender for state-changing calls
# account = "0x0000000000000000000000000000000000000000"
# Interaction log entries kept before the oldest are dropped
log_capacity = 1000

# Environment variables that can be used:
# API_URL - overrides artifacts.api_url
# RPC_URL - overrides chain.rpc_url
# ACCOUNT - overrides session.account
"#;
        sample_config.to_string()
    }
}
