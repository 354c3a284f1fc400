use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub escrow: EscrowConfig,
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// `0x` escrow contract address.
    pub contract_address: String,
    /// EVM L2 JSON-RPC endpoint.
    pub rpc_url: String,
    /// USDC token address; the escrow ABI does not expose it.
    pub usdc_token_address: String,
    /// `mock` runs against the in-process chain; a JSON-RPC transport
    /// implementing the same trait is wired in deployment.
    #[serde(default = "default_transport")]
    pub transport: String,
}

fn default_transport() -> String {
    "mock".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Pass cadence; the contract recommends at most five minutes.
    pub interval_secs: u64,
    pub auto_release_secs: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            auto_release_secs: saltdig_market::AUTO_RELEASE_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from a TOML file (when present) and apply environment
    /// overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default_config(),
        };
        config.apply_env();
        Ok(config)
    }

    fn default_config() -> Self {
        Self {
            api: ApiConfig::default(),
            escrow: EscrowConfig::default(),
            reconciler: ReconcilerSettings::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(address) = env::var("ESCROW_CONTRACT_ADDRESS") {
            self.escrow.contract_address = address;
        }
        if let Ok(url) = env::var("BASE_RPC_URL") {
            self.escrow.rpc_url = url;
        }
        if let Ok(token) = env::var("USDC_TOKEN_ADDRESS") {
            self.escrow.usdc_token_address = token;
        }
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.api.port = port;
            }
        }
        if let Ok(level) = env::var("SALTDIG_LOG") {
            self.logging.level = level;
        }
    }
}

/// Secrets read from the environment only, never serialized.
#[derive(Clone)]
pub struct Secrets {
    /// Used only by the auto-release reconciler.
    pub platform_wallet_key: Option<String>,
    /// AEAD key for agent signer keys at rest.
    pub hosted_encryption_key: Option<String>,
    /// Shared secret authorizing reconciler runs.
    pub cron_secret: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            platform_wallet_key: env::var("PLATFORM_WALLET_KEY").ok(),
            hosted_encryption_key: env::var("HOSTED_ENCRYPTION_KEY").ok(),
            cron_secret: env::var("CRON_SECRET").ok(),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("platform_wallet_key", &self.platform_wallet_key.is_some())
            .field(
                "hosted_encryption_key",
                &self.hosted_encryption_key.is_some(),
            )
            .field("cron_secret", &self.cron_secret.is_some())
            .finish()
    }
}
