use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Wire protocol constants.
pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

// §4.5 cliModePrompt defaults.
pub const DEFAULT_CLI_MODE_ENABLED: bool = true;
pub const DEFAULT_CLI_MODE_THRESHOLD: u32 = 10;

/// Top-level config (braid.toml + BRAID_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BraidConfig {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Per-model per-million-token prices (`[pricing.model_id]`). Kept as a
    /// plain data shape here rather than `braid_generation::ModelPrice` so
    /// `braid-core` doesn't gain a dependency edge onto `braid-generation`
    /// just for config parsing — the gateway maps this into a `TablePricing`
    /// at startup.
    #[serde(default)]
    pub pricing: HashMap<String, ModelPriceConfig>,
}

impl Default for BraidConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                port: DEFAULT_PORT,
                bind: DEFAULT_BIND.to_string(),
                auth_token: None,
            },
            database: DatabaseConfig::default(),
            generation: GenerationConfig::default(),
            pricing: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPriceConfig {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// When set, the WS handshake's `?token=` query param must match.
    /// `None` disables authentication (local/dev use).
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Generation-wide defaults consulted when a conversation doesn't override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_cli_mode_enabled")]
    pub cli_mode_enabled: bool,
    #[serde(default = "default_cli_mode_threshold")]
    pub cli_mode_threshold: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            cli_mode_enabled: DEFAULT_CLI_MODE_ENABLED,
            cli_mode_threshold: DEFAULT_CLI_MODE_THRESHOLD,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_cli_mode_enabled() -> bool {
    DEFAULT_CLI_MODE_ENABLED
}
fn default_cli_mode_threshold() -> u32 {
    DEFAULT_CLI_MODE_THRESHOLD
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.braidchat/braidchat.db", home)
}

impl BraidConfig {
    /// Load config from a TOML file with BRAID_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then `~/.braidchat/braid.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BRAID_").split("_"))
            .extract()
            .map_err(|e| crate::error::BraidError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.braidchat/braid.toml", home)
}
