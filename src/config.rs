//! Server configuration loaded from `deskrelay.toml` with env overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Agent gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Bot platform settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Update router settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Path to the TOML seed file for the in-memory store
    /// (tenants, channels, departments, agent memberships).
    #[serde(default)]
    pub seed_file: Option<String>,
}

/// Agent-facing WebSocket gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    18790
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Bot platform API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    /// Bot API base, also the base of file download URLs
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Timeout for a single external call, in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_call_timeout() -> u64 {
    10
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Update router configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Depth of the bounded inbound update queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_queue_depth() -> usize {
    256
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
        }
    }
}

impl Config {
    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from the default location, or fall back to defaults.
    pub fn load() -> Self {
        let path = PathBuf::from("deskrelay.toml");
        let mut config = if path.exists() {
            Self::load_from(&path).unwrap_or_else(|e| {
                eprintln!("[config] Failed to load {}: {}", path.display(), e);
                Config::default()
            })
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("DESKRELAY_GATEWAY_PORT") {
            if let Ok(p) = port.parse() {
                self.gateway.port = p;
            }
        }
        if let Ok(base) = std::env::var("DESKRELAY_TELEGRAM_API_BASE") {
            self.telegram.api_base = base;
        }
        if let Ok(seed) = std::env::var("DESKRELAY_SEED_FILE") {
            self.seed_file = Some(seed);
        }
    }

    /// Expand ~ in the seed file path.
    pub fn resolve_seed_file(&self) -> Option<PathBuf> {
        let seed = self.seed_file.as_ref()?;
        if let Some(rest) = seed.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return Some(home.join(rest));
            }
        }
        Some(PathBuf::from(seed))
    }
}

/// Resolve a bot token that may be a `${VAR}` environment reference.
pub fn resolve_token(token: &str) -> Option<String> {
    if token.starts_with("${") && token.ends_with('}') {
        let env_var = &token[2..token.len() - 1];
        std::env::var(env_var).ok()
    } else if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
