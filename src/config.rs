//! Worker configuration.
//!
//! Defaults are built in. A JSON file (`--config`), the
//! `AGENT_BRIDGE_CONFIG` environment variable (JSON) and the
//! `AGENT_BRIDGE_CALLBACK_TIMEOUT_MS` variable are layered on top, in that
//! order.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Callback action that asks the host wallet to start an inscription.
pub const ACTION_INSCRIBE_START: &str = "wallet_inscribe_start";
/// Callback action that asks the host wallet to sign and submit bytes.
pub const ACTION_EXECUTE_TX: &str = "wallet_execute_tx";

const CONFIG_ENV: &str = "AGENT_BRIDGE_CONFIG";
const TIMEOUT_ENV: &str = "AGENT_BRIDGE_CALLBACK_TIMEOUT_MS";

/// Top-level configuration for the worker.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Outbound callback timeouts.
    pub callbacks: CallbackConfig,

    /// Protocol framing limits.
    pub protocol: ProtocolConfig,
}

/// Timeout budgets for callbacks issued to the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Timeout for any action without a dedicated budget.
    pub default_timeout_ms: u64,

    /// Per-action overrides, merged over the built-in budgets.
    pub action_timeouts_ms: HashMap<String, u64>,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            action_timeouts_ms: HashMap::new(),
        }
    }
}

impl CallbackConfig {
    /// Resolve the timeout for a callback action.
    ///
    /// User overrides win over the built-in budgets for slow,
    /// user-confirmed wallet operations.
    pub fn timeout_for(&self, action: &str) -> Duration {
        let ms = self
            .action_timeouts_ms
            .get(action)
            .copied()
            .or_else(|| builtin_timeout_ms(action))
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }
}

/// Line framing limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Maximum accepted line length in bytes. Safety valve against
    /// malformed or runaway input.
    pub max_line_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Load with an explicit environment lookup.
    pub fn load_with(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_json(&text)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Some(json) = env(CONFIG_ENV) {
            debug!(var = CONFIG_ENV, "Applying configuration from environment");
            let overlay: ConfigOverlay = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse {CONFIG_ENV}"))?;
            config.merge(overlay);
        }

        if let Some(value) = env(TIMEOUT_ENV) {
            let ms = value
                .trim()
                .parse()
                .with_context(|| format!("{TIMEOUT_ENV} must be an integer, got '{value}'"))?;
            config.callbacks.default_timeout_ms = ms;
        }

        Ok(config)
    }

    /// Parse a configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    /// Layer the values `overlay` sets over `self`. Action timeouts are
    /// merged key by key.
    pub fn merge(&mut self, overlay: ConfigOverlay) {
        if let Some(ms) = overlay.callbacks.default_timeout_ms {
            self.callbacks.default_timeout_ms = ms;
        }
        self.callbacks
            .action_timeouts_ms
            .extend(overlay.callbacks.action_timeouts_ms);
        if let Some(max) = overlay.protocol.max_line_bytes {
            self.protocol.max_line_bytes = max;
        }
    }
}

/// A partial configuration layered over an existing one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigOverlay {
    pub callbacks: CallbackOverlay,
    pub protocol: ProtocolOverlay,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallbackOverlay {
    pub default_timeout_ms: Option<u64>,
    pub action_timeouts_ms: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProtocolOverlay {
    pub max_line_bytes: Option<usize>,
}

fn builtin_timeout_ms(action: &str) -> Option<u64> {
    match action {
        ACTION_INSCRIBE_START => Some(300_000),
        ACTION_EXECUTE_TX => Some(120_000),
        _ => None,
    }
}

const fn default_timeout_ms() -> u64 {
    60_000
}

const fn default_max_line_bytes() -> usize {
    64 * 1024 * 1024
}
