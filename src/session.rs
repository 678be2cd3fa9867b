//! Agent session lifecycle.
//!
//! A session owns at most one live engine. Turns hold a read lease on the
//! engine for their whole duration; `initialize` and `disconnect` take the
//! write side, so replacing or tearing down the engine waits for in-flight
//! turns and no turn ever sees a half-replaced session.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};
use tokio::sync::{watch, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::engine::{
    AgentEngine, EngineConfig, EngineFactory, LlmProvider, McpServer, OperationalMode,
};
use crate::error::DispatchError;
use crate::network::Network;
use crate::reconcile::fields::{non_empty_str, string_field};
use crate::wallet::WalletProvider;

/// Observable lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Disconnecting,
}

/// The engine currently serving turns.
pub struct ActiveEngine {
    pub engine: Arc<dyn AgentEngine>,
    pub network: Network,
}

/// Holds the live engine and its lifecycle state.
pub struct AgentSession {
    slot: RwLock<Option<ActiveEngine>>,
    state: watch::Sender<SessionState>,
}

impl Default for AgentSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            slot: RwLock::new(None),
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Borrow the live engine for the duration of a turn.
    ///
    /// Returns `None` when no engine is installed.
    pub async fn lease(&self) -> Option<RwLockReadGuard<'_, ActiveEngine>> {
        let guard = self.slot.read().await;
        RwLockReadGuard::try_map(guard, Option::as_ref).ok()
    }

    /// Build a new engine and install it in place of any previous one.
    ///
    /// The replacement is built before the old engine is touched, so a
    /// failed build leaves the previous session serving. Cleanup failures of
    /// the old engine are logged and do not affect the new one.
    pub async fn initialize(
        &self,
        factory: &dyn EngineFactory,
        config: EngineConfig,
        wallet: Arc<dyn WalletProvider>,
    ) -> Result<()> {
        let mut slot = self.slot.write().await;
        // A replacement build keeps reporting Ready: the old engine still serves.
        let replacing = slot.is_some();
        if !replacing {
            self.state.send_replace(SessionState::Initializing);
        }

        let network = config.network;
        let engine = match factory.create(config, wallet).await {
            Ok(engine) => engine,
            Err(e) => {
                if !replacing {
                    self.state.send_replace(SessionState::Uninitialized);
                }
                return Err(e);
            }
        };

        if let Some(old) = slot.take() {
            debug!("Tearing down previous engine");
            if let Err(e) = old.engine.cleanup().await {
                warn!(error = %e, "Previous engine cleanup failed");
            }
        }

        *slot = Some(ActiveEngine { engine, network });
        self.state.send_replace(SessionState::Ready);
        info!(network = %network, "Agent session ready");
        Ok(())
    }

    /// Tear down the live engine, if any. Returns whether one existed.
    pub async fn disconnect(&self) -> bool {
        let mut slot = self.slot.write().await;
        let Some(active) = slot.take() else {
            return false;
        };

        self.state.send_replace(SessionState::Disconnecting);
        if let Err(e) = active.engine.cleanup().await {
            warn!(error = %e, "Engine cleanup failed during disconnect");
        }
        self.state.send_replace(SessionState::Uninitialized);
        info!("Agent session disconnected");
        true
    }
}

/// Validate and normalize an `initialize` payload.
///
/// Missing credentials fail before anything is constructed. Optional
/// fields fall back to their safe defaults.
pub fn parse_initialize(payload: &Value) -> Result<EngineConfig, DispatchError> {
    let map = payload
        .as_object()
        .ok_or_else(|| DispatchError::InvalidPayload("initialize expects an object".to_string()))?;

    let account_id = required(map, &["accountId"], "accountId")?;
    let private_key = required(map, &["privateKey"], "privateKey")?;
    let model_api_key = required(map, &["openAIApiKey", "modelApiKey"], "openAIApiKey")?;

    let network = match string_field(map, &["network"]) {
        None => Network::default(),
        Some(name) => Network::parse(name).unwrap_or_else(|| {
            warn!(network = name, "Unrecognized network, using testnet");
            Network::default()
        }),
    };

    let operational_mode = match string_field(map, &["operationalMode"]) {
        None => OperationalMode::default(),
        Some(name) => OperationalMode::parse(name).unwrap_or_else(|| {
            warn!(mode = name, "Unrecognized operational mode, using returnBytes");
            OperationalMode::default()
        }),
    };

    let llm_provider = string_field(map, &["llmProvider"]).and_then(|name| {
        let provider = LlmProvider::parse(name);
        if provider.is_none() {
            warn!(provider = name, "Dropping unsupported LLM provider");
        }
        provider
    });

    Ok(EngineConfig {
        account_id,
        private_key,
        model_api_key,
        network,
        operational_mode,
        llm_provider,
        model_name: string_field(map, &["modelName"]).map(str::to_owned),
        user_account_id: string_field(map, &["userAccountId"]).map(str::to_owned),
        mcp_servers: parse_mcp_servers(map.get("mcpServers")),
        disabled_plugins: parse_string_list(map.get("disabledPlugins")),
        verbose: flag(map, "verbose"),
        disable_logging: flag(map, "disableLogging"),
    })
}

fn required(
    map: &Map<String, Value>,
    keys: &[&str],
    name: &'static str,
) -> Result<String, DispatchError> {
    string_field(map, keys)
        .map(str::to_owned)
        .ok_or(DispatchError::MissingField(name))
}

fn flag(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Enabled, well-formed tool servers. Anything else is dropped.
fn parse_mcp_servers(value: Option<&Value>) -> Vec<McpServer> {
    let Some(entries) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let object = entry.as_object()?;
            if object.get("enabled").and_then(Value::as_bool) == Some(false) {
                return None;
            }
            object.get("name").and_then(non_empty_str)?;
            match serde_json::from_value::<McpServer>(entry.clone()) {
                Ok(server) => Some(server),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed MCP server entry");
                    None
                }
            }
        })
        .collect()
}

fn parse_string_list(value: Option<&Value>) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in value.and_then(Value::as_array).into_iter().flatten() {
        if let Some(text) = non_empty_str(item) {
            if !items.iter().any(|existing| existing == text) {
                items.push(text.to_string());
            }
        }
    }
    items
}
