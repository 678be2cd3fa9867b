//! Agent engine boundary.
//!
//! The conversational engine is supplied from outside the bridge. The
//! dispatch runtime only needs to build one from a validated configuration,
//! hand it turns, and tear it down.

mod echo;

pub use echo::{EchoEngine, EchoEngineFactory};

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::network::Network;
use crate::wallet::WalletProvider;

/// How the engine handles transactions it builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationalMode {
    /// Sign and submit with the configured key.
    Autonomous,
    /// Hand unsigned bytes back for the user's wallet to sign.
    #[default]
    ReturnBytes,
}

impl OperationalMode {
    /// Parse a mode name. `provideBytes` is accepted as an alias.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "autonomous" => Some(Self::Autonomous),
            "returnBytes" | "provideBytes" => Some(Self::ReturnBytes),
            _ => None,
        }
    }
}

/// Model providers the engine can be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    OpenRouter,
}

impl LlmProvider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "openrouter" => Some(Self::OpenRouter),
            _ => None,
        }
    }
}

/// An auxiliary capability module (tool server) attached to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,
    #[serde(default)]
    pub config: Value,
}

/// Validated engine configuration.
#[derive(Clone, PartialEq)]
pub struct EngineConfig {
    pub account_id: String,
    pub private_key: String,
    pub model_api_key: String,
    pub network: Network,
    pub operational_mode: OperationalMode,
    pub llm_provider: Option<LlmProvider>,
    pub model_name: Option<String>,
    pub user_account_id: Option<String>,
    pub mcp_servers: Vec<McpServer>,
    pub disabled_plugins: Vec<String>,
    pub verbose: bool,
    pub disable_logging: bool,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("account_id", &self.account_id)
            .field("network", &self.network)
            .field("operational_mode", &self.operational_mode)
            .field("llm_provider", &self.llm_provider)
            .field("model_name", &self.model_name)
            .field("mcp_servers", &self.mcp_servers.len())
            .field("disabled_plugins", &self.disabled_plugins)
            .finish_non_exhaustive()
    }
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Human,
    Ai,
    System,
}

/// One prior turn of conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(rename = "type")]
    pub role: ChatRole,
    pub content: String,
}

/// A structured form the user filled in, routed to the engine's form entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmission {
    pub form_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub original_prompt: Option<String>,
    #[serde(default)]
    pub partial_input: Option<Value>,
}

/// A live engine instance.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Handle a free-text turn.
    async fn process_message(&self, message: &str, history: &[ChatTurn]) -> Result<Value>;

    /// Handle a structured form submission.
    async fn process_form_submission(
        &self,
        submission: &FormSubmission,
        history: &[ChatTurn],
    ) -> Result<Value>;

    /// Release resources held by this instance.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds engine instances for the dispatch runtime.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        config: EngineConfig,
        wallet: Arc<dyn WalletProvider>,
    ) -> Result<Arc<dyn AgentEngine>>;
}
