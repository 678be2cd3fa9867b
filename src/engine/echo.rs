//! Echo engine, used when no external engine is wired in.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{AgentEngine, ChatTurn, EngineConfig, EngineFactory, FormSubmission};
use crate::wallet::WalletProvider;

/// Engine that replies with the text it was given.
#[derive(Debug, Clone)]
pub struct EchoEngine {
    config: EngineConfig,
}

impl EchoEngine {
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn metadata(&self, history: &[ChatTurn]) -> Value {
        json!({
            "network": self.config.network,
            "operationalMode": self.config.operational_mode,
            "historyLength": history.len(),
        })
    }
}

#[async_trait]
impl AgentEngine for EchoEngine {
    #[instrument(skip_all, fields(len = message.len()))]
    async fn process_message(&self, message: &str, history: &[ChatTurn]) -> Result<Value> {
        debug!("Echoing message");
        let reply = format!("Echo: {message}");
        Ok(json!({
            "message": reply,
            "output": reply,
            "metadata": self.metadata(history),
        }))
    }

    async fn process_form_submission(
        &self,
        submission: &FormSubmission,
        history: &[ChatTurn],
    ) -> Result<Value> {
        let reply = format!(
            "Received form '{}' for tool '{}'",
            submission.form_id, submission.tool_name
        );
        Ok(json!({
            "message": reply,
            "output": reply,
            "metadata": self.metadata(history),
        }))
    }
}

/// Factory for [`EchoEngine`].
#[derive(Debug, Default, Clone)]
pub struct EchoEngineFactory;

#[async_trait]
impl EngineFactory for EchoEngineFactory {
    async fn create(
        &self,
        config: EngineConfig,
        _wallet: Arc<dyn WalletProvider>,
    ) -> Result<Arc<dyn AgentEngine>> {
        debug!(config = ?config, "Creating echo engine");
        Ok(Arc::new(EchoEngine::new(config)))
    }
}
