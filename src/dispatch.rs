//! Command dispatch.
//!
//! Routes decoded commands to the agent session and shapes their results
//! into command responses.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::engine::EngineFactory;
use crate::error::DispatchError;
use crate::message::MessageRequest;
use crate::reconcile::reconcile;
use crate::session::{parse_initialize, AgentSession};
use crate::transport::{Command, CommandResponse};
use crate::wallet::{WalletInscriptions, WalletProvider};

/// Owns the agent session and drives it on behalf of the host.
pub struct Dispatcher {
    factory: Arc<dyn EngineFactory>,
    wallet: Arc<dyn WalletProvider>,
    session: AgentSession,
}

impl Dispatcher {
    pub fn new(factory: Arc<dyn EngineFactory>, wallet: Arc<dyn WalletProvider>) -> Self {
        Self {
            factory,
            wallet,
            session: AgentSession::new(),
        }
    }

    pub const fn session(&self) -> &AgentSession {
        &self.session
    }

    /// Run one command and build its response. Never fails: every error is
    /// reported in the response.
    pub async fn dispatch(&self, id: Option<u64>, command: Command) -> CommandResponse {
        let action = command.action();
        let started = Instant::now();
        info!(action, id = ?id, "Dispatch start");

        let result = match command {
            Command::Initialize(payload) => self.initialize(&payload).await,
            Command::SendMessage(payload) => self.send_message(&payload).await,
            Command::Status => Ok(self.status()),
            Command::Disconnect => Ok(self.disconnect().await),
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(data) => {
                info!(action, id = ?id, elapsed_ms, "Dispatch success");
                CommandResponse::ok(id, data)
            }
            Err(e) => {
                warn!(action, id = ?id, elapsed_ms, error = %e, "Dispatch failure");
                CommandResponse::error(id, e.to_string())
            }
        }
    }

    /// Validate credentials and install a fresh engine.
    pub async fn initialize(&self, payload: &Value) -> Result<Value, DispatchError> {
        let config = parse_initialize(payload)?;
        info!(
            network = %config.network,
            mode = ?config.operational_mode,
            provider = ?config.llm_provider,
            mcp_servers = config.mcp_servers.len(),
            "Initializing agent"
        );
        self.session
            .initialize(self.factory.as_ref(), config, Arc::clone(&self.wallet))
            .await?;
        Ok(json!({ "initialized": true }))
    }

    /// Run one conversational turn and reconcile its result.
    pub async fn send_message(&self, payload: &Value) -> Result<Value, DispatchError> {
        let lease = self
            .session
            .lease()
            .await
            .ok_or(DispatchError::NotInitialized)?;
        let request = MessageRequest::from_payload(payload)?;

        let raw = match &request.form {
            Some(form) => {
                info!(form_id = %form.form_id, tool = %form.tool_name, "Routing form submission");
                lease
                    .engine
                    .process_form_submission(form, &request.history)
                    .await?
            }
            None => {
                lease
                    .engine
                    .process_message(&request.prompt(), &request.history)
                    .await?
            }
        };
        drop(lease);

        let fetcher = WalletInscriptions(Arc::clone(&self.wallet));
        let response = reconcile(raw, Some(&fetcher)).await;
        Ok(json!({
            "response": response,
            "attachments": request.attachments,
        }))
    }

    pub fn status(&self) -> Value {
        json!({ "connected": self.session.is_ready() })
    }

    /// Tear down the session. Always succeeds.
    pub async fn disconnect(&self) -> Value {
        if !self.session.disconnect().await {
            info!("Disconnect requested with no active session");
        }
        json!({ "disconnected": true })
    }

    /// Release the session at end of input.
    pub async fn shutdown(&self) {
        self.session.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AgentEngine, ChatTurn, EngineConfig, FormSubmission};
    use crate::error::WalletError;
    use crate::network::Network;
    use crate::wallet::{ExecutedTransaction, InscriptionStart, WalletStatus};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockWallet {
        fetches: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WalletProvider for MockWallet {
        async fn status(&self) -> WalletStatus {
            WalletStatus::default()
        }
        async fn execute_bytes(&self, _: &str, _: Network) -> Result<ExecutedTransaction, WalletError> {
            Ok(ExecutedTransaction {
                transaction_id: "0.0.9-1-000000001".to_string(),
            })
        }
        async fn start_inscription(&self, _: Value, _: Network) -> Result<InscriptionStart, WalletError> {
            unreachable!()
        }
        async fn fetch_inscription(
            &self,
            transaction_id: &str,
            _: Network,
        ) -> Result<Option<Value>, WalletError> {
            self.fetches.lock().unwrap().push(transaction_id.to_string());
            Ok(Some(json!({ "jsonTopicId": "0.0.77" })))
        }
    }

    /// Replies with a canned result, optionally executing a transaction first.
    struct ScriptedEngine {
        reply: Value,
        wallet: Arc<dyn WalletProvider>,
        seen: Arc<Mutex<Vec<(String, usize)>>>,
    }

    #[async_trait]
    impl AgentEngine for ScriptedEngine {
        async fn process_message(&self, message: &str, history: &[ChatTurn]) -> Result<Value> {
            self.seen.lock().unwrap().push((message.to_string(), history.len()));
            if message == "pay" {
                let executed = self.wallet.execute_bytes("AAEC", Network::Testnet).await?;
                return Ok(json!({ "transactionId": executed.transaction_id }));
            }
            if message == "fail" {
                anyhow::bail!("model refused");
            }
            Ok(self.reply.clone())
        }

        async fn process_form_submission(
            &self,
            submission: &FormSubmission,
            _history: &[ChatTurn],
        ) -> Result<Value> {
            Ok(json!({ "message": format!("form {}", submission.form_id) }))
        }
    }

    struct ScriptedFactory {
        reply: Value,
        created: AtomicUsize,
        seen: Arc<Mutex<Vec<(String, usize)>>>,
    }

    impl ScriptedFactory {
        fn new(reply: Value) -> Arc<Self> {
            Arc::new(Self {
                reply,
                created: AtomicUsize::new(0),
                seen: Arc::default(),
            })
        }
    }

    #[async_trait]
    impl EngineFactory for ScriptedFactory {
        async fn create(
            &self,
            _config: EngineConfig,
            wallet: Arc<dyn WalletProvider>,
        ) -> Result<Arc<dyn AgentEngine>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedEngine {
                reply: self.reply.clone(),
                wallet,
                seen: Arc::clone(&self.seen),
            }))
        }
    }

    fn init_payload() -> Value {
        json!({
            "accountId": "0.0.1001",
            "privateKey": "302e",
            "openAIApiKey": "sk-test",
        })
    }

    fn dispatcher(factory: &Arc<ScriptedFactory>) -> (Dispatcher, Arc<MockWallet>) {
        let wallet = Arc::new(MockWallet::default());
        let dispatcher = Dispatcher::new(
            Arc::clone(factory) as Arc<dyn EngineFactory>,
            Arc::clone(&wallet) as Arc<dyn WalletProvider>,
        );
        (dispatcher, wallet)
    }

    #[tokio::test]
    async fn send_before_initialize_fails() {
        let factory = ScriptedFactory::new(json!({}));
        let (dispatcher, _) = dispatcher(&factory);

        let response = dispatcher
            .dispatch(Some(3), Command::SendMessage(json!({ "message": "hi" })))
            .await;
        assert_eq!(response, CommandResponse::error(Some(3), "Agent not initialized"));
    }

    #[tokio::test]
    async fn missing_model_credential_never_builds_engine() {
        let factory = ScriptedFactory::new(json!({}));
        let (dispatcher, _) = dispatcher(&factory);
        let mut payload = init_payload();
        payload["openAIApiKey"] = json!("");

        let response = dispatcher.dispatch(Some(1), Command::Initialize(payload)).await;
        assert!(!response.success);
        assert_eq!(
            response.error.as_deref(),
            Some("Missing required field: openAIApiKey")
        );
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.status(), json!({ "connected": false }));
    }

    #[tokio::test]
    async fn status_tracks_lifecycle() {
        let factory = ScriptedFactory::new(json!({}));
        let (dispatcher, _) = dispatcher(&factory);

        let response = dispatcher.dispatch(Some(1), Command::Initialize(init_payload())).await;
        assert_eq!(response, CommandResponse::ok(Some(1), json!({ "initialized": true })));
        assert_eq!(
            dispatcher.dispatch(Some(2), Command::Status).await,
            CommandResponse::ok(Some(2), json!({ "connected": true }))
        );

        let response = dispatcher.dispatch(None, Command::Disconnect).await;
        assert_eq!(response, CommandResponse::ok(None, json!({ "disconnected": true })));
        assert_eq!(dispatcher.status(), json!({ "connected": false }));

        // A second disconnect still succeeds
        assert!(dispatcher.dispatch(None, Command::Disconnect).await.success);
    }

    #[tokio::test]
    async fn result_is_reconciled_and_wrapped() {
        let factory = ScriptedFactory::new(json!({
            "message": "Inscribed. Topic ID: 0.0.5",
            "jsonTopicId": "0.0.1",
            "inscription": { "topic_id": "0.0.2" },
        }));
        let (dispatcher, wallet) = dispatcher(&factory);
        dispatcher.initialize(&init_payload()).await.unwrap();

        let data = dispatcher
            .send_message(&json!({
                "message": "inscribe it",
                "attachments": [{ "name": "a.bin", "data": "AAEC" }],
            }))
            .await
            .unwrap();

        let response = &data["response"];
        assert_eq!(response["jsonTopicId"], "0.0.1");
        assert_eq!(response["inscription"]["topic_id"], "0.0.1");
        assert_eq!(response["message"], "Inscribed. Topic ID: 0.0.1");
        assert_eq!(data["attachments"][0]["type"], "application/octet-stream");
        assert!(wallet.fetches.lock().unwrap().is_empty());

        let seen = factory.seen.lock().unwrap();
        assert!(seen[0].0.starts_with("inscribe it\n\n[Attachment: a.bin"));
    }

    #[tokio::test]
    async fn engine_wallet_calls_feed_enrichment() {
        let factory = ScriptedFactory::new(json!({}));
        let (dispatcher, wallet) = dispatcher(&factory);
        dispatcher.initialize(&init_payload()).await.unwrap();

        let data = dispatcher
            .send_message(&json!({ "message": "pay" }))
            .await
            .unwrap();
        assert_eq!(data["response"]["jsonTopicId"], "0.0.77");
        assert_eq!(data["response"]["inscription"]["jsonTopicId"], "0.0.77");
        assert_eq!(data["response"]["inscription"]["hrl"], "hcs://1/0.0.77");
        assert_eq!(*wallet.fetches.lock().unwrap(), vec!["0.0.9-1-000000001"]);
    }

    #[tokio::test]
    async fn form_submission_uses_form_entry_point() {
        let factory = ScriptedFactory::new(json!({}));
        let (dispatcher, _) = dispatcher(&factory);
        dispatcher.initialize(&init_payload()).await.unwrap();

        let data = dispatcher
            .send_message(&json!({
                "message": "ignored",
                "formSubmission": { "formId": "f-9", "toolName": "mint" },
            }))
            .await
            .unwrap();
        assert_eq!(data["response"]["message"], "form f-9");
        assert!(factory.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_is_reported() {
        let factory = ScriptedFactory::new(json!({}));
        let (dispatcher, _) = dispatcher(&factory);
        dispatcher.initialize(&init_payload()).await.unwrap();

        let response = dispatcher
            .dispatch(Some(8), Command::SendMessage(json!({ "message": "fail" })))
            .await;
        assert_eq!(response, CommandResponse::error(Some(8), "model refused"));
        assert!(dispatcher.session().is_ready());
    }

    #[tokio::test]
    async fn history_includes_page_context() {
        use base64::Engine as _;

        let factory = ScriptedFactory::new(json!({ "output": "ok" }));
        let (dispatcher, _) = dispatcher(&factory);
        dispatcher.initialize(&init_payload()).await.unwrap();

        let context = base64::engine::general_purpose::STANDARD.encode(r#"{"url":"https://x.io"}"#);
        dispatcher
            .send_message(&json!({
                "message": "hello",
                "chatHistory": [{ "type": "human", "content": "before" }],
                "attachments": [{ "name": "page-context.json", "data": context }],
            }))
            .await
            .unwrap();

        let seen = factory.seen.lock().unwrap();
        assert_eq!(seen[0], ("hello".to_string(), 2));
    }
}
