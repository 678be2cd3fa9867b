//! Wallet capabilities provided to the agent engine by calling back into the host.
//!
//! The worker never holds wallet material. Each capability is a thin
//! translation over a [`CallbackTransport`] request.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::channel::CallbackTransport;
use crate::config::{ACTION_EXECUTE_TX, ACTION_INSCRIBE_START};
use crate::error::WalletError;
use crate::network::Network;
use crate::reconcile::fields::string_field;
use crate::reconcile::InscriptionFetcher;

/// Callback action reporting the host wallet's connection.
pub const ACTION_STATUS: &str = "wallet_status";
/// Callback action looking up an inscription by transaction id.
pub const ACTION_INSCRIPTION_FETCH: &str = "wallet_inscription_fetch";

/// Host wallet connection snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatus {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

/// A transaction the host signed and submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedTransaction {
    /// Dashed form, `account-seconds-nanos`.
    pub transaction_id: String,
}

/// Host answer to an inscription start.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InscriptionStart {
    pub transaction_bytes: String,
    pub quote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Any other fields the host returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wallet operations available to the agent engine.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Connection status. Never fails; an unreachable host reads as disconnected.
    async fn status(&self) -> WalletStatus;

    /// Have the host sign and submit base64 transaction bytes.
    async fn execute_bytes(
        &self,
        base64: &str,
        network: Network,
    ) -> Result<ExecutedTransaction, WalletError>;

    /// Ask the host to begin an inscription and return the bytes to sign.
    async fn start_inscription(
        &self,
        request: Value,
        network: Network,
    ) -> Result<InscriptionStart, WalletError>;

    /// Best-effort inscription metadata lookup.
    async fn fetch_inscription(
        &self,
        transaction_id: &str,
        network: Network,
    ) -> Result<Option<Value>, WalletError>;
}

/// [`WalletProvider`] backed by host callbacks.
pub struct HostWallet<T: ?Sized> {
    transport: Arc<T>,
}

impl<T: CallbackTransport + ?Sized> HostWallet<T> {
    pub const fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<T: CallbackTransport + ?Sized> WalletProvider for HostWallet<T> {
    async fn status(&self) -> WalletStatus {
        match self.transport.request(ACTION_STATUS, json!({})).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "Unreadable wallet status, reporting disconnected");
                WalletStatus::default()
            }),
            Err(e) => {
                debug!(error = %e, "Wallet status unavailable");
                WalletStatus::default()
            }
        }
    }

    async fn execute_bytes(
        &self,
        base64: &str,
        network: Network,
    ) -> Result<ExecutedTransaction, WalletError> {
        let data = self
            .transport
            .request(
                ACTION_EXECUTE_TX,
                json!({ "base64": base64, "network": network }),
            )
            .await?;

        let transaction_id = data
            .as_object()
            .and_then(|map| string_field(map, &["transactionId", "transaction_id"]))
            .ok_or(WalletError::MissingField {
                action: ACTION_EXECUTE_TX,
                field: "transactionId",
            })?;

        Ok(ExecutedTransaction {
            transaction_id: to_dashed_transaction_id(transaction_id),
        })
    }

    async fn start_inscription(
        &self,
        request: Value,
        network: Network,
    ) -> Result<InscriptionStart, WalletError> {
        let data = self
            .transport
            .request(
                ACTION_INSCRIBE_START,
                json!({ "request": request, "network": network }),
            )
            .await?;

        let Value::Object(mut map) = data else {
            return Err(WalletError::MissingField {
                action: ACTION_INSCRIBE_START,
                field: "transactionBytes",
            });
        };
        let transaction_bytes = match map.remove("transactionBytes") {
            Some(Value::String(bytes)) if !bytes.trim().is_empty() => bytes,
            _ => {
                return Err(WalletError::MissingField {
                    action: ACTION_INSCRIBE_START,
                    field: "transactionBytes",
                })
            }
        };
        let quote = map
            .remove("quote")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let transaction_id = map
            .remove("transactionId")
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(to_dashed_transaction_id);

        Ok(InscriptionStart {
            transaction_bytes,
            quote,
            transaction_id,
            extra: map,
        })
    }

    async fn fetch_inscription(
        &self,
        transaction_id: &str,
        network: Network,
    ) -> Result<Option<Value>, WalletError> {
        let data = self
            .transport
            .request(
                ACTION_INSCRIPTION_FETCH,
                json!({ "transactionId": transaction_id, "network": network }),
            )
            .await?;
        Ok(match data {
            Value::Null => None,
            other => Some(other),
        })
    }
}

/// Adapter so reconciliation can look up inscriptions through any wallet.
pub struct WalletInscriptions(pub Arc<dyn WalletProvider>);

#[async_trait]
impl InscriptionFetcher for WalletInscriptions {
    async fn fetch_inscription(
        &self,
        transaction_id: &str,
        network: Network,
    ) -> anyhow::Result<Option<Value>> {
        Ok(self.0.fetch_inscription(transaction_id, network).await?)
    }
}

/// Convert `account@seconds.nanos` to `account-seconds-nanos`.
///
/// The nanosecond component is a fraction of a second, so it is padded on
/// the right and cut to exactly nine digits. Ids without `@` are returned
/// unchanged.
pub fn to_dashed_transaction_id(transaction_id: &str) -> String {
    let trimmed = transaction_id.trim();
    let Some((account, timestamp)) = trimmed.split_once('@') else {
        return trimmed.to_string();
    };
    let (seconds, nanos) = timestamp.split_once('.').unwrap_or((timestamp, ""));
    let nanos: String = nanos.chars().chain(std::iter::repeat('0')).take(9).collect();
    format!("{account}-{seconds}-{nanos}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallbackError;
    use std::sync::Mutex;

    /// Replays canned responses and records every request.
    struct ScriptedTransport {
        reply: Box<dyn Fn(&str) -> Result<Value, CallbackError> + Send + Sync>,
        requests: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        fn new(
            reply: impl Fn(&str) -> Result<Value, CallbackError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                reply: Box::new(reply),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CallbackTransport for ScriptedTransport {
        async fn request(&self, action: &str, payload: Value) -> Result<Value, CallbackError> {
            self.requests
                .lock()
                .unwrap()
                .push((action.to_string(), payload));
            (self.reply)(action)
        }
    }

    #[test]
    fn dashed_transaction_ids() {
        assert_eq!(
            to_dashed_transaction_id("0.0.123@1234567890.5"),
            "0.0.123-1234567890-500000000"
        );
        assert_eq!(
            to_dashed_transaction_id("0.0.123@1234567890.123456789999"),
            "0.0.123-1234567890-123456789"
        );
        assert_eq!(
            to_dashed_transaction_id("0.0.123@1234567890"),
            "0.0.123-1234567890-000000000"
        );
        let dashed = "0.0.123-1234567890-500000000";
        assert_eq!(to_dashed_transaction_id(dashed), dashed);
    }

    #[tokio::test]
    async fn status_degrades_when_host_unreachable() {
        let transport = ScriptedTransport::new(|action| {
            Err(CallbackError::Timeout {
                action: action.to_string(),
                timeout_ms: 10,
            })
        });
        let wallet = HostWallet::new(transport);
        assert_eq!(wallet.status().await, WalletStatus::default());
    }

    #[tokio::test]
    async fn status_reports_account() {
        let transport = ScriptedTransport::new(|_| {
            Ok(json!({ "connected": true, "accountId": "0.0.5005", "network": "testnet" }))
        });
        let wallet = HostWallet::new(Arc::clone(&transport));

        let status = wallet.status().await;
        assert!(status.connected);
        assert_eq!(status.account_id.as_deref(), Some("0.0.5005"));
        assert_eq!(transport.requests.lock().unwrap()[0].0, ACTION_STATUS);
    }

    #[tokio::test]
    async fn execute_bytes_returns_dashed_id() {
        let transport =
            ScriptedTransport::new(|_| Ok(json!({ "transactionId": "0.0.9@1700000000.42" })));
        let wallet = HostWallet::new(Arc::clone(&transport));

        let executed = wallet.execute_bytes("AAEC", Network::Mainnet).await.unwrap();
        assert_eq!(executed.transaction_id, "0.0.9-1700000000-420000000");

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].0, ACTION_EXECUTE_TX);
        assert_eq!(requests[0].1, json!({ "base64": "AAEC", "network": "mainnet" }));
    }

    #[tokio::test]
    async fn execute_bytes_requires_transaction_id() {
        let transport = ScriptedTransport::new(|_| Ok(json!({ "transactionId": "" })));
        let wallet = HostWallet::new(transport);

        let err = wallet.execute_bytes("AAEC", Network::Testnet).await.unwrap_err();
        assert!(matches!(err, WalletError::MissingField { field: "transactionId", .. }));
    }

    #[tokio::test]
    async fn execute_bytes_propagates_rejection() {
        let transport = ScriptedTransport::new(|action| {
            Err(CallbackError::Rejected {
                action: action.to_string(),
                message: "User rejected transaction".to_string(),
            })
        });
        let wallet = HostWallet::new(transport);

        let err = wallet.execute_bytes("AAEC", Network::Testnet).await.unwrap_err();
        assert_eq!(err.to_string(), "User rejected transaction");
    }

    #[tokio::test]
    async fn start_inscription_passes_through_quote_and_id() {
        let transport = ScriptedTransport::new(|_| {
            Ok(json!({
                "transactionBytes": "CgQQBxgL",
                "quote": true,
                "transactionId": "0.0.1@2.3",
                "totalCostHbar": "1.5",
            }))
        });
        let wallet = HostWallet::new(transport);

        let started = wallet
            .start_inscription(json!({ "mode": "file" }), Network::Testnet)
            .await
            .unwrap();
        assert_eq!(started.transaction_bytes, "CgQQBxgL");
        assert!(started.quote);
        assert_eq!(started.transaction_id.as_deref(), Some("0.0.1-2-300000000"));
        assert_eq!(started.extra["totalCostHbar"], "1.5");
    }

    #[tokio::test]
    async fn start_inscription_requires_bytes() {
        let transport = ScriptedTransport::new(|_| Ok(json!({ "quote": true })));
        let wallet = HostWallet::new(transport);

        let err = wallet
            .start_inscription(json!({}), Network::Testnet)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Wallet response for 'wallet_inscribe_start' is missing transactionBytes"
        );
    }

    #[tokio::test]
    async fn start_inscription_quote_defaults_false() {
        let transport = ScriptedTransport::new(|_| Ok(json!({ "transactionBytes": "AA==" })));
        let wallet = HostWallet::new(transport);

        let started = wallet
            .start_inscription(json!({}), Network::Testnet)
            .await
            .unwrap();
        assert!(!started.quote);
        assert!(started.transaction_id.is_none());
    }

    #[tokio::test]
    async fn fetch_inscription_maps_null_to_none() {
        let transport = ScriptedTransport::new(|_| Ok(Value::Null));
        let wallet: Arc<dyn WalletProvider> = Arc::new(HostWallet::new(transport));
        assert_eq!(
            wallet
                .fetch_inscription("0.0.1@2.3", Network::Testnet)
                .await
                .unwrap(),
            None
        );

        let fetcher = WalletInscriptions(wallet);
        assert!(fetcher
            .fetch_inscription("0.0.1@2.3", Network::Testnet)
            .await
            .unwrap()
            .is_none());
    }
}
