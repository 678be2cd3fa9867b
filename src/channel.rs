//! Outbound correlated callbacks from worker to host.
//!
//! Each call writes a `bridgeRequest` line with a fresh id and parks a
//! one-shot completion in the pending registry. The reader loop hands
//! matching `bridgeResponse` lines to [`CallbackChannel::resolve`]. Whoever
//! removes the registry entry first (the response or the timeout) decides
//! the outcome; the loser finds nothing and has no effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CallbackConfig;
use crate::error::CallbackError;
use crate::transport::protocol::{CallbackRequest, CallbackRequestEnvelope, CallbackResponse};
use crate::transport::OutputSink;

/// Object payloads are summarised to at most this many keys in logs.
const SUMMARY_MAX_KEYS: usize = 20;

type Completion = oneshot::Sender<Result<Value, String>>;

/// Abstraction over "ask the host to do something and wait for the answer".
///
/// The wallet provider works against this trait so it can be exercised
/// without a live stream.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// Send a callback request and wait for its response.
    async fn request(&self, action: &str, payload: Value) -> Result<Value, CallbackError>;
}

/// Correlates outbound callback requests with inbound responses.
pub struct CallbackChannel {
    sink: OutputSink,
    config: CallbackConfig,
    pending: Mutex<HashMap<String, Completion>>,
    closed: AtomicBool,
}

impl CallbackChannel {
    pub fn new(sink: OutputSink, config: CallbackConfig) -> Arc<Self> {
        Arc::new(Self {
            sink,
            config,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Issue a callback and wait for the host's answer or the timeout.
    pub async fn send(&self, action: &str, payload: Value) -> Result<Value, CallbackError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CallbackError::Closed {
                action: action.to_string(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let timeout = self.config.timeout_for(action);
        let summary = summarize_payload(&payload);

        let envelope = CallbackRequestEnvelope {
            bridge_request: CallbackRequest {
                id: id.clone(),
                action: action.to_string(),
                payload,
            },
        };
        let line = serde_json::to_string(&envelope)?;

        let (tx, mut rx) = oneshot::channel();
        self.lock_pending().insert(id.clone(), tx);
        // Dropped on every exit path, including cancellation of this future.
        let _guard = PendingGuard {
            channel: self,
            id: &id,
        };

        info!(
            action,
            request_id = %id,
            timeout_ms = millis(timeout),
            payload = %summary,
            "Bridge request start"
        );
        let started = Instant::now();

        if self.sink.send_line(line).is_err() {
            warn!(action, request_id = %id, "Bridge request failed: output closed");
            return Err(CallbackError::Closed {
                action: action.to_string(),
            });
        }

        let outcome = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                warn!(action, request_id = %id, "Bridge request abandoned: channel closed");
                return Err(CallbackError::Closed {
                    action: action.to_string(),
                });
            }
            Err(_) => {
                if self.take_pending(&id).is_some() {
                    warn!(
                        action,
                        request_id = %id,
                        elapsed_ms = millis(started.elapsed()),
                        "Bridge request timeout"
                    );
                    return Err(CallbackError::Timeout {
                        action: action.to_string(),
                        timeout_ms: millis(timeout),
                    });
                }
                // The response removed the entry first; its value is already queued.
                match rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return Err(CallbackError::Closed {
                            action: action.to_string(),
                        })
                    }
                }
            }
        };

        let elapsed_ms = millis(started.elapsed());
        match outcome {
            Ok(data) => {
                info!(action, request_id = %id, elapsed_ms, "Bridge request success");
                Ok(data)
            }
            Err(message) => {
                warn!(action, request_id = %id, elapsed_ms, error = %message, "Bridge request failure");
                Err(CallbackError::Rejected {
                    action: action.to_string(),
                    message,
                })
            }
        }
    }

    /// Deliver a host response to its waiting caller.
    ///
    /// Returns `false` when nothing was waiting: an unknown id, a duplicate
    /// response, or a response that lost the race against its timeout.
    pub fn resolve(&self, response: CallbackResponse) -> bool {
        let Some(completion) = self.take_pending(&response.id) else {
            debug!(request_id = %response.id, "Discarding response with no pending request");
            return false;
        };
        // The caller may have been cancelled; nothing left to notify.
        let _ = completion.send(response.into_result());
        true
    }

    /// Fail every pending request and refuse new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.lock_pending().drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Failing pending bridge requests on close");
        }
        // Dropping the senders wakes every waiter with a closed error.
        drop(drained);
    }

    /// Number of callbacks currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn take_pending(&self, id: &str) -> Option<Completion> {
        self.lock_pending().remove(id)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Completion>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CallbackTransport for CallbackChannel {
    async fn request(&self, action: &str, payload: Value) -> Result<Value, CallbackError> {
        self.send(action, payload).await
    }
}

struct PendingGuard<'a> {
    channel: &'a CallbackChannel,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.channel.take_pending(self.id);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Bounded, secret-free description of a payload for logging.
///
/// Objects keep their first keys with a type/size hint per value; values
/// themselves are never logged.
pub fn summarize_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => {
            let mut summary: Map<String, Value> = map
                .iter()
                .take(SUMMARY_MAX_KEYS)
                .map(|(key, value)| (key.clone(), Value::String(describe(value))))
                .collect();
            if map.len() > SUMMARY_MAX_KEYS {
                summary.insert(
                    "…".to_string(),
                    json!(format!("{} more keys", map.len() - SUMMARY_MAX_KEYS)),
                );
            }
            Value::Object(summary)
        }
        other => Value::String(describe(other)),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("string({})", s.len()),
        Value::Array(items) => format!("array({})", items.len()),
        Value::Object(map) => format!("object({})", map.len()),
    }
}
