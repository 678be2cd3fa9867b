//! Metadata reconciliation for agent-engine results.
//!
//! Results come back with the same topic identifier spread over several
//! containers and spellings. Every result passes through
//! [`ensure_json_topic_metadata`] and then [`rewrite_hash_link_topic`]
//! before it is written to the host.

pub mod enrich;
pub mod fields;
pub mod hashlink;

pub use enrich::{ensure_json_topic_metadata, EnrichmentOutcome, InscriptionFetcher};
pub use hashlink::{rewrite_hash_link_topic, RewriteOutcome};

use serde_json::{Map, Value};

/// A process result as returned by the agent engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessResult {
    /// An object whose known containers can be reconciled.
    Structured(Map<String, Value>),
    /// Anything else; passed through untouched.
    Unstructured(Value),
}

impl From<Value> for ProcessResult {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Structured(map),
            other => Self::Unstructured(other),
        }
    }
}

impl From<ProcessResult> for Value {
    fn from(result: ProcessResult) -> Self {
        match result {
            ProcessResult::Structured(map) => Self::Object(map),
            ProcessResult::Unstructured(value) => value,
        }
    }
}

/// Run both reconciliation passes over a result.
pub async fn reconcile(result: Value, fetcher: Option<&dyn InscriptionFetcher>) -> Value {
    match ProcessResult::from(result) {
        ProcessResult::Structured(mut map) => {
            ensure_json_topic_metadata(&mut map, fetcher).await;
            rewrite_hash_link_topic(&mut map);
            Value::Object(map)
        }
        ProcessResult::Unstructured(value) => value,
    }
}
