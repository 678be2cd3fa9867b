//! Inscription lookup for results that lack a topic identifier.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::fields::{
    find_direct_topic_id, find_network, find_topic_id, find_transaction_id, string_field,
};
use crate::network::Network;

/// Source of inscription records, keyed by the transaction that created them.
#[async_trait]
pub trait InscriptionFetcher: Send + Sync {
    /// Look up the inscription created by `transaction_id`.
    ///
    /// `Ok(None)` means the host had no record.
    async fn fetch_inscription(
        &self,
        transaction_id: &str,
        network: Network,
    ) -> anyhow::Result<Option<Value>>;
}

/// Why enrichment did or did not happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// A topic identifier was already present.
    AlreadyPresent,
    /// Nothing to look the inscription up by.
    NoTransactionId,
    /// No fetcher is wired in.
    NoProvider,
    /// The lookup itself failed.
    FetchFailed(String),
    /// The host returned no record.
    EmptyRecord,
    /// The record carried no topic identifier.
    RecordWithoutTopic,
    /// The result now carries `topic_id`.
    Enriched { topic_id: String },
}

impl EnrichmentOutcome {
    const fn reason(&self) -> &'static str {
        match self {
            Self::AlreadyPresent => "already_present",
            Self::NoTransactionId => "no_transaction_id",
            Self::NoProvider => "no_provider",
            Self::FetchFailed(_) => "fetch_failed",
            Self::EmptyRecord => "empty_record",
            Self::RecordWithoutTopic => "record_without_topic",
            Self::Enriched { .. } => "enriched",
        }
    }
}

/// Add a JSON topic identifier fetched from the host when none is present.
///
/// Best-effort: every failure leaves `root` unchanged and is reported
/// through the returned outcome and the log.
pub async fn ensure_json_topic_metadata(
    root: &mut Map<String, Value>,
    fetcher: Option<&dyn InscriptionFetcher>,
) -> EnrichmentOutcome {
    let outcome = enrich(root, fetcher).await;
    match &outcome {
        EnrichmentOutcome::Enriched { topic_id } => {
            info!(topic_id = %topic_id, "Enriched result with inscription topic");
        }
        EnrichmentOutcome::FetchFailed(error) => {
            warn!(reason = outcome.reason(), error = %error, "Skipping topic enrichment");
        }
        other => {
            debug!(reason = other.reason(), "Skipping topic enrichment");
        }
    }
    outcome
}

async fn enrich(
    root: &mut Map<String, Value>,
    fetcher: Option<&dyn InscriptionFetcher>,
) -> EnrichmentOutcome {
    if find_direct_topic_id(root).is_some() {
        return EnrichmentOutcome::AlreadyPresent;
    }
    let Some(transaction_id) = find_transaction_id(root).map(str::to_owned) else {
        return EnrichmentOutcome::NoTransactionId;
    };
    let Some(fetcher) = fetcher else {
        return EnrichmentOutcome::NoProvider;
    };
    let network = Network::parse_or_default(find_network(root));

    let record = match fetcher.fetch_inscription(&transaction_id, network).await {
        Ok(Some(Value::Object(record))) if !record.is_empty() => record,
        Ok(Some(Value::Object(_) | Value::Null) | None) => return EnrichmentOutcome::EmptyRecord,
        Ok(Some(other)) => {
            return EnrichmentOutcome::FetchFailed(format!(
                "expected an inscription object, got {}",
                value_kind(&other)
            ))
        }
        Err(error) => return EnrichmentOutcome::FetchFailed(format!("{error:#}")),
    };

    let Some(topic_id) = find_topic_id(&record).map(str::to_owned) else {
        return EnrichmentOutcome::RecordWithoutTopic;
    };
    let image_topic_id = image_topic(root, &record, &topic_id);

    root.insert("jsonTopicId".to_string(), Value::String(topic_id.clone()));

    let mut inscription = root
        .get("inscription")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    inscription.extend(record);
    inscription.insert("jsonTopicId".to_string(), Value::String(topic_id.clone()));
    if let Some(image) = image_topic_id {
        inscription.insert("imageTopicId".to_string(), Value::String(image));
    }
    root.insert("inscription".to_string(), Value::Object(inscription));

    EnrichmentOutcome::Enriched { topic_id }
}

/// Pick the image topic: the fetched `topic_id` when it differs from the
/// JSON topic, otherwise whatever image topic the result already implies.
fn image_topic(
    root: &Map<String, Value>,
    record: &Map<String, Value>,
    json_topic_id: &str,
) -> Option<String> {
    const IMAGE_KEYS: [&str; 2] = ["imageTopicId", "image_topic_id"];

    let fetched = string_field(record, &["topic_id", "topicId"]).filter(|id| *id != json_topic_id);
    let inferred = || {
        string_field(record, &IMAGE_KEYS)
            .or_else(|| {
                root.get("inscription")
                    .and_then(Value::as_object)
                    .and_then(|inscription| string_field(inscription, &IMAGE_KEYS))
            })
            .or_else(|| string_field(root, &IMAGE_KEYS))
    };
    fetched.or_else(inferred).map(str::to_owned)
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
