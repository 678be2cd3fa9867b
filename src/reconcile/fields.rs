//! Field lookup over the known container shapes of a process result.
//!
//! Agent results carry the same identifiers under several containers and
//! several spellings. Every lookup goes through the ordered source tables
//! here so precedence is defined in exactly one place.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Keys that directly hold a JSON topic identifier.
pub const TOPIC_KEYS: [&str; 4] = [
    "jsonTopicId",
    "json_topic_id",
    "metadataTopicId",
    "metadata_topic_id",
];

/// Every topic-identifier-shaped key rewritten during reconciliation.
pub const REWRITE_TOPIC_KEYS: [&str; 6] = [
    "jsonTopicId",
    "json_topic_id",
    "metadataTopicId",
    "metadata_topic_id",
    "topicId",
    "topic_id",
];

/// Keys that hold a transaction identifier.
pub const TRANSACTION_KEYS: [&str; 2] = ["transactionId", "transaction_id"];

/// Keys holding an HRL string.
pub const HRL_KEYS: [&str; 2] = ["hrl", "hashLink"];

static HRL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"hcs://\d+/(\d+\.\d+\.\d+)").expect("valid HRL pattern"));

/// A known location inside a process result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Root,
    Metadata,
    Inscription,
    Result,
    HashLinkBlock,
    HashLinkAttributes,
}

impl Container {
    /// Nested containers rewritten during reconciliation, in write order.
    pub const NESTED: [Self; 4] = [
        Self::Inscription,
        Self::Result,
        Self::Metadata,
        Self::HashLinkAttributes,
    ];

    /// Borrow this container's object, if the result has one.
    pub fn get(self, root: &Map<String, Value>) -> Option<&Map<String, Value>> {
        match self {
            Self::Root => Some(root),
            Self::Metadata => root.get("metadata").and_then(Value::as_object),
            Self::Inscription => root.get("inscription").and_then(Value::as_object),
            Self::Result => root.get("result").and_then(Value::as_object),
            Self::HashLinkBlock => root.get("hashLinkBlock").and_then(Value::as_object),
            Self::HashLinkAttributes => root
                .get("hashLinkBlock")
                .and_then(|block| block.get("attributes"))
                .and_then(Value::as_object),
        }
    }

    /// Mutably borrow this container's object, if the result has one.
    pub fn get_mut(self, root: &mut Map<String, Value>) -> Option<&mut Map<String, Value>> {
        match self {
            Self::Root => Some(root),
            Self::Metadata => root.get_mut("metadata").and_then(Value::as_object_mut),
            Self::Inscription => root.get_mut("inscription").and_then(Value::as_object_mut),
            Self::Result => root.get_mut("result").and_then(Value::as_object_mut),
            Self::HashLinkBlock => root.get_mut("hashLinkBlock").and_then(Value::as_object_mut),
            Self::HashLinkAttributes => root
                .get_mut("hashLinkBlock")
                .and_then(|block| block.get_mut("attributes"))
                .and_then(Value::as_object_mut),
        }
    }
}

/// How a source value is turned into a topic identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// The value is the identifier itself.
    Direct,
    /// The identifier is embedded in an `hcs://<n>/<id>` locator.
    Hrl,
}

/// One lookup location: container, key, and how to read it.
pub type Source = (Container, &'static str, SourceKind);

/// Number of direct entries at the head of [`TOPIC_SOURCES`].
const DIRECT_TOPIC_SOURCES: usize = 16;

/// Authoritative topic-identifier precedence.
///
/// Direct identifiers win over locators; the top level wins over nested
/// containers; the hash-link block is the first locator consulted.
pub const TOPIC_SOURCES: [Source; 28] = [
    (Container::Root, "jsonTopicId", SourceKind::Direct),
    (Container::Root, "json_topic_id", SourceKind::Direct),
    (Container::Root, "metadataTopicId", SourceKind::Direct),
    (Container::Root, "metadata_topic_id", SourceKind::Direct),
    (Container::Inscription, "jsonTopicId", SourceKind::Direct),
    (Container::Inscription, "json_topic_id", SourceKind::Direct),
    (Container::Inscription, "metadataTopicId", SourceKind::Direct),
    (Container::Inscription, "metadata_topic_id", SourceKind::Direct),
    (Container::Result, "jsonTopicId", SourceKind::Direct),
    (Container::Result, "json_topic_id", SourceKind::Direct),
    (Container::Result, "metadataTopicId", SourceKind::Direct),
    (Container::Result, "metadata_topic_id", SourceKind::Direct),
    (Container::Metadata, "jsonTopicId", SourceKind::Direct),
    (Container::Metadata, "json_topic_id", SourceKind::Direct),
    (Container::Metadata, "metadataTopicId", SourceKind::Direct),
    (Container::Metadata, "metadata_topic_id", SourceKind::Direct),
    (Container::HashLinkAttributes, "hrl", SourceKind::Hrl),
    (Container::HashLinkAttributes, "hashLink", SourceKind::Hrl),
    (Container::HashLinkBlock, "hrl", SourceKind::Hrl),
    (Container::HashLinkBlock, "hashLink", SourceKind::Hrl),
    (Container::Root, "hrl", SourceKind::Hrl),
    (Container::Root, "hashLink", SourceKind::Hrl),
    (Container::Inscription, "hrl", SourceKind::Hrl),
    (Container::Inscription, "hashLink", SourceKind::Hrl),
    (Container::Result, "hrl", SourceKind::Hrl),
    (Container::Result, "hashLink", SourceKind::Hrl),
    (Container::Metadata, "hrl", SourceKind::Hrl),
    (Container::Metadata, "hashLink", SourceKind::Hrl),
];

/// Transaction-identifier precedence.
pub const TRANSACTION_SOURCES: [Source; 8] = [
    (Container::Root, "transactionId", SourceKind::Direct),
    (Container::Root, "transaction_id", SourceKind::Direct),
    (Container::Inscription, "transactionId", SourceKind::Direct),
    (Container::Inscription, "transaction_id", SourceKind::Direct),
    (Container::Result, "transactionId", SourceKind::Direct),
    (Container::Result, "transaction_id", SourceKind::Direct),
    (Container::Metadata, "transactionId", SourceKind::Direct),
    (Container::Metadata, "transaction_id", SourceKind::Direct),
];

/// Network-name precedence.
pub const NETWORK_SOURCES: [Source; 4] = [
    (Container::Root, "network", SourceKind::Direct),
    (Container::Metadata, "network", SourceKind::Direct),
    (Container::Inscription, "network", SourceKind::Direct),
    (Container::Result, "network", SourceKind::Direct),
];

/// Return a trimmed, non-empty string value.
pub fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// First non-empty string under any of `keys`.
pub fn string_field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(non_empty_str))
}

/// Extract the topic identifier from an `hcs://<n>/<id>` locator.
pub fn parse_hrl(text: &str) -> Option<&str> {
    HRL_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Build the canonical locator for a topic.
pub fn hrl_for(topic_id: &str) -> String {
    format!("hcs://1/{topic_id}")
}

/// Resolve the first value across `sources`, in order.
pub fn resolve<'a>(root: &'a Map<String, Value>, sources: &[Source]) -> Option<&'a str> {
    sources.iter().find_map(|&(container, key, kind)| {
        let value = container.get(root)?.get(key)?;
        let text = non_empty_str(value)?;
        match kind {
            SourceKind::Direct => Some(text),
            SourceKind::Hrl => parse_hrl(text),
        }
    })
}

/// Topic identifier discoverable anywhere in the result.
pub fn find_topic_id(root: &Map<String, Value>) -> Option<&str> {
    resolve(root, &TOPIC_SOURCES)
}

/// Topic identifier stored as a plain field, ignoring locators.
pub fn find_direct_topic_id(root: &Map<String, Value>) -> Option<&str> {
    resolve(root, direct_topic_sources())
}

/// The leading [`SourceKind::Direct`] entries of [`TOPIC_SOURCES`].
pub fn direct_topic_sources() -> &'static [Source] {
    &TOPIC_SOURCES[..DIRECT_TOPIC_SOURCES]
}

/// Transaction identifier discoverable anywhere in the result.
pub fn find_transaction_id(root: &Map<String, Value>) -> Option<&str> {
    resolve(root, &TRANSACTION_SOURCES)
}

/// Network name discoverable anywhere in the result.
pub fn find_network(root: &Map<String, Value>) -> Option<&str> {
    resolve(root, &NETWORK_SOURCES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn parse_hrl_extracts_topic() {
        assert_eq!(parse_hrl("hcs://1/0.0.12345"), Some("0.0.12345"));
        assert_eq!(parse_hrl("see hcs://6/0.0.9 for details"), Some("0.0.9"));
        assert_eq!(parse_hrl("hcs://x/0.0.9"), None);
        assert_eq!(parse_hrl("0.0.9"), None);
    }

    #[test]
    fn top_level_beats_nested() {
        let root = object(json!({
            "inscription": { "jsonTopicId": "0.0.2" },
            "json_topic_id": "0.0.1",
        }));
        assert_eq!(find_topic_id(&root), Some("0.0.1"));
    }

    #[test]
    fn inscription_beats_result_and_metadata() {
        let root = object(json!({
            "metadata": { "jsonTopicId": "0.0.4" },
            "result": { "metadata_topic_id": "0.0.3" },
            "inscription": { "jsonTopicId": "0.0.2" },
        }));
        assert_eq!(find_topic_id(&root), Some("0.0.2"));
    }

    #[test]
    fn hash_link_block_is_last_resort() {
        let root = object(json!({
            "hashLinkBlock": { "attributes": { "hrl": "hcs://1/0.0.77" } },
            "hrl": "hcs://1/0.0.88",
        }));
        assert_eq!(find_topic_id(&root), Some("0.0.77"));

        let direct = object(json!({
            "hashLinkBlock": { "attributes": { "hrl": "hcs://1/0.0.77" } },
            "metadata": { "metadataTopicId": "0.0.5" },
        }));
        assert_eq!(find_topic_id(&direct), Some("0.0.5"));
    }

    #[test]
    fn direct_sources_precede_locators() {
        let (direct, locators) = TOPIC_SOURCES.split_at(DIRECT_TOPIC_SOURCES);
        assert!(direct.iter().all(|&(_, _, kind)| kind == SourceKind::Direct));
        assert!(locators.iter().all(|&(_, _, kind)| kind == SourceKind::Hrl));
        assert_eq!(direct_topic_sources(), direct);
    }

    #[test]
    fn direct_lookup_ignores_locators() {
        let root = object(json!({
            "hashLinkBlock": { "attributes": { "hrl": "hcs://1/0.0.42" } },
            "inscription": { "hashLink": "hcs://1/0.0.43" },
        }));
        assert_eq!(find_direct_topic_id(&root), None);
        assert_eq!(find_topic_id(&root), Some("0.0.42"));

        let root = object(json!({ "result": { "json_topic_id": "0.0.7" } }));
        assert_eq!(find_direct_topic_id(&root), Some("0.0.7"));
    }

    #[test]
    fn blank_values_are_skipped() {
        let root = object(json!({
            "jsonTopicId": "  ",
            "inscription": { "json_topic_id": "0.0.6" },
        }));
        assert_eq!(find_topic_id(&root), Some("0.0.6"));
    }

    #[test]
    fn non_object_containers_are_ignored() {
        let root = object(json!({ "inscription": "pending", "result": [1, 2] }));
        assert_eq!(Container::Inscription.get(&root), None);
        assert_eq!(find_topic_id(&root), None);
    }

    #[test]
    fn transaction_and_network_lookup() {
        let root = object(json!({
            "metadata": { "network": "mainnet" },
            "result": { "transaction_id": "0.0.1@1.2" },
        }));
        assert_eq!(find_transaction_id(&root), Some("0.0.1@1.2"));
        assert_eq!(find_network(&root), Some("mainnet"));
    }
}
