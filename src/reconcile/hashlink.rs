//! Canonical topic rewriting across every container of a result.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::fields::{find_topic_id, hrl_for, Container, HRL_KEYS, REWRITE_TOPIC_KEYS};

static TOPIC_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(Topic ID:\s*)\d+\.\d+\.\d+").expect("valid topic pattern"));

static HRL_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(HRL:\s*)hcs://\d+/\d+\.\d+\.\d+").expect("valid HRL pattern"));

/// Summary text fields whose embedded identifiers are kept in sync.
const TEXT_KEYS: [&str; 2] = ["message", "output"];

/// What a rewrite pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// No topic identifier anywhere; the result is untouched.
    NoTopicId,
    /// Every container now carries `topic_id`.
    Rewritten { topic_id: String },
}

/// Propagate one canonical topic identifier to every container.
///
/// Idempotent: running it on its own output changes nothing.
pub fn rewrite_hash_link_topic(root: &mut Map<String, Value>) -> RewriteOutcome {
    let Some(topic_id) = find_topic_id(root).map(str::to_owned) else {
        debug!(reason = "no_topic_id", "Skipping hash link rewrite");
        return RewriteOutcome::NoTopicId;
    };
    let hrl = hrl_for(&topic_id);

    root.insert("jsonTopicId".to_string(), Value::String(topic_id.clone()));
    overwrite_topic_keys(root, &topic_id);
    overwrite_locators(root, &hrl);
    rewrite_text_fields(root, &topic_id, &hrl);
    if let Some(block) = Container::HashLinkBlock.get_mut(root) {
        overwrite_locators(block, &hrl);
    }

    for container in Container::NESTED {
        let Some(map) = container.get_mut(root) else {
            continue;
        };
        if !overwrite_topic_keys(map, &topic_id) {
            let key = if container == Container::HashLinkAttributes {
                "topicId"
            } else {
                "jsonTopicId"
            };
            map.insert(key.to_string(), Value::String(topic_id.clone()));
        }
        map.insert("hrl".to_string(), Value::String(hrl.clone()));
        overwrite_locators(map, &hrl);
        rewrite_text_fields(map, &topic_id, &hrl);
    }

    debug!(topic_id = %topic_id, "Rewrote hash link topic");
    RewriteOutcome::Rewritten { topic_id }
}

/// Overwrite existing topic-shaped keys. Returns whether any existed.
fn overwrite_topic_keys(map: &mut Map<String, Value>, topic_id: &str) -> bool {
    let mut found = false;
    for key in REWRITE_TOPIC_KEYS {
        if let Some(slot) = map.get_mut(key) {
            *slot = Value::String(topic_id.to_string());
            found = true;
        }
    }
    found
}

/// Overwrite existing `hrl`/`hashLink` locators.
fn overwrite_locators(map: &mut Map<String, Value>, hrl: &str) {
    for key in HRL_KEYS {
        if let Some(slot) = map.get_mut(key) {
            *slot = Value::String(hrl.to_string());
        }
    }
}

fn rewrite_text_fields(map: &mut Map<String, Value>, topic_id: &str, hrl: &str) {
    for key in TEXT_KEYS {
        let Some(Value::String(text)) = map.get_mut(key) else {
            continue;
        };
        *text = rewrite_summary(text, topic_id, hrl);
    }
}

/// Replace embedded `Topic ID: ...` and `HRL: ...` mentions in summary text.
pub fn rewrite_summary(text: &str, topic_id: &str, hrl: &str) -> String {
    let text = TOPIC_TEXT.replace_all(text, |caps: &regex::Captures<'_>| {
        format!("{}{topic_id}", &caps[1])
    });
    HRL_TEXT
        .replace_all(&text, |caps: &regex::Captures<'_>| format!("{}{hrl}", &caps[1]))
        .into_owned()
}
