//! `sendMessage` payload normalization.
//!
//! Hosts send loosely-shaped turns. Everything here is tolerant: malformed
//! history entries and attachments are dropped rather than failing the turn.
//! Only a form submission that cannot name its form and tool is rejected.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::engine::{ChatRole, ChatTurn, FormSubmission};
use crate::error::DispatchError;
use crate::reconcile::fields::{non_empty_str, string_field};

/// Attachment name carrying the browser page the user is looking at.
pub const PAGE_CONTEXT_NAME: &str = "page-context.json";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const MAX_INLINE_CHARS: usize = 50_000;
const MAX_FAVICONS: usize = 6;
const TEXT_EXTENSIONS: [&str; 4] = [".md", ".txt", ".json", ".csv"];

/// A file the user attached to the turn. `data` stays base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub data: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
}

impl Attachment {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let name = map.get("name")?.as_str()?.to_string();
        let data = map.get("data")?.as_str()?.to_string();
        let content_type = string_field(map, &["type"])
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let size = map.get("size").and_then(Value::as_u64).unwrap_or(0);
        Some(Self {
            name,
            data,
            content_type,
            size,
        })
    }

    pub fn is_page_context(&self) -> bool {
        self.name.trim().eq_ignore_ascii_case(PAGE_CONTEXT_NAME)
    }

    fn is_textual(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        let name = self.name.to_ascii_lowercase();
        content_type.starts_with("text/")
            || content_type == "application/json"
            || content_type == "application/xml"
            || TEXT_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
    }

    /// Decode the payload as text. `None` when it is not valid base64.
    pub fn decode_text(&self) -> Option<String> {
        match STANDARD.decode(self.data.trim()) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!(attachment = %self.name, error = %e, "Attachment is not valid base64");
                None
            }
        }
    }
}

/// Browser page details, rendered into a system turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    pub url: Option<String>,
    pub title: Option<String>,
    pub host: Option<String>,
    pub description: Option<String>,
    pub selection: Option<String>,
    pub favicons: Vec<String>,
}

impl PageContext {
    fn from_attachment(attachment: &Attachment) -> Option<Self> {
        let text = attachment.decode_text()?;
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Page context is not valid JSON");
                return None;
            }
        };
        let Some(map) = value.as_object() else {
            warn!("Page context is not an object");
            return None;
        };
        Some(Self::from_map(map))
    }

    fn from_map(map: &Map<String, Value>) -> Self {
        let owned = |keys: &[&str]| string_field(map, keys).map(str::to_owned);
        let favicons = match map.get("favicons") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(non_empty_str)
                .take(MAX_FAVICONS)
                .map(str::to_owned)
                .collect(),
            Some(value) => non_empty_str(value).map(str::to_owned).into_iter().collect(),
            None => Vec::new(),
        };
        Self {
            url: owned(&["url"]),
            title: owned(&["title"]),
            host: owned(&["host", "hostname"]),
            description: owned(&["description"]),
            selection: owned(&["selection", "selectedText"]),
            favicons,
        }
    }

    /// System turn listing the non-empty fields, or `None` if there are none.
    pub fn to_turn(&self) -> Option<ChatTurn> {
        let mut lines = Vec::new();
        let fields = [
            ("URL", &self.url),
            ("Title", &self.title),
            ("Host", &self.host),
            ("Description", &self.description),
            ("Selected text", &self.selection),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                lines.push(format!("{label}: {value}"));
            }
        }
        if !self.favicons.is_empty() {
            lines.push(format!("Favicons: {}", self.favicons.join(", ")));
        }
        if lines.is_empty() {
            return None;
        }
        Some(ChatTurn {
            role: ChatRole::System,
            content: format!("Current browser page context:\n{}", lines.join("\n")),
        })
    }
}

/// A normalized `sendMessage` turn.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRequest {
    pub text: String,
    pub history: Vec<ChatTurn>,
    pub attachments: Vec<Attachment>,
    pub form: Option<FormSubmission>,
}

impl MessageRequest {
    pub fn from_payload(payload: &Value) -> Result<Self, DispatchError> {
        let empty = Map::new();
        let map = match payload {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(DispatchError::InvalidPayload(
                    "sendMessage expects an object".to_string(),
                ))
            }
        };

        let text = ["message", "content"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        let mut history = parse_history(map.get("chatHistory"));
        let attachments = parse_attachments(map.get("attachments"));
        let form = parse_form(map.get("formSubmission"))?;

        if let Some(turn) = attachments
            .iter()
            .find(|attachment| attachment.is_page_context())
            .and_then(PageContext::from_attachment)
            .and_then(|context| context.to_turn())
        {
            debug!("Appending page context to history");
            history.push(turn);
        }

        Ok(Self {
            text,
            history,
            attachments,
            form,
        })
    }

    /// The free-text prompt with attachment content merged in.
    pub fn prompt(&self) -> String {
        let mut prompt = self.text.clone();
        for attachment in self.attachments.iter().filter(|a| !a.is_page_context()) {
            if !prompt.is_empty() {
                prompt.push_str("\n\n");
            }
            prompt.push_str(&render_attachment(attachment));
        }
        prompt
    }
}

fn render_attachment(attachment: &Attachment) -> String {
    let reference = format!(
        "[Attachment: {} ({}, {} bytes)]",
        attachment.name, attachment.content_type, attachment.size
    );
    if !attachment.is_textual() {
        return reference;
    }
    let Some(text) = attachment.decode_text() else {
        return reference;
    };

    let mut body: String = text.chars().take(MAX_INLINE_CHARS).collect();
    if body.len() < text.len() {
        body.push_str("\n[truncated]");
    }
    format!("{reference}\n```\n{body}\n```")
}

fn parse_history(value: Option<&Value>) -> Vec<ChatTurn> {
    let Some(entries) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let map = entry.as_object()?;
            let content = map.get("content").and_then(Value::as_str)?;
            if content.trim().is_empty() {
                return None;
            }
            let role = match string_field(map, &["type", "role"]) {
                Some("ai" | "assistant") => ChatRole::Ai,
                Some("system") => ChatRole::System,
                _ => ChatRole::Human,
            };
            Some(ChatTurn {
                role,
                content: content.to_string(),
            })
        })
        .collect()
}

fn parse_attachments(value: Option<&Value>) -> Vec<Attachment> {
    let Some(entries) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    let attachments: Vec<Attachment> = entries.iter().filter_map(Attachment::from_value).collect();
    if attachments.len() < entries.len() {
        debug!(
            dropped = entries.len() - attachments.len(),
            "Dropped malformed attachments"
        );
    }
    attachments
}

fn parse_form(value: Option<&Value>) -> Result<Option<FormSubmission>, DispatchError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let map = value.as_object().ok_or_else(|| {
        DispatchError::InvalidPayload("formSubmission must be an object".to_string())
    })?;
    let form_id = string_field(map, &["formId"])
        .ok_or(DispatchError::MissingField("formSubmission.formId"))?;
    let tool_name = string_field(map, &["toolName"])
        .ok_or(DispatchError::MissingField("formSubmission.toolName"))?;

    Ok(Some(FormSubmission {
        form_id: form_id.to_string(),
        tool_name: tool_name.to_string(),
        data: map.get("data").cloned(),
        timestamp: map.get("timestamp").and_then(Value::as_i64),
        original_prompt: string_field(map, &["originalPrompt"]).map(str::to_owned),
        partial_input: map.get("partialInput").cloned(),
    }))
}
