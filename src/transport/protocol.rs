//! Wire envelopes.
//!
//! One JSON object per line in both directions. The shape of an inbound
//! line is decided by its keys: `bridgeResponse` answers a callback the
//! worker issued, `action` is a command from the host.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Command sent from host to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub id: Option<u64>,
    pub action: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Response to a command, sent from worker to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: Option<u64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub const fn ok(id: Option<u64>, data: Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Callback request sent from worker to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub id: String,
    pub action: String,
    pub payload: Value,
}

/// Callback response sent from host to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CallbackResponse {
    /// Collapse into the caller-facing result.
    pub fn into_result(self) -> Result<Value, String> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "Bridge request failed".to_string()))
        }
    }
}

/// `{"bridgeRequest": {...}}` wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequestEnvelope {
    pub bridge_request: CallbackRequest,
}

/// A classified inbound line.
#[derive(Debug)]
pub enum Inbound {
    /// Answer to a callback this worker issued.
    CallbackResponse(CallbackResponse),
    /// A command to dispatch.
    Command(CommandRequest),
    /// A `bridgeResponse`/`bridgeRequest` line that cannot be acted on.
    Ignored(String),
}

impl Inbound {
    /// Classify one line of input.
    ///
    /// Returns the caller id (when one could be read) alongside any error
    /// so the failure can still be answered.
    pub fn parse(line: &str) -> Result<Self, (Option<u64>, ProtocolError)> {
        let value: Value = serde_json::from_str(line).map_err(|e| (None, ProtocolError::Parse(e)))?;

        if let Some(response) = value.get("bridgeResponse") {
            return Ok(
                match serde_json::from_value::<CallbackResponse>(response.clone()) {
                    Ok(response) => Self::CallbackResponse(response),
                    Err(e) => Self::Ignored(format!("malformed bridgeResponse: {e}")),
                },
            );
        }
        if value.get("bridgeRequest").is_some() {
            return Ok(Self::Ignored("unexpected bridgeRequest from host".to_string()));
        }

        let id = value.get("id").and_then(Value::as_u64);
        match value.get("action") {
            Some(Value::String(_)) => serde_json::from_value(value)
                .map(Self::Command)
                .map_err(|e| (id, ProtocolError::Parse(e))),
            _ => Err((id, ProtocolError::MissingAction)),
        }
    }
}

/// Commands understood by the dispatch runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Initialize(Value),
    SendMessage(Value),
    Status,
    Disconnect,
}

impl Command {
    /// Map a request's action onto a command.
    pub fn from_request(request: CommandRequest) -> Result<Self, ProtocolError> {
        let payload = request.payload.unwrap_or(Value::Null);
        match request.action.as_str() {
            "initialize" => Ok(Self::Initialize(payload)),
            "sendMessage" => Ok(Self::SendMessage(payload)),
            "status" => Ok(Self::Status),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }

    pub const fn action(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::SendMessage(_) => "sendMessage",
            Self::Status => "status",
            Self::Disconnect => "disconnect",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_command() {
        let inbound = Inbound::parse(r#"{"id":7,"action":"status"}"#).unwrap();
        let Inbound::Command(request) = inbound else {
            panic!("expected command");
        };
        assert_eq!(request.id, Some(7));
        assert_eq!(Command::from_request(request).unwrap(), Command::Status);
    }

    #[test]
    fn parse_callback_response() {
        let line = r#"{"bridgeResponse":{"id":"abc","success":true,"data":{"ok":1}}}"#;
        let Inbound::CallbackResponse(response) = Inbound::parse(line).unwrap() else {
            panic!("expected callback response");
        };
        assert_eq!(response.id, "abc");
        assert_eq!(response.into_result().unwrap(), json!({"ok": 1}));
    }

    #[test]
    fn bridge_response_takes_priority_over_action() {
        let line = r#"{"action":"status","bridgeResponse":{"id":"x","success":false}}"#;
        assert!(matches!(
            Inbound::parse(line).unwrap(),
            Inbound::CallbackResponse(_)
        ));
    }

    #[test]
    fn malformed_bridge_response_is_ignored() {
        let line = r#"{"bridgeResponse":{"success":true}}"#;
        assert!(matches!(Inbound::parse(line).unwrap(), Inbound::Ignored(_)));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let (id, err) = Inbound::parse("not json").unwrap_err();
        assert_eq!(id, None);
        assert!(matches!(err, ProtocolError::Parse(_)));
    }

    #[test]
    fn missing_action_keeps_id() {
        let (id, err) = Inbound::parse(r#"{"id":3,"payload":{}}"#).unwrap_err();
        assert_eq!(id, Some(3));
        assert!(matches!(err, ProtocolError::MissingAction));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let request = CommandRequest {
            id: Some(1),
            action: "reboot".to_string(),
            payload: None,
        };
        let err = Command::from_request(request).unwrap_err();
        assert_eq!(err.to_string(), "Unknown action: reboot");
    }

    #[test]
    fn failed_callback_defaults_message() {
        let response = CallbackResponse {
            id: "1".to_string(),
            success: false,
            data: None,
            error: None,
        };
        assert_eq!(response.into_result().unwrap_err(), "Bridge request failed");
    }

    #[test]
    fn serialize_envelopes() {
        let envelope = CallbackRequestEnvelope {
            bridge_request: CallbackRequest {
                id: "u1".to_string(),
                action: "wallet_status".to_string(),
                payload: json!({}),
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.starts_with(r#"{"bridgeRequest":{"id":"u1""#));

        let response = CommandResponse::error(None, "boom");
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"id":null,"success":false,"error":"boom"}"#);
    }
}
