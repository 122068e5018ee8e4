//! Wire format of the gateway's JSON message protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const EVENT_CAPTCHA_REQUEST: &str = "captcha request";
pub const EVENT_VERIFY_CODE: &str = "verify code";

/// Unique id attached to a command so its reply can be matched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// A fresh random id; never reused across reconnects
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Commands understood by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    /// Ask the gateway to start emitting state and events
    StartListening,
    /// Answer a second-factor challenge
    SetVerifyCode { code: String },
    /// Answer a CAPTCHA challenge
    SetCaptcha { captcha_id: String, answer: String },
    /// Any other command with positional arguments
    Custom { name: String, arguments: Vec<Value> },
}

impl GatewayCommand {
    pub fn name(&self) -> &str {
        match self {
            Self::StartListening => "start_listening",
            Self::SetVerifyCode { .. } => "driver.set_verify_code",
            Self::SetCaptcha { .. } => "driver.set_captcha",
            Self::Custom { name, .. } => name,
        }
    }

    /// Positional argument list, in the order the gateway expects
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::StartListening => Vec::new(),
            Self::SetVerifyCode { code } => vec![Value::from(code.as_str())],
            Self::SetCaptcha { captcha_id, answer } => {
                vec![Value::from(captcha_id.as_str()), Value::from(answer.as_str())]
            }
            Self::Custom { arguments, .. } => arguments.clone(),
        }
    }
}

/// Client → gateway command frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    pub message_id: CorrelationId,
    pub command: String,
    pub arguments: Vec<Value>,
}

impl CommandMessage {
    pub fn new(id: CorrelationId, command: &GatewayCommand) -> Self {
        Self {
            message_id: id,
            command: command.name().to_string(),
            arguments: command.arguments(),
        }
    }
}

/// Gateway → client frame, discriminated by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Event {
        event: EventField,
        #[serde(default)]
        data: Option<Value>,
    },
    Result {
        #[serde(rename = "messageId")]
        message_id: Option<CorrelationId>,
        #[serde(default)]
        success: Option<bool>,
        #[serde(default, rename = "errorCode")]
        error_code: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// The `event` field is either the subtype itself or an object carrying it
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventField {
    Name(String),
    Nested(Value),
}

/// Unsolicited event from the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub subtype: String,
    pub payload: Value,
}

impl GatewayEvent {
    /// Normalise both event layouts into subtype + payload
    pub fn from_parts(event: EventField, data: Option<Value>) -> Option<Self> {
        match event {
            EventField::Name(subtype) => Some(Self {
                subtype,
                payload: data.unwrap_or(Value::Null),
            }),
            EventField::Nested(payload) => {
                let subtype = payload.get("event")?.as_str()?.to_string();
                Some(Self { subtype, payload })
            }
        }
    }

    /// First string field among `keys` in the payload
    pub fn field(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.payload.get(*k)?.as_str())
    }
}
