//! Kernel messaging domain types.
//!
//! Defines the `KernelMessage` envelope exchanged between teams and the host
//! bus, and the closed set of message types it may carry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of kernel message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Activate,
    ActivationResult,
    BudgetRequest,
    BudgetGrant,
    BudgetExceeded,
    /// Cross-team signal delivery; payload carries `{ "bit": n }`.
    SignalForward,
    SignalAck,
    ScheduleRequest,
    ScheduleResponse,
    Yield,
    Sleep,
    Wake,
    /// Informational record, e.g. a swallowed background failure.
    Observation,
    Query,
    Response,
    Error,
    Heartbeat,
    Shutdown,
}

impl MessageType {
    pub const ALL: [MessageType; 18] = [
        MessageType::Activate,
        MessageType::ActivationResult,
        MessageType::BudgetRequest,
        MessageType::BudgetGrant,
        MessageType::BudgetExceeded,
        MessageType::SignalForward,
        MessageType::SignalAck,
        MessageType::ScheduleRequest,
        MessageType::ScheduleResponse,
        MessageType::Yield,
        MessageType::Sleep,
        MessageType::Wake,
        MessageType::Observation,
        MessageType::Query,
        MessageType::Response,
        MessageType::Error,
        MessageType::Heartbeat,
        MessageType::Shutdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::ActivationResult => "activation-result",
            Self::BudgetRequest => "budget-request",
            Self::BudgetGrant => "budget-grant",
            Self::BudgetExceeded => "budget-exceeded",
            Self::SignalForward => "signal-forward",
            Self::SignalAck => "signal-ack",
            Self::ScheduleRequest => "schedule-request",
            Self::ScheduleResponse => "schedule-response",
            Self::Yield => "yield",
            Self::Sleep => "sleep",
            Self::Wake => "wake",
            Self::Observation => "observation",
            Self::Query => "query",
            Self::Response => "response",
            Self::Error => "error",
            Self::Heartbeat => "heartbeat",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown message type '{s}'"))
    }
}

/// A message exchanged through the kernel.
///
/// `priority` is a signed byte: the range `[-128, 127]` is enforced by the
/// type, both when building and when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelMessage {
    /// UUIDv7 message ID.
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub priority: i8,
    /// Where replies should be routed. Only messages that declare one can be replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_port: Option<String>,
    #[serde(default)]
    pub token_cost: u64,
    pub sender: String,
    pub receiver: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Uuid>,
}

impl KernelMessage {
    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
    }

    pub fn expects_reply(&self) -> bool {
        self.reply_port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> KernelMessage {
        KernelMessage {
            id: Uuid::now_v7(),
            message_type: MessageType::SignalForward,
            priority: -5,
            reply_port: Some("alpha.inbox".to_string()),
            token_cost: 0,
            sender: "alpha".to_string(),
            receiver: "beta".to_string(),
            payload: json!({"bit": 3}),
            timestamp: Utc::now(),
            in_reply_to: None,
        }
    }

    #[test]
    fn test_kernel_message_json_shape() {
        let json_str = serde_json::to_string(&sample()).unwrap();
        assert!(json_str.contains("\"type\":\"signal-forward\""));
        assert!(json_str.contains("\"replyPort\":\"alpha.inbox\""));
        assert!(json_str.contains("\"tokenCost\":0"));
        assert!(!json_str.contains("inReplyTo"));

        let parsed: KernelMessage = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.message_type, MessageType::SignalForward);
        assert_eq!(parsed.priority, -5);
    }

    #[test]
    fn test_message_type_has_eighteen_kebab_values() {
        assert_eq!(MessageType::ALL.len(), 18);
        for t in MessageType::ALL {
            let encoded = serde_json::to_value(t).unwrap();
            assert_eq!(encoded, json!(t.as_str()));
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        assert!("teleport".parse::<MessageType>().is_err());
        let result: Result<MessageType, _> = serde_json::from_value(json!("teleport"));
        assert!(result.is_err());
    }

    #[test]
    fn test_priority_out_of_range_fails_to_deserialize() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["priority"] = json!(200);
        let result: Result<KernelMessage, _> = serde_json::from_value(value);
        assert!(result.is_err());
    }
}
