//! Constructors and validation for `KernelMessage` envelopes.
//!
//! `create_message` fills the id, timestamp and defaults; `create_reply`
//! routes a reply back to the original sender and is only allowed when the
//! original declared a reply port.

use chrono::Utc;
use coproc_types::message::{KernelMessage, MessageType};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while building or parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The original message did not declare a reply port.
    #[error("message {0} has no reply port and cannot be replied to")]
    NoReplyPort(Uuid),

    /// A required field is missing or out of range.
    #[error("invalid message: {0}")]
    Validation(String),

    /// JSON decoding failure (unknown type, priority out of range, ...).
    #[error("parse error: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

/// The caller-supplied part of a new message.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub message_type: MessageType,
    pub sender: String,
    pub receiver: String,
    pub payload: Value,
    pub priority: i8,
    pub reply_port: Option<String>,
    pub token_cost: u64,
}

impl MessageDraft {
    pub fn new(
        message_type: MessageType,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            message_type,
            sender: sender.into(),
            receiver: receiver.into(),
            payload,
            priority: 0,
            reply_port: None,
            token_cost: 0,
        }
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reply_port(mut self, port: impl Into<String>) -> Self {
        self.reply_port = Some(port.into());
        self
    }

    pub fn with_token_cost(mut self, tokens: u64) -> Self {
        self.token_cost = tokens;
        self
    }
}

/// The caller-supplied part of a reply. Receiver and correlation come from
/// the original message.
#[derive(Debug, Clone)]
pub struct ReplyDraft {
    pub message_type: MessageType,
    pub sender: String,
    pub payload: Value,
    pub priority: i8,
    pub reply_port: Option<String>,
    pub token_cost: u64,
}

impl ReplyDraft {
    pub fn new(message_type: MessageType, sender: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type,
            sender: sender.into(),
            payload,
            priority: 0,
            reply_port: None,
            token_cost: 0,
        }
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reply_port(mut self, port: impl Into<String>) -> Self {
        self.reply_port = Some(port.into());
        self
    }

    pub fn with_token_cost(mut self, tokens: u64) -> Self {
        self.token_cost = tokens;
        self
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Build a message, assigning a UUIDv7 id and the current timestamp.
pub fn create_message(draft: MessageDraft) -> Result<KernelMessage, MessageError> {
    let msg = KernelMessage {
        id: Uuid::now_v7(),
        message_type: draft.message_type,
        priority: draft.priority,
        reply_port: draft.reply_port,
        token_cost: draft.token_cost,
        sender: draft.sender,
        receiver: draft.receiver,
        payload: draft.payload,
        timestamp: Utc::now(),
        in_reply_to: None,
    };
    validate_message(&msg)?;
    Ok(msg)
}

/// Build a reply to `original`, addressed to its sender.
pub fn create_reply(
    original: &KernelMessage,
    draft: ReplyDraft,
) -> Result<KernelMessage, MessageError> {
    if original.reply_port.is_none() {
        return Err(MessageError::NoReplyPort(original.id));
    }
    let msg = KernelMessage {
        id: Uuid::now_v7(),
        message_type: draft.message_type,
        priority: draft.priority,
        reply_port: draft.reply_port,
        token_cost: draft.token_cost,
        sender: draft.sender,
        receiver: original.sender.clone(),
        payload: draft.payload,
        timestamp: Utc::now(),
        in_reply_to: Some(original.id),
    };
    validate_message(&msg)?;
    Ok(msg)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check the constraints the type system does not carry.
///
/// Message type, priority range and non-negative token cost are enforced by
/// `MessageType`, `i8` and `u64` respectively.
pub fn validate_message(msg: &KernelMessage) -> Result<(), MessageError> {
    if msg.sender.trim().is_empty() {
        return Err(MessageError::Validation("sender must not be empty".to_string()));
    }
    if msg.receiver.trim().is_empty() {
        return Err(MessageError::Validation("receiver must not be empty".to_string()));
    }
    if let Some(port) = &msg.reply_port {
        if port.trim().is_empty() {
            return Err(MessageError::Validation(
                "reply port must not be empty when present".to_string(),
            ));
        }
    }
    Ok(())
}

/// Decode and validate a message received as JSON.
pub fn parse_message(json: &str) -> Result<KernelMessage, MessageError> {
    let msg: KernelMessage =
        serde_json::from_str(json).map_err(|e| MessageError::Parse(e.to_string()))?;
    validate_message(&msg)?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query() -> MessageDraft {
        MessageDraft::new(MessageType::Query, "alpha", "beta", json!({"q": "status"}))
    }

    #[test]
    fn create_message_fills_defaults() {
        let msg = create_message(query()).unwrap();
        assert_eq!(msg.priority, 0);
        assert_eq!(msg.token_cost, 0);
        assert!(msg.reply_port.is_none());
        assert!(msg.in_reply_to.is_none());
        assert_eq!(msg.sender, "alpha");
        assert_eq!(msg.receiver, "beta");

        let encoded = serde_json::to_value(&msg).unwrap();
        let timestamp = encoded["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn create_message_keeps_overrides() {
        let msg = create_message(
            query()
                .with_priority(-128)
                .with_token_cost(42)
                .with_reply_port("alpha.inbox"),
        )
        .unwrap();
        assert_eq!(msg.priority, -128);
        assert_eq!(msg.token_cost, 42);
        assert!(msg.expects_reply());
    }

    #[test]
    fn create_message_requires_endpoints() {
        let draft = MessageDraft::new(MessageType::Heartbeat, "", "beta", json!({}));
        assert!(matches!(
            create_message(draft),
            Err(MessageError::Validation(_))
        ));
        let draft = MessageDraft::new(MessageType::Heartbeat, "alpha", "  ", json!({}));
        assert!(create_message(draft).is_err());
    }

    #[test]
    fn reply_requires_reply_port() {
        let original = create_message(query()).unwrap();
        let err = create_reply(
            &original,
            ReplyDraft::new(MessageType::Response, "beta", json!({})),
        )
        .unwrap_err();
        assert!(matches!(err, MessageError::NoReplyPort(id) if id == original.id));
    }

    #[test]
    fn reply_routes_back_to_sender() {
        let original = create_message(query().with_reply_port("alpha.inbox")).unwrap();
        let reply = create_reply(
            &original,
            ReplyDraft::new(MessageType::Response, "beta", json!({"status": "idle"}))
                .with_priority(10),
        )
        .unwrap();

        assert_eq!(reply.receiver, original.sender);
        assert_eq!(reply.in_reply_to, Some(original.id));
        assert_eq!(reply.sender, "beta");
        assert_eq!(reply.priority, 10);
        assert_ne!(reply.id, original.id);
        assert!(reply.is_reply());
    }

    #[test]
    fn parse_message_rejects_unknown_type_and_bad_ranges() {
        let msg = create_message(query()).unwrap();
        let good = serde_json::to_value(&msg).unwrap();
        assert!(parse_message(&good.to_string()).is_ok());

        let mut bad_type = good.clone();
        bad_type["type"] = json!("teleport");
        assert!(matches!(
            parse_message(&bad_type.to_string()),
            Err(MessageError::Parse(_))
        ));

        let mut bad_priority = good.clone();
        bad_priority["priority"] = json!(-129);
        assert!(parse_message(&bad_priority.to_string()).is_err());

        let mut bad_cost = good.clone();
        bad_cost["tokenCost"] = json!(-1);
        assert!(parse_message(&bad_cost.to_string()).is_err());

        let mut bad_sender = good;
        bad_sender["sender"] = json!("");
        assert!(matches!(
            parse_message(&bad_sender.to_string()),
            Err(MessageError::Validation(_))
        ));
    }
}
