//! Data channel message types.
//!
//! Client events (sent on the control channel):
//! - conversation.item.create - Add a user message to the conversation
//! - response.create - Ask the model to respond
//! - response.cancel - Cancel the in-flight response
//!
//! Server events are not modelled field by field. They are decoded defensively
//! into [`InboundMessage`] and handed to the caller as-is; only the few shapes
//! that mark an assistant response are recognised here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Completed-response marker.
pub const RESPONSE_DONE: &str = "response.done";

/// Output-text-done markers (current and legacy event names).
pub const OUTPUT_TEXT_DONE: &[&str] = &["response.output_text.done", "response.text.done"];

/// Item-created event.
pub const CONVERSATION_ITEM_CREATED: &str = "conversation.item.created";

// =============================================================================
// Client Events
// =============================================================================

/// Events sent from the client over the data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Add an item to the conversation
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Generate a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel {},
}

impl ClientEvent {
    /// User text message envelope.
    pub fn user_message(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                item_type: "message".to_string(),
                role: "user".to_string(),
                content: vec![ContentPart::InputText { text: text.into() }],
            },
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel {} => "response.cancel",
        }
    }
}

/// Conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type ("message")
    #[serde(rename = "type")]
    pub item_type: String,

    /// Speaker role
    pub role: String,

    pub content: Vec<ContentPart>,
}

/// Content part of a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// A message received on the data channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Payload parsed as JSON
    Json(Value),
    /// Payload that was not valid JSON, passed through untouched
    Raw(String),
}

impl InboundMessage {
    /// Decode without failing: invalid JSON becomes [`InboundMessage::Raw`].
    pub fn decode(data: &str) -> Self {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => InboundMessage::Json(value),
            Err(_) => InboundMessage::Raw(data.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            InboundMessage::Json(value) => Some(value),
            InboundMessage::Raw(_) => None,
        }
    }

    /// The `type` field of a JSON payload.
    pub fn event_type(&self) -> Option<&str> {
        self.as_json()?.get("type")?.as_str()
    }

    /// Whether the payload marks an assistant response.
    ///
    /// True for the completed-response marker, the output-text-done marker, an
    /// item-created event whose item role is `assistant`, or any object whose
    /// top-level `role` is `assistant`.
    pub fn is_assistant_response(&self) -> bool {
        let Some(value) = self.as_json() else {
            return false;
        };

        if let Some(event_type) = self.event_type() {
            if event_type == RESPONSE_DONE || OUTPUT_TEXT_DONE.contains(&event_type) {
                return true;
            }
            if event_type == CONVERSATION_ITEM_CREATED
                && value.pointer("/item/role").and_then(Value::as_str) == Some("assistant")
            {
                return true;
            }
        }

        value.get("role").and_then(Value::as_str) == Some("assistant")
    }
}
