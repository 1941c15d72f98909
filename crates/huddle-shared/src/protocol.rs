//! JSON event protocol spoken over the relay's WebSocket.
//!
//! Every frame is `{"event": "<name>", "data": <payload>}`. Payloads are
//! decoded permissively: absent, null or wrong-typed fields default instead of
//! failing the event. Fields the relay only passes along are kept as raw JSON
//! or carried in `extra`, and relayed verbatim.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::constants::{AGENT_AUTHOR, AGENT_THREAD_ID, SYSTEM_AUTHOR, SYSTEM_AUTHOR_ID};
use crate::error::ProtocolError;
use crate::mention::strip_agent_mention;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Field decoder that never fails the enclosing payload: a null or
/// mismatched value becomes the field's default.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// A chat message envelope. Constructed by the sender's client and relayed
/// with the sender identity (`id`) and `timestamp` stamped by the relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "lenient")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    /// Resolved sender identity, set by the relay. Always serialized.
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
    /// Reply reference; serialized as an explicit `null` when absent.
    #[serde(default)]
    pub reply_to: Option<Value>,
    #[serde(default)]
    pub reply_to_message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downvotes: Option<Value>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Relay-authored notice addressed to a single connection.
    pub fn system(text: impl Into<String>, timestamp: String) -> Self {
        Self {
            message: text.into(),
            author: Some(SYSTEM_AUTHOR.to_string()),
            author_id: Some(SYSTEM_AUTHOR_ID.to_string()),
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    /// Reply injected by the agent callback.
    pub fn from_agent(text: String, agent_id: Option<String>, timestamp: String) -> Self {
        Self {
            message: text,
            author: Some(AGENT_AUTHOR.to_string()),
            author_id: agent_id,
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }
}

/// Join / leave announcement (`user_joined`, `user_left`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_typing: bool,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reaction delta. Tallies are computed by the reacting client and forwarded
/// untouched; the relay keeps no history to check them against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_type: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downvotes: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDm {
    #[serde(default, deserialize_with = "lenient")]
    pub target_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmReady {
    pub room_id: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmError {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    UserJoined(Presence),
    StartDm(StartDm),
    SendMessage(ChatMessage),
    Typing(TypingSignal),
    ReactToMessage(Reaction),
    UserLeft(Presence),
}

/// Events the relay emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserCount(usize),
    UserJoined(Presence),
    UserLeft(Presence),
    DmReady(DmReady),
    DmError(DmError),
    ReceiveMessage(ChatMessage),
    AgentThinking,
    UserTyping(TypingSignal),
    MessageReacted(Reaction),
}

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decode one inbound text frame.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, ProtocolError> {
    let frame: Frame = serde_json::from_str(text)?;
    let data = match frame.data {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };

    let event = match frame.event.as_str() {
        "user_joined" => ClientEvent::UserJoined(serde_json::from_value(data)?),
        "start_dm" => ClientEvent::StartDm(serde_json::from_value(data)?),
        "send_message" => ClientEvent::SendMessage(serde_json::from_value(data)?),
        "typing" => ClientEvent::Typing(serde_json::from_value(data)?),
        "react_to_message" => ClientEvent::ReactToMessage(serde_json::from_value(data)?),
        "user_left" => ClientEvent::UserLeft(serde_json::from_value(data)?),
        other => return Err(ProtocolError::UnknownEvent(other.to_string())),
    };
    Ok(event)
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserCount(_) => "user_count",
            ServerEvent::UserJoined(_) => "user_joined",
            ServerEvent::UserLeft(_) => "user_left",
            ServerEvent::DmReady(_) => "dm_ready",
            ServerEvent::DmError(_) => "dm_error",
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::AgentThinking => "agent_thinking",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::MessageReacted(_) => "message_reacted",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Agent service HTTP bodies
// ---------------------------------------------------------------------------

/// Body POSTed to the external agent service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub thread_id: String,
    pub message_id: String,
    pub query: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl AgentRequest {
    /// Build the webhook body for a mentioning message. `fallback_user` is
    /// used when the envelope carries no `authorId`.
    pub fn for_message(msg: &ChatMessage, fallback_user: Option<&str>) -> Self {
        Self {
            thread_id: AGENT_THREAD_ID.to_string(),
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            query: strip_agent_mention(&msg.message),
            user_id: msg
                .author_id
                .clone()
                .or_else(|| fallback_user.map(str::to_string)),
            user_name: msg.author.clone(),
        }
    }
}

/// Body of the agent service's callback. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}
