//! Chat message shapes exchanged with the broker.

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Outbound destination for chat text
pub const SEND_DESTINATION: &str = "/app/chat.sendMessage";
/// Outbound destination for "user joined" notices
pub const JOIN_DESTINATION: &str = "/app/chat.addUser";
/// Outbound destination for read receipts
pub const READ_DESTINATION: &str = "/app/chat.markAsRead";

const ROOM_TOPIC_PREFIX: &str = "/topic/room.";

/// Inbound topic for a room: `/topic/room.<room_id>`
pub fn room_topic(room_id: &str) -> String {
    format!("{}{}", ROOM_TOPIC_PREFIX, room_id)
}

/// Identity carried in the connection handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub nickname: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            nickname: None,
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// STOMP CONNECT headers for this identity
    pub fn connect_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("userId".to_string(), self.user_id.clone())];
        if let Some(nickname) = &self.nickname {
            headers.push(("nickname".to_string(), nickname.clone()));
        }
        headers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Join,
    Read,
    System,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Text => "TEXT",
            MessageType::Join => "JOIN",
            MessageType::Read => "READ",
            MessageType::System => "SYSTEM",
        };
        f.write_str(s)
    }
}

/// Message identifier in read receipts; the broker may use numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    Text(String),
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        MessageId::Number(id)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        MessageId::Text(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        MessageId::Text(id.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{}", n),
            MessageId::Text(s) => f.write_str(s),
        }
    }
}

/// Body shared by TEXT, JOIN and SYSTEM messages.
///
/// Ids are read from strings or numbers and `null` strings read as empty, so
/// broker-side serialization choices do not turn a message into a fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default, deserialize_with = "lenient_string")]
    pub room_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    /// Server-assigned id, present on inbound messages only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Server timestamp, kept in whatever form the broker sent it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Fields this crate does not model (avatars, edit flags, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatBody {
    fn new(room_id: String, sender_id: String, sender_name: String, content: String) -> Self {
        Self {
            room_id,
            sender_id,
            sender_name,
            content,
            id: None,
            timestamp: None,
            extra: Map::new(),
        }
    }
}

/// Body of a READ control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    #[serde(default, deserialize_with = "lenient_string")]
    pub room_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message_ids: Vec<MessageId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Strings, numbers and booleans as text; `null` as empty
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A chat message as it appears on the wire, tagged by `messageType`.
///
/// Used both for outbound publish bodies and for decoded inbound frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "UPPERCASE")]
pub enum ChatMessage {
    Text(ChatBody),
    Join(ChatBody),
    Read(ReadReceipt),
    System(ChatBody),
}

impl ChatMessage {
    pub fn text(
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        ChatMessage::Text(ChatBody::new(
            room_id.into(),
            sender_id.into(),
            sender_name.into(),
            content.into(),
        ))
    }

    pub fn join(
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
    ) -> Self {
        ChatMessage::Join(ChatBody::new(
            room_id.into(),
            sender_id.into(),
            sender_name.into(),
            String::new(),
        ))
    }

    pub fn read(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        message_ids: Vec<MessageId>,
    ) -> Self {
        ChatMessage::Read(ReadReceipt {
            room_id: room_id.into(),
            user_id: user_id.into(),
            message_ids,
            extra: Map::new(),
        })
    }

    /// Interpret a decoded frame body.
    ///
    /// `None` when it is not an object, lacks `messageType`, carries a type
    /// this crate does not model, or its fields have the wrong shape.
    pub fn from_frame(frame: &Value) -> Option<ChatMessage> {
        let mut fields = frame.as_object()?.clone();
        let tag = fields.remove("messageType")?;
        let fields = Value::Object(fields);

        let message = match tag.as_str()? {
            "TEXT" => ChatMessage::Text(serde_json::from_value(fields).ok()?),
            "JOIN" => ChatMessage::Join(serde_json::from_value(fields).ok()?),
            "SYSTEM" => ChatMessage::System(serde_json::from_value(fields).ok()?),
            "READ" => ChatMessage::Read(serde_json::from_value(fields).ok()?),
            _ => return None,
        };
        Some(message)
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ChatMessage::Text(_) => MessageType::Text,
            ChatMessage::Join(_) => MessageType::Join,
            ChatMessage::Read(_) => MessageType::Read,
            ChatMessage::System(_) => MessageType::System,
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            ChatMessage::Text(body) | ChatMessage::Join(body) | ChatMessage::System(body) => {
                &body.room_id
            }
            ChatMessage::Read(receipt) => &receipt.room_id,
        }
    }

    fn room_id_mut(&mut self) -> &mut String {
        match self {
            ChatMessage::Text(body) | ChatMessage::Join(body) | ChatMessage::System(body) => {
                &mut body.room_id
            }
            ChatMessage::Read(receipt) => &mut receipt.room_id,
        }
    }

    /// Destination this message is published to
    pub fn destination(&self) -> &'static str {
        match self {
            ChatMessage::Text(_) | ChatMessage::System(_) => SEND_DESTINATION,
            ChatMessage::Join(_) => JOIN_DESTINATION,
            ChatMessage::Read(_) => READ_DESTINATION,
        }
    }
}

/// Stand-in for an inbound frame whose body is not JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackMessage {
    pub room_id: String,
    /// The raw frame body
    pub content: String,
    /// Always `SYSTEM`
    pub message_type: MessageType,
    /// When the frame was received
    pub timestamp: DateTime<Utc>,
}

impl FallbackMessage {
    pub fn new(room_id: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            content: raw.into(),
            message_type: MessageType::System,
            timestamp: Utc::now(),
        }
    }
}

/// A message delivered to a room handler.
///
/// Serializes to the frame exactly as received, or to the fallback object.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A chat message this crate models; `frame` is the body as received
    Parsed { message: ChatMessage, frame: Value },
    /// Valid JSON that is not a modelled chat message (e.g. a new `messageType`)
    Unrecognized(Value),
    /// The body did not parse as JSON
    Fallback(FallbackMessage),
}

impl Serialize for Inbound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Inbound::Parsed { frame, .. } | Inbound::Unrecognized(frame) => {
                frame.serialize(serializer)
            }
            Inbound::Fallback(fallback) => fallback.serialize(serializer),
        }
    }
}

impl Inbound {
    /// Decode a raw frame body received on `room_id`'s topic.
    ///
    /// Never fails. Only a body that is not JSON becomes a
    /// [`FallbackMessage`]. A parsed message without a room id is attributed
    /// to `room_id`.
    pub fn decode(room_id: &str, raw: &str) -> Inbound {
        let frame: Value = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(_) => return Inbound::Fallback(FallbackMessage::new(room_id, raw)),
        };

        match ChatMessage::from_frame(&frame) {
            Some(mut message) => {
                if message.room_id().is_empty() {
                    *message.room_id_mut() = room_id.to_string();
                }
                Inbound::Parsed { message, frame }
            }
            None => Inbound::Unrecognized(frame),
        }
    }

    /// The decoded chat message, if there is one
    pub fn message(&self) -> Option<&ChatMessage> {
        match self {
            Inbound::Parsed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// `None` for unrecognized frames
    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            Inbound::Parsed { message, .. } => Some(message.message_type()),
            Inbound::Unrecognized(_) => None,
            Inbound::Fallback(fallback) => Some(fallback.message_type),
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        match self {
            Inbound::Parsed { message, .. } => Some(message.room_id()),
            Inbound::Unrecognized(frame) => frame.get("roomId").and_then(Value::as_str),
            Inbound::Fallback(fallback) => Some(&fallback.room_id),
        }
    }

    /// Text content, if this kind of message has any
    pub fn content(&self) -> Option<&str> {
        match self {
            Inbound::Parsed { message, .. } => match message {
                ChatMessage::Read(_) => None,
                ChatMessage::Text(body) | ChatMessage::Join(body) | ChatMessage::System(body) => {
                    Some(&body.content)
                }
            },
            Inbound::Unrecognized(frame) => frame.get("content").and_then(Value::as_str),
            Inbound::Fallback(fallback) => Some(&fallback.content),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Inbound::Fallback(_))
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Inbound::Unrecognized(_))
    }
}
