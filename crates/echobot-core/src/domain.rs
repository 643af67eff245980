use chrono::{DateTime, Utc};

/// Server-assigned update id. Strictly increasing across all updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateId(pub i64);

/// Chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Message id within a chat (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i64);

/// Label used when the sender has no username.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// An inbound message carried by an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub chat_id: ChatId,
    pub message_id: Option<MessageId>,
    /// `None` for non-text messages (stickers, photos, ...).
    pub text: Option<String>,
    pub sender_label: String,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_id: None,
            text: Some(text.into()),
            sender_label: UNKNOWN_SENDER.to_string(),
            sent_at: None,
        }
    }
}

/// What an update carries, as far as the dispatcher is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    Message(Message),
    /// No message payload (edited messages, callbacks, channel posts, ...).
    Other,
    /// A message object was present but lacked required fields.
    Malformed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub id: UpdateId,
    pub kind: UpdateKind,
}

impl Update {
    pub fn message(id: i64, message: Message) -> Self {
        Self {
            id: UpdateId(id),
            kind: UpdateKind::Message(message),
        }
    }

    pub fn empty(id: i64) -> Self {
        Self {
            id: UpdateId(id),
            kind: UpdateKind::Other,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(m) => Some(m),
            _ => None,
        }
    }
}

/// Ordered updates returned by one fetch.
pub type Batch = Vec<Update>;
