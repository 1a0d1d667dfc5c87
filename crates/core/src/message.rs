use serde::{Deserialize, Serialize};

use super::ids::MessageId;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One entry of the conversation history. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    pub created_at_unix_millis: u64,
    #[serde(default)]
    pub is_provisional: bool,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>, created_at_unix_millis: u64) -> Self {
        Self {
            id: MessageId::generate(),
            text: text.into(),
            sender,
            created_at_unix_millis,
            is_provisional: false,
        }
    }

    pub fn user(text: impl Into<String>, created_at_unix_millis: u64) -> Self {
        Self::new(Sender::User, text, created_at_unix_millis)
    }

    pub fn assistant(text: impl Into<String>, created_at_unix_millis: u64) -> Self {
        Self::new(Sender::Assistant, text, created_at_unix_millis)
    }
}

/// A queued outbound user message that has not been dispatched yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    pub text: String,
    pub enqueued_at_unix_millis: u64,
    /// The user message appended for this item at submit time, if any.
    pub message_id: Option<MessageId>,
}

impl PendingItem {
    pub fn new(text: impl Into<String>, enqueued_at_unix_millis: u64) -> Self {
        Self {
            text: text.into(),
            enqueued_at_unix_millis,
            message_id: None,
        }
    }

    pub fn for_message(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }
}
