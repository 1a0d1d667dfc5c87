use std::collections::VecDeque;

use super::error::{EmptyQueueSnafu, ErrorCategory, QueueError};
use super::ids::{MessageId, SessionId};
use super::message::{Message, PendingItem, Sender};

/// Reachability of the completion service as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
    Reconnecting,
}

/// Queue dispatcher lifecycle, derived from [`SessionState::is_draining_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    Idle,
    Draining,
}

/// Single source of truth for one chat session.
///
/// Every method is one indivisible transition. Callers sharing the state
/// apply each method under a single lock or watch update so readers never
/// observe a half-applied change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub messages: Vec<Message>,
    pub queue: VecDeque<PendingItem>,
    pub is_loading: bool,
    pub is_typing: bool,
    pub is_draining_queue: bool,
    pub connection_status: ConnectionStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_error_category: Option<ErrorCategory>,
    pub session_id: Option<SessionId>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch_state(&self) -> DispatchState {
        if self.is_draining_queue {
            DispatchState::Draining
        } else {
            DispatchState::Idle
        }
    }

    pub fn append_user_message(
        &mut self,
        text: impl Into<String>,
        now_unix_millis: u64,
    ) -> MessageId {
        let message = Message::user(text, now_unix_millis);
        let id = message.id;
        self.messages.push(message);
        self.clear_error();
        id
    }

    pub fn enqueue(&mut self, text: impl Into<String>, now_unix_millis: u64) {
        self.queue.push_back(PendingItem::new(text, now_unix_millis));
    }

    /// Enqueues an item tied to the user message that was appended for it.
    pub fn enqueue_for(
        &mut self,
        message_id: MessageId,
        text: impl Into<String>,
        now_unix_millis: u64,
    ) {
        self.queue
            .push_back(PendingItem::new(text, now_unix_millis).for_message(message_id));
    }

    pub fn dequeue_front(&mut self) -> Result<PendingItem, QueueError> {
        match self.queue.pop_front() {
            Some(item) => Ok(item),
            None => EmptyQueueSnafu.fail(),
        }
    }

    pub fn begin_dispatch(&mut self) {
        self.is_loading = true;
        self.is_typing = true;
        self.clear_error();
    }

    pub fn append_assistant_message(
        &mut self,
        text: impl Into<String>,
        now_unix_millis: u64,
    ) -> MessageId {
        let message = Message::assistant(text, now_unix_millis);
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Records the reply for the in-flight item and leaves the loading state.
    pub fn complete_dispatch(
        &mut self,
        reply: impl Into<String>,
        now_unix_millis: u64,
    ) -> MessageId {
        let id = self.append_assistant_message(reply, now_unix_millis);
        self.is_loading = false;
        self.is_typing = false;
        id
    }

    pub fn fail_dispatch(&mut self, category: ErrorCategory) {
        self.last_error = Some(category.user_message().to_string());
        self.last_error_category = Some(category);
        self.is_loading = false;
        self.is_typing = false;
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
        if status == ConnectionStatus::Connected {
            self.retry_count = 0;
        }
    }

    /// Records one backoff retry against the service.
    pub fn record_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.connection_status = ConnectionStatus::Reconnecting;
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.last_error_category = None;
    }

    /// Takes ownership of the queue for a drain loop.
    ///
    /// Returns `false` when another drain already owns it.
    pub fn try_claim_drain(&mut self) -> bool {
        if self.is_draining_queue {
            return false;
        }
        self.is_draining_queue = true;
        true
    }

    /// Gives the queue back, but only when nothing is left to send.
    ///
    /// Checking emptiness and clearing the flag in one step means an item
    /// enqueued concurrently is either seen by the running drain or claims a
    /// new one; it is never stranded.
    pub fn release_drain_if_idle(&mut self) -> bool {
        if !self.queue.is_empty() {
            return false;
        }
        self.is_draining_queue = false;
        true
    }

    /// Up to `limit` committed messages preceding `before`, oldest first.
    ///
    /// With `before == None` (or an unknown id) the whole history is considered.
    pub fn history_before(&self, before: Option<MessageId>, limit: usize) -> Vec<Message> {
        let end = before
            .and_then(|id| self.messages.iter().position(|message| message.id == id))
            .unwrap_or(self.messages.len());

        let committed = self.messages[..end]
            .iter()
            .filter(|message| !message.is_provisional)
            .collect::<Vec<_>>();
        let skip = committed.len().saturating_sub(limit);

        committed.into_iter().skip(skip).cloned().collect()
    }

    /// Seeds history from a persisted snapshot. Only valid before any append.
    pub fn restore_history(&mut self, messages: Vec<Message>) -> bool {
        if !self.messages.is_empty() {
            return false;
        }
        self.messages = messages;
        true
    }

    pub fn count_by_sender(&self, sender: Sender) -> usize {
        self.messages
            .iter()
            .filter(|message| message.sender == sender)
            .count()
    }
}
