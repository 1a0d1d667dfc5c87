use std::time::Duration;

use parley_core::{Message, SessionId};
use serde::{Deserialize, Serialize};

/// Snapshots at least this old are treated as if nothing was stored.
pub const SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Persisted view of one chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub session_id: SessionId,
    pub last_updated_unix_millis: u64,
}

impl SessionSnapshot {
    pub fn is_stale(&self, now_unix_millis: u64) -> bool {
        is_stale(self.last_updated_unix_millis, now_unix_millis)
    }
}

pub(crate) fn is_stale(last_updated_unix_millis: u64, now_unix_millis: u64) -> bool {
    let age = now_unix_millis.saturating_sub(last_updated_unix_millis);
    u128::from(age) >= SNAPSHOT_MAX_AGE.as_millis()
}

/// Blob layout written by every store implementation.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotPayload {
    pub session_id: SessionId,
    pub messages: Vec<Message>,
}
