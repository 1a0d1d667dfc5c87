use std::sync::{Arc, Mutex};

use parley_core::{Clock, Message, SessionId};
use snafu::ResultExt;

use super::SnapshotStore;
use super::error::{
    DecodeSnapshotSnafu, EncodeSnapshotSnafu, InvariantViolationSnafu, StorageResult,
};
use super::types::{SessionSnapshot, SnapshotPayload, is_stale};

#[derive(Debug, Clone)]
struct StoredBlob {
    payload: String,
    updated_at_unix_millis: u64,
}

/// Process-local blob store. Keeps the encoded payload so it behaves like the
/// sqlite store byte for byte, minus durability.
pub struct MemorySnapshotStore {
    blob: Mutex<Option<StoredBlob>>,
    clock: Arc<dyn Clock>,
}

impl MemorySnapshotStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            blob: Mutex::new(None),
            clock,
        }
    }

    fn with_blob<T>(
        &self,
        stage: &'static str,
        op: impl FnOnce(&mut Option<StoredBlob>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        match self.blob.lock() {
            Ok(mut guard) => op(&mut guard),
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "memory snapshot lock poisoned".to_string(),
            }
            .fail(),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, messages: &[Message], session_id: SessionId) -> StorageResult<()> {
        let payload = serde_json::to_string(&SnapshotPayload {
            session_id,
            messages: messages.to_vec(),
        })
        .context(EncodeSnapshotSnafu {
            stage: "memory-snapshot-encode",
        })?;
        let updated_at_unix_millis = self.clock.now_unix_millis();

        self.with_blob("memory-snapshot-save", |blob| {
            *blob = Some(StoredBlob {
                payload,
                updated_at_unix_millis,
            });
            Ok(())
        })
    }

    fn load(&self) -> StorageResult<Option<SessionSnapshot>> {
        let Some(stored) = self.with_blob("memory-snapshot-load", |blob| Ok(blob.clone()))? else {
            return Ok(None);
        };

        if is_stale(stored.updated_at_unix_millis, self.clock.now_unix_millis()) {
            return Ok(None);
        }

        let payload: SnapshotPayload =
            serde_json::from_str(&stored.payload).context(DecodeSnapshotSnafu {
                stage: "memory-snapshot-decode",
            })?;

        Ok(Some(SessionSnapshot {
            messages: payload.messages,
            session_id: payload.session_id,
            last_updated_unix_millis: stored.updated_at_unix_millis,
        }))
    }

    fn clear(&self) -> StorageResult<()> {
        self.with_blob("memory-snapshot-clear", |blob| {
            *blob = None;
            Ok(())
        })
    }
}
