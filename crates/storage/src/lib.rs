pub mod error;
pub mod memory;
pub mod sqlite;
pub mod types;

use parley_core::{Message, SessionId};

pub use error::{StorageError, StorageResult};
pub use memory::MemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;
pub use types::{SNAPSHOT_MAX_AGE, SessionSnapshot};

/// Opaque key-value blob store holding the latest session snapshot.
///
/// Calls are synchronous; async callers should hop onto a blocking thread.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, messages: &[Message], session_id: SessionId) -> StorageResult<()>;

    /// Latest snapshot, or `None` when nothing was saved or it is older than
    /// [`SNAPSHOT_MAX_AGE`].
    fn load(&self) -> StorageResult<Option<SessionSnapshot>>;

    fn clear(&self) -> StorageResult<()>;
}
