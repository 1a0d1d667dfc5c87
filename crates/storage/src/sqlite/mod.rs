use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parley_core::{Clock, Message, SessionId};
use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection};

use super::SnapshotStore;
use super::error::{
    CreateSqliteDirectorySnafu, DecodeSnapshotSnafu, EncodeSnapshotSnafu, InvalidIdSnafu,
    InvariantViolationSnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, SqliteQuerySnafu, SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu,
    StorageError, StorageResult,
};
use super::types::{SessionSnapshot, SnapshotPayload, is_stale};

/// The store keeps exactly one snapshot: the latest session.
const CURRENT_SLOT: &str = "current-session";

#[derive(Debug, FromRow)]
struct SnapshotRow {
    session_id: String,
    payload_json: String,
    updated_at: i64,
}

#[derive(Clone)]
pub struct SqliteSnapshotStore {
    database_url: String,
    clock: Arc<dyn Clock>,
}

impl SqliteSnapshotStore {
    pub async fn open(database_location: &str, clock: Arc<dyn Clock>) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        // Store calls reconnect on their own worker runtime, so the bootstrap pool is done here.
        pool.close().await;

        tracing::info!(database_url = %database_url, "opened sqlite snapshot store");
        Ok(Self {
            database_url,
            clock,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store traits are sync, so each call executes on a dedicated worker thread
        // with its own current-thread runtime to avoid nested-runtime blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn save(&self, messages: &[Message], session_id: SessionId) -> StorageResult<()> {
        let payload_json = serde_json::to_string(&SnapshotPayload {
            session_id,
            messages: messages.to_vec(),
        })
        .context(EncodeSnapshotSnafu {
            stage: "snapshot-save-encode",
        })?;
        let updated_at = u64_to_i64(self.clock.now_unix_millis(), "snapshot-save-updated-at")?;
        let database_url = self.database_url.clone();

        self.run_db_call("snapshot-save", async move {
            let mut connection =
                connect_store_connection(&database_url, "snapshot-save-connect").await?;
            sqlx::query(
                "INSERT INTO session_snapshots (slot, session_id, payload_json, updated_at) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(slot) DO UPDATE SET session_id = excluded.session_id, payload_json = excluded.payload_json, updated_at = excluded.updated_at",
            )
            .bind(CURRENT_SLOT)
            .bind(session_id.to_string())
            .bind(payload_json)
            .bind(updated_at)
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "snapshot-save-upsert",
            })?;
            Ok(())
        })
    }

    fn load(&self) -> StorageResult<Option<SessionSnapshot>> {
        let database_url = self.database_url.clone();
        let row = self.run_db_call("snapshot-load", async move {
            let mut connection =
                connect_store_connection(&database_url, "snapshot-load-connect").await?;
            sqlx::query_as::<_, SnapshotRow>(
                "SELECT session_id, payload_json, updated_at FROM session_snapshots WHERE slot = ?",
            )
            .bind(CURRENT_SLOT)
            .fetch_optional(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "snapshot-load-query",
            })
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let last_updated_unix_millis = i64_to_u64(row.updated_at, "snapshot-row-updated-at")?;
        if is_stale(last_updated_unix_millis, self.clock.now_unix_millis()) {
            tracing::info!(
                last_updated_unix_millis,
                "ignoring stale session snapshot"
            );
            return Ok(None);
        }

        let session_id = SessionId::parse(&row.session_id).context(InvalidIdSnafu {
            stage: "snapshot-row-session-id",
        })?;
        let payload: SnapshotPayload =
            serde_json::from_str(&row.payload_json).context(DecodeSnapshotSnafu {
                stage: "snapshot-load-decode",
            })?;

        if payload.session_id != session_id {
            return InvariantViolationSnafu {
                stage: "snapshot-load-session-mismatch",
                details: format!(
                    "snapshot row session '{session_id}' disagrees with payload session '{}'",
                    payload.session_id
                ),
            }
            .fail();
        }

        Ok(Some(SessionSnapshot {
            messages: payload.messages,
            session_id,
            last_updated_unix_millis,
        }))
    }

    fn clear(&self) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        self.run_db_call("snapshot-clear", async move {
            let mut connection =
                connect_store_connection(&database_url, "snapshot-clear-connect").await?;
            sqlx::query("DELETE FROM session_snapshots WHERE slot = ?")
                .bind(CURRENT_SLOT)
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "snapshot-clear-delete",
                })?;
            Ok(())
        })
    }
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("expected non-negative integer, got {value}"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("integer {value} does not fit sqlite INTEGER"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}
