use std::sync::Arc;

use parley_core::{ConnectionStatus, ErrorCategory, SessionId};
use parley_llm::ChatCompletion;
use parley_storage::{SessionSnapshot, SnapshotStore};

use super::session::SessionHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub session_id: SessionId,
    pub connection_status: ConnectionStatus,
    pub probe_error: Option<ErrorCategory>,
    pub restored_messages: usize,
    pub previous_session_id: Option<SessionId>,
}

/// Prepares a session before the first user input: restores recent history,
/// probes the completion service once and hands out a fresh session id.
pub struct SessionBootstrapper {
    completion: Arc<dyn ChatCompletion>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl SessionBootstrapper {
    pub fn new(completion: Arc<dyn ChatCompletion>) -> Self {
        Self {
            completion,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn run(&self, session: &SessionHandle) -> BootstrapReport {
        let snapshot = self.load_snapshot().await;
        let previous_session_id = snapshot.as_ref().map(|snapshot| snapshot.session_id);
        let restored_messages = match snapshot {
            Some(snapshot) => {
                let count = snapshot.messages.len();
                if session.restore_history(snapshot.messages) {
                    count
                } else {
                    0
                }
            }
            None => 0,
        };

        let (connection_status, probe_error) = match self.completion.health_check().await {
            Ok(()) => (ConnectionStatus::Connected, None),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    category = error.category().as_str(),
                    "completion service health check failed"
                );
                (ConnectionStatus::Disconnected, Some(error.category()))
            }
        };
        session.set_connection_status(connection_status);

        let session_id = SessionId::generate();
        session.assign_session_id(session_id);

        tracing::info!(
            %session_id,
            previous_session_id = ?previous_session_id,
            restored_messages,
            offline = self.completion.is_offline(),
            connection_status = ?connection_status,
            "session ready"
        );

        BootstrapReport {
            session_id,
            connection_status,
            probe_error,
            restored_messages,
            previous_session_id,
        }
    }

    async fn load_snapshot(&self) -> Option<SessionSnapshot> {
        let store = self.store.clone()?;
        match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "failed to load session snapshot");
                None
            }
            Err(error) => {
                tracing::warn!(error = %error, "session snapshot task did not finish");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use parley_core::{ManualClock, Message};
    use parley_llm::{CompletionError, CompletionRequest, CompletionResult, RetryObserver};
    use parley_storage::MemorySnapshotStore;

    use super::*;

    struct Probe {
        healthy: bool,
    }

    impl ChatCompletion for Probe {
        fn complete<'a>(
            &'a self,
            _request: CompletionRequest,
            _observer: &'a dyn RetryObserver<CompletionError>,
        ) -> BoxFuture<'a, CompletionResult<String>> {
            async { Ok("unused".to_string()) }.boxed()
        }

        fn health_check(&self) -> BoxFuture<'_, CompletionResult<()>> {
            let healthy = self.healthy;
            async move {
                if healthy {
                    Ok(())
                } else {
                    Err(CompletionError::HttpStatus {
                        stage: "probe",
                        status: 503,
                        message: "down".to_string(),
                    })
                }
            }
            .boxed()
        }

        fn is_offline(&self) -> bool {
            false
        }
    }

    fn session() -> SessionHandle {
        SessionHandle::new(Arc::new(ManualClock::new(1_700_000_000_000)))
    }

    #[tokio::test]
    async fn healthy_probe_connects_with_a_fresh_id() {
        let session = session();
        let report = SessionBootstrapper::new(Arc::new(Probe { healthy: true }))
            .run(&session)
            .await;

        let state = session.snapshot();
        assert_eq!(report.connection_status, ConnectionStatus::Connected);
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        assert_eq!(state.session_id, Some(report.session_id));
        assert_eq!(report.probe_error, None);
        assert_eq!(report.restored_messages, 0);
    }

    #[tokio::test]
    async fn failed_probe_leaves_session_disconnected() {
        let session = session();
        let report = SessionBootstrapper::new(Arc::new(Probe { healthy: false }))
            .run(&session)
            .await;

        assert_eq!(report.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(report.probe_error, Some(ErrorCategory::ServiceUnavailable));
        assert_eq!(
            session.snapshot().connection_status,
            ConnectionStatus::Disconnected
        );
        assert!(session.snapshot().session_id.is_some());
    }

    #[tokio::test]
    async fn restores_history_but_never_reuses_the_old_id() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemorySnapshotStore::new(clock.clone()));
        let old_id = SessionId::generate();
        store
            .save(
                &[Message::user("hi", 1), Message::assistant("hello", 2)],
                old_id,
            )
            .expect("save should succeed");

        let session = SessionHandle::new(clock);
        let report = SessionBootstrapper::new(Arc::new(Probe { healthy: true }))
            .with_store(store)
            .run(&session)
            .await;

        assert_eq!(report.restored_messages, 2);
        assert_eq!(report.previous_session_id, Some(old_id));
        assert_ne!(report.session_id, old_id);
        assert_eq!(session.snapshot().messages.len(), 2);
    }
}
