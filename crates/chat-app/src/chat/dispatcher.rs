use std::sync::Arc;
use std::time::Duration;

use parley_core::{
    ConnectionStatus, DispatchState, MessageId, PendingItem, QueueError, SessionState,
};
use parley_llm::{
    ChatCompletion, CompletionError, CompletionRequest, HISTORY_LIMIT, RetryNotice, RetryObserver,
};
use parley_storage::SnapshotStore;
use tokio::sync::watch;

use super::session::SessionHandle;

/// Pause between two dispatches after a successful reply.
pub const DRAIN_SPACING: Duration = Duration::from_millis(500);

/// Sends queued user messages to the completion service one at a time, in order.
pub struct QueueDispatcher {
    session: SessionHandle,
    completion: Arc<dyn ChatCompletion>,
    store: Option<Arc<dyn SnapshotStore>>,
    spacing: Duration,
}

impl QueueDispatcher {
    pub fn new(session: SessionHandle, completion: Arc<dyn ChatCompletion>) -> Self {
        Self {
            session,
            completion,
            store: None,
            spacing: DRAIN_SPACING,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.session.dispatch_state()
    }

    pub fn clear_error(&self) {
        self.session.clear_error();
    }

    /// Shows `text` as a user message right away and queues it for sending.
    ///
    /// Blank input is ignored and returns `None`. Non-blank text is kept as typed.
    pub fn submit(self: &Arc<Self>, text: &str) -> Option<MessageId> {
        if text.trim().is_empty() {
            return None;
        }

        let now = self.session.now();
        let (message_id, claimed, queued) = self.session.update(|state| {
            let message_id = state.append_user_message(text, now);
            state.enqueue_for(message_id, text, now);
            (message_id, state.try_claim_drain(), state.queue.len())
        });

        tracing::debug!(%message_id, queued, starts_drain = claimed, "submitted user message");
        if claimed {
            self.spawn_drain();
        }
        Some(message_id)
    }

    /// Queues `text` without adding a user message to the conversation.
    /// Blank input is ignored.
    pub fn enqueue(self: &Arc<Self>, text: &str) {
        if text.trim().is_empty() {
            tracing::debug!("ignored blank queue item");
            return;
        }

        let now = self.session.now();
        let claimed = self.session.update(|state| {
            state.enqueue(text, now);
            state.try_claim_drain()
        });

        if claimed {
            self.spawn_drain();
        }
    }

    /// Resolves once the queue is empty and no drain is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.session.subscribe();
        // The sender lives inside `self.session`, so this can only end by matching.
        let _ = rx
            .wait_for(|state| !state.is_draining_queue && state.queue.is_empty())
            .await;
    }

    fn spawn_drain(self: &Arc<Self>) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.drain().await });
    }

    async fn drain(&self) {
        tracing::debug!("queue drain started");
        let mut dispatched = 0usize;

        loop {
            let next = self.session.update(|state| match state.dequeue_front() {
                Ok(item) => {
                    state.begin_dispatch();
                    Some(item)
                }
                Err(QueueError::EmptyQueue) => {
                    state.release_drain_if_idle();
                    None
                }
            });
            let Some(item) = next else {
                break;
            };

            let succeeded = self.dispatch(item).await;
            dispatched += 1;

            let more = self.session.read(|state| !state.queue.is_empty());
            if succeeded && more {
                tokio::time::sleep(self.spacing).await;
            }
        }

        tracing::debug!(dispatched, "queue drain finished");
    }

    async fn dispatch(&self, item: PendingItem) -> bool {
        let history = self
            .session
            .read(|state| state.history_before(item.message_id, HISTORY_LIMIT));
        let request = CompletionRequest::new(history, item.text);
        let observer = SessionRetryObserver {
            session: self.session.clone(),
        };

        let succeeded = match self.completion.complete(request, &observer).await {
            Ok(reply) => {
                let now = self.session.now();
                self.session.update(|state| {
                    state.complete_dispatch(reply, now);
                    state.set_connection_status(ConnectionStatus::Connected);
                });
                true
            }
            Err(error) => {
                let category = error.category();
                tracing::warn!(
                    error = %error,
                    category = category.as_str(),
                    "completion failed, moving on to the next queued message"
                );
                // Any non-connectivity error is an answer from the service.
                let status = if category.is_connectivity() {
                    ConnectionStatus::Disconnected
                } else {
                    ConnectionStatus::Connected
                };
                self.session.update(|state| {
                    state.fail_dispatch(category);
                    state.set_connection_status(status);
                });
                false
            }
        };

        self.persist_snapshot().await;
        succeeded
    }

    async fn persist_snapshot(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let Some((messages, session_id)) = self.session.read(|state| {
            state
                .session_id
                .map(|session_id| (state.messages.clone(), session_id))
        }) else {
            return;
        };

        let saved = tokio::task::spawn_blocking(move || store.save(&messages, session_id)).await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(error = %error, "failed to save session snapshot"),
            Err(error) => tracing::warn!(error = %error, "session snapshot task did not finish"),
        }
    }
}

struct SessionRetryObserver {
    session: SessionHandle,
}

impl RetryObserver<CompletionError> for SessionRetryObserver {
    fn on_retry(&self, notice: &RetryNotice<'_, CompletionError>) {
        tracing::debug!(
            next_attempt = notice.next_attempt + 1,
            delay_ms = notice.delay.as_millis() as u64,
            "completion retry scheduled"
        );
        self.session.update(SessionState::record_retry);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures::FutureExt;
    use futures::future::BoxFuture;
    use parley_core::{ErrorCategory, ManualClock, Sender};
    use parley_llm::CompletionResult;

    use super::*;

    /// Replies by echoing, and records every request it saw.
    #[derive(Default)]
    struct Echo {
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ChatCompletion for Echo {
        fn complete<'a>(
            &'a self,
            request: CompletionRequest,
            _observer: &'a dyn RetryObserver<CompletionError>,
        ) -> BoxFuture<'a, CompletionResult<String>> {
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let reply = format!("echo: {}", request.text);
                self.seen.lock().expect("lock").push(request);
                Ok(reply)
            }
            .boxed()
        }

        fn health_check(&self) -> BoxFuture<'_, CompletionResult<()>> {
            async { Ok(()) }.boxed()
        }

        fn is_offline(&self) -> bool {
            true
        }
    }

    /// Fails with a scripted status for the first calls, then echoes.
    struct Scripted {
        failures: Mutex<VecDeque<u16>>,
    }

    impl ChatCompletion for Scripted {
        fn complete<'a>(
            &'a self,
            request: CompletionRequest,
            observer: &'a dyn RetryObserver<CompletionError>,
        ) -> BoxFuture<'a, CompletionResult<String>> {
            async move {
                let failure = self.failures.lock().expect("lock").pop_front();
                match failure {
                    Some(status) => {
                        let error = CompletionError::HttpStatus {
                            stage: "scripted",
                            status,
                            message: "scripted failure".to_string(),
                        };
                        if error.category().is_retryable() {
                            observer.on_retry(&RetryNotice {
                                next_attempt: 1,
                                delay: Duration::from_secs(1),
                                error: &error,
                            });
                        }
                        Err(error)
                    }
                    None => Ok(format!("ok: {}", request.text)),
                }
            }
            .boxed()
        }

        fn health_check(&self) -> BoxFuture<'_, CompletionResult<()>> {
            async { Ok(()) }.boxed()
        }

        fn is_offline(&self) -> bool {
            false
        }
    }

    fn dispatcher(completion: Arc<dyn ChatCompletion>) -> Arc<QueueDispatcher> {
        let session = SessionHandle::new(Arc::new(ManualClock::new(1_000)));
        Arc::new(QueueDispatcher::new(session, completion))
    }

    #[tokio::test(start_paused = true)]
    async fn blank_submit_is_ignored() {
        let dispatcher = dispatcher(Arc::new(Echo::default()));

        assert_eq!(dispatcher.submit("   "), None);

        let state = dispatcher.session().snapshot();
        assert!(state.messages.is_empty());
        assert!(state.queue.is_empty());
        assert_eq!(dispatcher.dispatch_state(), DispatchState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn replies_arrive_in_submission_order() {
        let echo = Arc::new(Echo::default());
        let dispatcher = dispatcher(echo.clone());

        for text in ["one", "two", "three"] {
            dispatcher.submit(text);
        }
        assert_eq!(dispatcher.dispatch_state(), DispatchState::Draining);
        dispatcher.wait_idle().await;

        let state = dispatcher.session().snapshot();
        let texts = state
            .messages
            .iter()
            .filter(|message| message.sender == Sender::Assistant)
            .map(|message| message.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, ["echo: one", "echo: two", "echo: three"]);
        assert!(!state.is_loading);
        assert!(!state.is_typing);
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        assert_eq!(echo.seen.lock().expect("lock").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn history_stops_before_the_dispatched_message() {
        let echo = Arc::new(Echo::default());
        let dispatcher = dispatcher(echo.clone());

        dispatcher.submit("first");
        dispatcher.submit("second");
        dispatcher.wait_idle().await;

        let seen = echo.seen.lock().expect("lock");
        assert!(seen[0].history.is_empty());
        let second_history = seen[1]
            .history
            .iter()
            .map(|message| message.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(second_history, ["first", "echo: first"]);
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_follows_successful_dispatches() {
        let dispatcher = dispatcher(Arc::new(Echo::default()));
        let started = tokio::time::Instant::now();

        dispatcher.submit("a");
        dispatcher.submit("b");
        dispatcher.wait_idle().await;

        // Two 100ms replies plus one spacing gap between them.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(700), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(800), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_item_is_dropped_and_the_queue_continues() {
        let scripted = Arc::new(Scripted {
            failures: Mutex::new(VecDeque::from([503])),
        });
        let dispatcher = dispatcher(scripted);

        dispatcher.submit("doomed");
        dispatcher.submit("survivor");
        dispatcher.wait_idle().await;

        let state = dispatcher.session().snapshot();
        let texts = state
            .messages
            .iter()
            .map(|message| message.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, ["doomed", "survivor", "ok: survivor"]);
        // The later success cleared the error and restored the connection.
        assert_eq!(state.last_error, None);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_failure_marks_disconnected() {
        let scripted = Arc::new(Scripted {
            failures: Mutex::new(VecDeque::from([503])),
        });
        let dispatcher = dispatcher(scripted);

        dispatcher.submit("only");
        dispatcher.wait_idle().await;

        let state = dispatcher.session().snapshot();
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(
            state.last_error_category,
            Some(ErrorCategory::ServiceUnavailable)
        );
        assert_eq!(
            state.last_error.as_deref(),
            Some(ErrorCategory::ServiceUnavailable.user_message())
        );
        assert_eq!(state.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_still_counts_as_reachable() {
        let scripted = Arc::new(Scripted {
            failures: Mutex::new(VecDeque::from([401])),
        });
        let dispatcher = dispatcher(scripted);

        dispatcher.submit("secret");
        dispatcher.wait_idle().await;

        let state = dispatcher.session().snapshot();
        assert_eq!(state.last_error_category, Some(ErrorCategory::AuthError));
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        assert_eq!(state.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhaustion_settles_back_to_connected() {
        let scripted = Arc::new(Scripted {
            failures: Mutex::new(VecDeque::from([429])),
        });
        let dispatcher = dispatcher(scripted);

        // The scripted 429 reports one retry before giving up.
        dispatcher.submit("busy?");
        dispatcher.wait_idle().await;

        let state = dispatcher.session().snapshot();
        assert_eq!(state.last_error_category, Some(ErrorCategory::RateLimited));
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        assert_eq!(state.retry_count, 0);
        assert_eq!(dispatcher.dispatch_state(), DispatchState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_text_keeps_its_indentation() {
        let echo = Arc::new(Echo::default());
        let dispatcher = dispatcher(echo.clone());
        let pasted = "    fn main() {}\n";

        dispatcher.submit(pasted);
        dispatcher.wait_idle().await;

        let state = dispatcher.session().snapshot();
        assert_eq!(state.messages[0].text, pasted);
        assert_eq!(echo.seen.lock().expect("lock")[0].text, pasted);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_enqueue_is_ignored() {
        let echo = Arc::new(Echo::default());
        let dispatcher = dispatcher(echo.clone());

        dispatcher.enqueue(" \t\n");

        assert!(dispatcher.session().snapshot().queue.is_empty());
        assert_eq!(dispatcher.dispatch_state(), DispatchState::Idle);
        dispatcher.wait_idle().await;
        assert!(echo.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_without_user_message_still_dispatches() {
        let echo = Arc::new(Echo::default());
        let dispatcher = dispatcher(echo.clone());

        dispatcher.enqueue("background");
        dispatcher.wait_idle().await;

        let state = dispatcher.session().snapshot();
        assert_eq!(state.count_by_sender(Sender::User), 0);
        assert_eq!(state.count_by_sender(Sender::Assistant), 1);
        assert_eq!(echo.seen.lock().expect("lock")[0].text, "background");
    }
}
