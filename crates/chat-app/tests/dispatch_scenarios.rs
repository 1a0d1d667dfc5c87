//! End-to-end dispatch behaviour through the public app surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parley::app::App;
use parley::chat::{QueueDispatcher, SessionHandle};
use parley_core::{ConnectionStatus, DispatchState, ManualClock, Sender};
use parley_llm::{
    ChatCompletion, ClientConfig, CompletionClient, CompletionError, CompletionRequest,
    CompletionResult, RetryNotice, RetryObserver,
};
use parley_storage::{MemorySnapshotStore, SnapshotStore};

const START: u64 = 1_700_000_000_000;

fn offline_client(delay_ms: u64) -> Arc<CompletionClient> {
    Arc::new(
        CompletionClient::new(ClientConfig {
            use_offline_responder: true,
            offline_delay_ms: delay_ms,
            ..ClientConfig::default()
        })
        .expect("offline client should build"),
    )
}

fn offline_app(delay_ms: u64) -> App {
    App::from_parts(
        offline_client(delay_ms),
        None,
        Arc::new(ManualClock::new(START)),
    )
}

fn assistant_texts(app: &App) -> Vec<String> {
    app.session()
        .snapshot()
        .messages
        .into_iter()
        .filter(|message| message.sender == Sender::Assistant)
        .map(|message| message.text)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn single_offline_message_round_trip() {
    let app = offline_app(800);
    app.start().await;
    let mut updates = app.session().subscribe();

    app.dispatcher().submit("hello");

    let state = app.session().snapshot();
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].text, "hello");
    assert_eq!(app.dispatcher().dispatch_state(), DispatchState::Draining);

    updates
        .wait_for(|state| state.is_loading && state.is_typing)
        .await
        .expect("session alive");

    app.dispatcher().wait_idle().await;

    let state = app.session().snapshot();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1].sender, Sender::Assistant);
    assert!(state.messages[1].text.contains("\"hello\""));
    assert!(!state.is_loading);
    assert!(!state.is_typing);
    assert_eq!(state.connection_status, ConnectionStatus::Connected);
    assert_eq!(app.dispatcher().dispatch_state(), DispatchState::Idle);
}

#[tokio::test(start_paused = true)]
async fn back_to_back_submissions_queue_behind_the_first() {
    let app = offline_app(800);
    app.start().await;
    let mut updates = app.session().subscribe();

    for text in ["first", "second", "third"] {
        app.dispatcher().submit(text);
    }

    let in_flight = updates
        .wait_for(|state| state.is_loading)
        .await
        .expect("session alive")
        .clone();
    assert_eq!(in_flight.queue.len(), 2);
    assert_eq!(in_flight.count_by_sender(Sender::User), 3);

    app.dispatcher().wait_idle().await;

    let state = app.session().snapshot();
    assert_eq!(state.messages.len(), 6);
    assert!(state.queue.is_empty());
    let replies = assistant_texts(&app);
    assert!(replies[0].contains("\"first\""));
    assert!(replies[1].contains("\"second\""));
    assert!(replies[2].contains("\"third\""));
}

/// Tracks how many completions run at once.
#[derive(Default)]
struct ConcurrencyProbe {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ChatCompletion for ConcurrencyProbe {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
        _observer: &'a dyn RetryObserver<CompletionError>,
    ) -> BoxFuture<'a, CompletionResult<String>> {
        async move {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("re: {}", request.text))
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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submitters_share_one_drain() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let session = SessionHandle::new(Arc::new(ManualClock::new(START)));
    let dispatcher = Arc::new(
        QueueDispatcher::new(session.clone(), probe.clone())
            .with_spacing(Duration::from_millis(1)),
    );

    let submitters = (0..8)
        .map(|index| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher.submit(&format!("message {index}"));
            })
        })
        .collect::<Vec<_>>();
    for submitter in submitters {
        submitter.await.expect("submitter should not panic");
    }
    dispatcher.wait_idle().await;

    assert_eq!(probe.calls.load(Ordering::SeqCst), 8);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    let state = session.snapshot();
    assert_eq!(state.count_by_sender(Sender::Assistant), 8);
    assert!(!state.is_draining_queue);
}

/// Reports two retries, pausing after each, then succeeds.
struct FlakyThenFine;

impl ChatCompletion for FlakyThenFine {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
        observer: &'a dyn RetryObserver<CompletionError>,
    ) -> BoxFuture<'a, CompletionResult<String>> {
        async move {
            let error = CompletionError::HttpStatus {
                stage: "flaky",
                status: 502,
                message: "bad gateway".to_string(),
            };
            for next_attempt in 1..=2 {
                let delay = Duration::from_secs(1 << (next_attempt - 1));
                observer.on_retry(&RetryNotice {
                    next_attempt,
                    delay,
                    error: &error,
                });
                tokio::time::sleep(delay).await;
            }
            Ok(format!("finally: {}", request.text))
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

#[tokio::test(start_paused = true)]
async fn retries_show_reconnecting_until_the_reply_lands() {
    let app = App::from_parts(
        Arc::new(FlakyThenFine),
        None,
        Arc::new(ManualClock::new(START)),
    );
    app.start().await;
    let mut updates = app.session().subscribe();

    app.dispatcher().submit("are you there?");

    let retrying = updates
        .wait_for(|state| state.retry_count == 2)
        .await
        .expect("session alive")
        .clone();
    assert_eq!(retrying.connection_status, ConnectionStatus::Reconnecting);
    assert!(retrying.is_loading);

    app.dispatcher().wait_idle().await;

    let state = app.session().snapshot();
    assert_eq!(state.connection_status, ConnectionStatus::Connected);
    assert_eq!(state.retry_count, 0);
    assert_eq!(assistant_texts(&app), ["finally: are you there?"]);
}

#[tokio::test]
async fn finished_dispatches_are_snapshotted() {
    let clock = Arc::new(ManualClock::new(START));
    let store = Arc::new(MemorySnapshotStore::new(clock.clone()));
    let shared: Arc<dyn SnapshotStore> = store.clone();
    let app = App::from_parts(offline_client(1), Some(shared), clock);
    let report = app.start().await;

    app.dispatcher().submit("remember me");
    app.dispatcher().wait_idle().await;

    let snapshot = store
        .load()
        .expect("load should succeed")
        .expect("snapshot should be saved after the reply");
    assert_eq!(snapshot.session_id, report.session_id);
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[0].text, "remember me");
}
