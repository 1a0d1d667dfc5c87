use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::FutureExt;
use futures::future::BoxFuture;
use parley_core::{Clock, ConnectionStatus, SystemClock};
use parley_llm::{
    ChatCompletion, CompletionClient, CompletionError, CompletionRequest, CompletionResult,
    RetryObserver,
};
use parley_storage::{SnapshotStore, SqliteSnapshotStore};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::chat::{BootstrapReport, QueueDispatcher, SessionBootstrapper, SessionHandle};
use crate::settings::{Settings, SettingsError, SettingsStore};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to build completion client on `{stage}`: {source}"))]
    CompletionClient {
        stage: &'static str,
        source: CompletionError,
    },
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    SaveSettings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("settings are read-only in this session on `{stage}`"))]
    SettingsReadOnly { stage: &'static str },
}

pub type AppResult<T> = Result<T, AppError>;

/// Completion service that can be replaced while the session runs.
///
/// A dispatch already in flight keeps the client it started with.
pub struct CompletionSlot {
    current: ArcSwap<Arc<dyn ChatCompletion>>,
}

impl CompletionSlot {
    pub fn new(completion: Arc<dyn ChatCompletion>) -> Self {
        Self {
            current: ArcSwap::from_pointee(completion),
        }
    }

    pub fn replace(&self, completion: Arc<dyn ChatCompletion>) {
        self.current.store(Arc::new(completion));
    }
}

impl ChatCompletion for CompletionSlot {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
        observer: &'a dyn RetryObserver<CompletionError>,
    ) -> BoxFuture<'a, CompletionResult<String>> {
        let current = self.current.load_full();
        async move { current.complete(request, observer).await }.boxed()
    }

    fn health_check(&self) -> BoxFuture<'_, CompletionResult<()>> {
        let current = self.current.load_full();
        async move { current.health_check().await }.boxed()
    }

    fn is_offline(&self) -> bool {
        self.current.load().is_offline()
    }
}

/// Everything one chat session needs, wired together.
pub struct App {
    session: SessionHandle,
    dispatcher: Arc<QueueDispatcher>,
    bootstrapper: SessionBootstrapper,
    completion: Arc<CompletionSlot>,
    store: Option<Arc<dyn SnapshotStore>>,
    settings: Option<SettingsStore>,
}

impl App {
    pub async fn build(settings_store: SettingsStore) -> AppResult<Self> {
        let settings = settings_store.settings();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let client = build_client(&settings, "app-build-completion-client")?;
        let store = if settings.persist_history {
            open_snapshot_store(&settings, Arc::clone(&clock)).await
        } else {
            None
        };

        let mut app = Self::from_parts(client, store, clock);
        app.settings = Some(settings_store);
        Ok(app)
    }

    /// Wires an app around ready-made parts. Settings cannot be changed at runtime.
    pub fn from_parts(
        completion: Arc<dyn ChatCompletion>,
        store: Option<Arc<dyn SnapshotStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let completion = Arc::new(CompletionSlot::new(completion));
        let session = SessionHandle::new(clock);
        let mut dispatcher = QueueDispatcher::new(session.clone(), completion.clone());
        let mut bootstrapper = SessionBootstrapper::new(completion.clone());
        if let Some(store) = &store {
            dispatcher = dispatcher.with_store(Arc::clone(store));
            bootstrapper = bootstrapper.with_store(Arc::clone(store));
        }

        Self {
            session,
            dispatcher: Arc::new(dispatcher),
            bootstrapper,
            completion,
            store,
            settings: None,
        }
    }

    pub async fn start(&self) -> BootstrapReport {
        self.bootstrapper.run(&self.session).await
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn dispatcher(&self) -> &Arc<QueueDispatcher> {
        &self.dispatcher
    }

    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.settings.as_ref().map(SettingsStore::settings)
    }

    /// Applies `change` to the current settings, saves them, and swaps in a
    /// completion client built from the result.
    ///
    /// Nothing is saved when the new client cannot be built. Messages already
    /// queued are sent with the new client.
    pub async fn apply_settings<F>(&self, change: F) -> AppResult<Arc<Settings>>
    where
        F: FnOnce(&mut Settings),
    {
        let store = self.settings.as_ref().context(SettingsReadOnlySnafu {
            stage: "apply-settings",
        })?;
        let mut next = (*store.settings()).clone();
        change(&mut next);
        let next = next.normalized();

        let client = build_client(&next, "rebuild-completion-client")?;
        store.update(next).context(SaveSettingsSnafu {
            stage: "persist-changed-settings",
        })?;
        self.completion.replace(client);

        let status = match self.completion.health_check().await {
            Ok(()) => ConnectionStatus::Connected,
            Err(error) => {
                tracing::warn!(error = %error, "health check failed after settings change");
                ConnectionStatus::Disconnected
            }
        };
        self.session.set_connection_status(status);

        let applied = store.settings();
        tracing::info!(
            model = %applied.model,
            offline = applied.is_offline(),
            connection_status = ?status,
            "applied settings change"
        );
        Ok(applied)
    }

    /// Clears the visible conversation and the stored snapshot.
    pub async fn clear_history(&self) {
        self.session.clear_messages();
        let Some(store) = self.store.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || store.clear()).await {
            Ok(Ok(())) => tracing::info!("cleared stored session snapshot"),
            Ok(Err(error)) => tracing::warn!(error = %error, "failed to clear session snapshot"),
            Err(error) => tracing::warn!(error = %error, "snapshot clear task did not finish"),
        }
    }
}

fn build_client(settings: &Settings, stage: &'static str) -> AppResult<Arc<dyn ChatCompletion>> {
    let client = CompletionClient::new(settings.to_client_config())
        .context(CompletionClientSnafu { stage })?;
    Ok(Arc::new(client))
}

async fn open_snapshot_store(
    settings: &Settings,
    clock: Arc<dyn Clock>,
) -> Option<Arc<dyn SnapshotStore>> {
    let location = settings.database_location();
    match SqliteSnapshotStore::open(&location.display().to_string(), clock).await {
        Ok(store) => Some(Arc::new(store)),
        Err(error) => {
            tracing::warn!(
                path = %location.display(),
                error = %error,
                "snapshot store unavailable, history will not persist"
            );
            None
        }
    }
}
