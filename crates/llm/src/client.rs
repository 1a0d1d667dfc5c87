use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use parley_core::{Message, Sender};
use snafu::{OptionExt, ResultExt};

use super::classify::{KeywordClassifier, QueryClassifier, SystemPrompt};
use super::error::{
    BuildHttpClientSnafu, CompletionError, CompletionResult, DecodeResponseSnafu,
    HttpStatusSnafu, MalformedResponseSnafu, TransportSnafu,
};
use super::offline::OfflineResponder;
use super::retry::{RetryExecutor, RetryObserver, RetryPolicy};
use super::wire::{
    ChatCompletionRequest, ChatCompletionResponse, ErrorEnvelope, WireMessage, WireRole,
};

/// Hard cap on prior messages sent with each request. Older turns are dropped.
pub const HISTORY_LIMIT: usize = 10;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a concise, friendly assistant. Answer clearly and say so when you are unsure.";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const HEALTH_CHECK_PROMPT: &str = "ping";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub use_offline_responder: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub system_prompt: String,
    pub repository_context: Option<String>,
    pub offline_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            use_offline_responder: false,
            max_tokens: 1_024,
            temperature: 0.7,
            top_p: 1.0,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            repository_context: None,
            offline_delay_ms: OfflineResponder::DEFAULT_DELAY.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    /// Offline mode is forced by the flag or implied by a missing credential.
    pub fn offline_requested(&self) -> bool {
        self.use_offline_responder || self.api_key.trim().is_empty()
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_url.trim().trim_end_matches('/'))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Prior conversation, oldest first. Trimmed to [`HISTORY_LIMIT`] by the client.
    pub history: Vec<Message>,
    pub text: String,
}

impl CompletionRequest {
    pub fn new(history: Vec<Message>, text: impl Into<String>) -> Self {
        Self {
            history,
            text: text.into(),
        }
    }
}

/// Anything that can turn a user message plus history into an assistant reply.
pub trait ChatCompletion: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
        observer: &'a dyn RetryObserver<CompletionError>,
    ) -> BoxFuture<'a, CompletionResult<String>>;

    /// One cheap request with no retries, used to gauge connectivity.
    fn health_check(&self) -> BoxFuture<'_, CompletionResult<()>>;

    fn is_offline(&self) -> bool;
}

enum Backend {
    Live(reqwest::Client),
    Offline(OfflineResponder),
}

pub struct CompletionClient {
    config: ClientConfig,
    backend: Backend,
    executor: RetryExecutor,
    prompt: SystemPrompt,
    classifier: Arc<dyn QueryClassifier>,
}

impl CompletionClient {
    pub fn new(config: ClientConfig) -> CompletionResult<Self> {
        let backend = if config.offline_requested() {
            tracing::info!(
                forced = config.use_offline_responder,
                delay_ms = config.offline_delay_ms,
                "completion client running with the offline responder"
            );
            Backend::Offline(OfflineResponder::new(Duration::from_millis(
                config.offline_delay_ms,
            )))
        } else {
            // No client-wide timeout: the retry executor bounds each attempt instead.
            let http = reqwest::Client::builder()
                .build()
                .context(BuildHttpClientSnafu {
                    stage: "build-http-client",
                })?;
            Backend::Live(http)
        };

        Ok(Self {
            executor: RetryExecutor::new(config.retry_policy()),
            prompt: SystemPrompt {
                base: config.system_prompt.clone(),
                repository_context: config.repository_context.clone(),
            },
            classifier: Arc::new(KeywordClassifier::default()),
            backend,
            config,
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn QueryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Overrides the backoff base delay, mostly useful to keep tests fast.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = RetryExecutor::new(policy);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// System message, then at most [`HISTORY_LIMIT`] committed history entries, then `text`.
    pub fn build_messages(&self, history: &[Message], text: &str) -> Vec<WireMessage> {
        let scope = self.classifier.classify(text);
        let committed = history
            .iter()
            .filter(|message| !message.is_provisional)
            .collect::<Vec<_>>();
        let skip = committed.len().saturating_sub(HISTORY_LIMIT);

        let mut messages = Vec::with_capacity(committed.len() - skip + 2);
        messages.push(WireMessage::new(WireRole::System, self.prompt.render(scope)));
        messages.extend(committed.into_iter().skip(skip).map(|message| {
            let role = match message.sender {
                Sender::User => WireRole::User,
                Sender::Assistant => WireRole::Assistant,
            };
            WireMessage::new(role, message.text.clone())
        }));
        messages.push(WireMessage::new(WireRole::User, text));
        messages
    }

    pub fn build_request(&self, history: &[Message], text: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: self.build_messages(history, text),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stream: false,
        }
    }

    async fn complete_live(
        &self,
        http: &reqwest::Client,
        request: &CompletionRequest,
        observer: &dyn RetryObserver<CompletionError>,
    ) -> CompletionResult<String> {
        let body = self.build_request(&request.history, &request.text);
        let config = &self.config;
        let body_ref = &body;
        let started = Instant::now();

        let response = self
            .executor
            .run_observed(
                move |attempt| {
                    tracing::debug!(
                        attempt = attempt + 1,
                        model = %config.model,
                        message_count = body_ref.messages.len(),
                        "sending completion request"
                    );
                    post_completion(http, config, body_ref)
                },
                observer,
            )
            .await?;

        let content = response
            .first_content()
            .context(MalformedResponseSnafu {
                stage: "validate-completion-choices",
                details: "response has no choice with non-empty content".to_string(),
            })?
            .to_string();

        tracing::info!(
            model = %self.config.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            reply_chars = content.chars().count(),
            "completion request succeeded"
        );
        Ok(content)
    }

    async fn health_check_live(&self, http: &reqwest::Client) -> CompletionResult<()> {
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![WireMessage::new(WireRole::User, HEALTH_CHECK_PROMPT)],
            max_tokens: 1,
            temperature: 0.0,
            top_p: 1.0,
            stream: false,
        };
        let probe = RetryExecutor::new(RetryPolicy::single_attempt(Duration::from_millis(
            self.config.timeout_ms,
        )));
        let config = &self.config;
        let body_ref = &body;

        probe
            .run(move |_| post_completion(http, config, body_ref))
            .await
            .map(|_| ())
    }
}

async fn post_completion(
    http: &reqwest::Client,
    config: &ClientConfig,
    body: &ChatCompletionRequest,
) -> CompletionResult<ChatCompletionResponse> {
    let response = http
        .post(config.endpoint())
        .bearer_auth(config.api_key.trim())
        .json(body)
        .send()
        .await
        .context(TransportSnafu {
            stage: "send-completion-request",
        })?;

    let status = response.status();
    let payload = response.text().await.context(TransportSnafu {
        stage: "read-completion-response",
    })?;

    if !status.is_success() {
        return HttpStatusSnafu {
            stage: "completion-http-status",
            status: status.as_u16(),
            message: ErrorEnvelope::describe(&payload),
        }
        .fail();
    }

    serde_json::from_str(&payload).context(DecodeResponseSnafu {
        stage: "decode-completion-response",
    })
}

impl ChatCompletion for CompletionClient {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
        observer: &'a dyn RetryObserver<CompletionError>,
    ) -> BoxFuture<'a, CompletionResult<String>> {
        async move {
            match &self.backend {
                Backend::Offline(responder) => {
                    let context_len = request.history.len().min(HISTORY_LIMIT);
                    Ok(responder.respond(&request.text, context_len).await)
                }
                Backend::Live(http) => self.complete_live(http, &request, observer).await,
            }
        }
        .boxed()
    }

    fn health_check(&self) -> BoxFuture<'_, CompletionResult<()>> {
        async move {
            match &self.backend {
                Backend::Offline(_) => Ok(()),
                Backend::Live(http) => self.health_check_live(http).await,
            }
        }
        .boxed()
    }

    fn is_offline(&self) -> bool {
        matches!(self.backend, Backend::Offline(_))
    }
}
