mod classify;
mod client;
mod error;
mod offline;
mod retry;
mod wire;

pub use classify::{
    DEFAULT_CONTEXT_KEYWORDS, DomainOnlyClassifier, KeywordClassifier, QueryClassifier,
    QueryScope, SystemPrompt,
};
pub use client::{
    ChatCompletion, ClientConfig, CompletionClient, CompletionRequest, DEFAULT_API_URL,
    DEFAULT_MAX_RETRIES, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT, DEFAULT_TIMEOUT_MS, HISTORY_LIMIT,
};
pub use error::{CompletionError, CompletionResult, status_category};
pub use offline::OfflineResponder;
pub use retry::{RetryExecutor, RetryNotice, RetryObserver, RetryPolicy, RetryableError};
pub use wire::{
    ChatCompletionRequest, ChatCompletionResponse, ErrorEnvelope, WireMessage, WireRole,
};
