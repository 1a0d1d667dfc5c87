use std::time::Duration;

use parley_core::ErrorCategory;
use snafu::Snafu;

use super::retry::RetryableError;

pub type CompletionResult<T> = Result<T, CompletionError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompletionError {
    #[snafu(display("completion attempt exceeded {timeout_ms}ms"))]
    AttemptTimedOut { stage: &'static str, timeout_ms: u64 },
    #[snafu(display("completion service returned status {status}: {message}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        message: String,
    },
    #[snafu(display("http transport failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to decode completion response on `{stage}`, {source}"))]
    DecodeResponse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("completion response is malformed: {details}"))]
    MalformedResponse {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to build http client, {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
}

impl CompletionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AttemptTimedOut { .. } => ErrorCategory::Timeout,
            Self::HttpStatus { status, .. } => status_category(*status),
            Self::Transport { source, .. } => {
                if source.is_timeout() {
                    ErrorCategory::Timeout
                } else if source.is_decode() {
                    ErrorCategory::MalformedResponse
                } else if source.is_builder() {
                    ErrorCategory::RequestError
                } else {
                    // Connect failures, resets and body read errors all point at the service.
                    ErrorCategory::ServiceUnavailable
                }
            }
            Self::DecodeResponse { .. } | Self::MalformedResponse { .. } => {
                ErrorCategory::MalformedResponse
            }
            Self::BuildHttpClient { .. } => ErrorCategory::RequestError,
        }
    }
}

/// Maps a non-success HTTP status onto the dispatch error taxonomy.
pub fn status_category(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::AuthError,
        429 => ErrorCategory::RateLimited,
        500.. => ErrorCategory::ServiceUnavailable,
        _ => ErrorCategory::RequestError,
    }
}

impl RetryableError for CompletionError {
    fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    fn attempt_timed_out(limit: Duration) -> Self {
        Self::AttemptTimedOut {
            stage: "completion-attempt-timeout",
            timeout_ms: limit.as_millis() as u64,
        }
    }
}
