use serde::{Deserialize, Serialize};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoreError {
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Outcome of [`crate::SessionState::dequeue_front`] when nothing is waiting.
///
/// A query result rather than a failure; the dispatcher uses it to end a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    #[snafu(display("dispatch queue is empty"))]
    EmptyQueue,
}

/// User-facing failure categories for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Timeout,
    RateLimited,
    ServiceUnavailable,
    AuthError,
    RequestError,
    MalformedResponse,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::ServiceUnavailable
        )
    }

    /// Whether this failure says something about reachability of the service.
    pub fn is_connectivity(self) -> bool {
        matches!(self, Self::Timeout | Self::ServiceUnavailable)
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::Timeout => "The assistant took too long to answer. Please try again.",
            Self::RateLimited => "Too many requests right now. Please wait a moment and resend.",
            Self::ServiceUnavailable => {
                "The assistant service is unavailable. Check your connection and resend."
            }
            Self::AuthError => "The API credentials were rejected. Check your API key.",
            Self::RequestError => "The request was rejected by the assistant service.",
            Self::MalformedResponse => "The assistant returned an empty or unreadable answer.",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate-limited",
            Self::ServiceUnavailable => "service-unavailable",
            Self::AuthError => "auth-error",
            Self::RequestError => "request-error",
            Self::MalformedResponse => "malformed-response",
        }
    }
}
