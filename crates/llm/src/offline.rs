use std::time::Duration;

const OFFLINE_OPENERS: &[&str] = &[
    "Offline mode is active, so here is a canned answer.",
    "No completion service is configured; replying locally.",
    "This reply comes from the built-in offline responder.",
];

const ECHO_LIMIT: usize = 80;

/// Deterministic stand-in for the completion service.
#[derive(Debug, Clone, Copy)]
pub struct OfflineResponder {
    delay: Duration,
}

impl OfflineResponder {
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(800);

    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn respond(&self, text: &str, history_len: usize) -> String {
        tokio::time::sleep(self.delay).await;
        self.reply_for(text, history_len)
    }

    /// Same input always yields the same reply.
    pub fn reply_for(&self, text: &str, history_len: usize) -> String {
        let trimmed = text.trim();
        let opener_index = trimmed.bytes().map(usize::from).sum::<usize>() % OFFLINE_OPENERS.len();
        let mut echo = trimmed.chars().take(ECHO_LIMIT).collect::<String>();
        if trimmed.chars().count() > ECHO_LIMIT {
            echo.push('…');
        }

        format!(
            "{} You said: \"{echo}\" ({history_len} earlier messages in context).",
            OFFLINE_OPENERS[opener_index]
        )
    }
}

impl Default for OfflineResponder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY)
    }
}
