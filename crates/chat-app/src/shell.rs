use parley_core::{ConnectionStatus, DispatchState, MessageId, Sender, SessionState};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::app::{App, AppResult};

pub const HELP: &str = "commands: /status, /clear, /model <id>, /offline on|off, /help, /quit. Anything else is sent as a message.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Status,
    Clear,
    Model(String),
    Offline(bool),
    Help,
    Quit,
    Unknown(String),
    Empty,
}

/// Parses one input line. Messages keep their original whitespace.
pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    if let Some(model) = trimmed.strip_prefix("/model ") {
        return Command::Model(model.trim().to_string());
    }
    match trimmed {
        "/status" => Command::Status,
        "/clear" => Command::Clear,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        "/offline on" => Command::Offline(true),
        "/offline off" => Command::Offline(false),
        other if other.starts_with('/') => Command::Unknown(other.to_string()),
        _ => Command::Send(line.to_string()),
    }
}

/// Turns session changes into printable lines, remembering what was shown.
#[derive(Debug, Default)]
pub struct Transcript {
    last_message: Option<MessageId>,
    was_typing: bool,
    last_error: Option<String>,
    last_status: Option<ConnectionStatus>,
}

impl Transcript {
    pub fn render(&mut self, state: &SessionState) -> Vec<String> {
        let mut lines = Vec::new();

        if self.last_status != Some(state.connection_status) {
            lines.push(format!("[{}]", status_label(state.connection_status)));
            self.last_status = Some(state.connection_status);
        }

        // A missing anchor means history was cleared underneath us.
        let start = self
            .last_message
            .and_then(|id| state.messages.iter().position(|message| message.id == id))
            .map_or(0, |index| index + 1);
        for message in &state.messages[start..] {
            let prefix = match message.sender {
                Sender::User => "you",
                Sender::Assistant => "bot",
            };
            lines.push(format!("{prefix}> {}", message.text));
        }
        self.last_message = state.messages.last().map(|message| message.id);

        if state.is_typing && !self.was_typing {
            lines.push("bot is typing...".to_string());
        }
        self.was_typing = state.is_typing;

        if state.last_error != self.last_error {
            if let Some(error) = &state.last_error {
                lines.push(format!("! {error}"));
            }
            self.last_error = state.last_error.clone();
        }

        lines
    }
}

pub fn status_line(state: &SessionState) -> String {
    let session = state
        .session_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let dispatch = match state.dispatch_state() {
        DispatchState::Idle => "idle",
        DispatchState::Draining => "draining",
    };
    format!(
        "session {session} | {} | {dispatch} | queue {} | retries {} | messages {}",
        status_label(state.connection_status),
        state.queue.len(),
        state.retry_count,
        state.messages.len(),
    )
}

fn status_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Disconnected => "disconnected",
        ConnectionStatus::Reconnecting => "reconnecting",
    }
}

/// Line-mode chat loop. Ends on `/quit`, or on end of input once every
/// queued message has been answered.
pub async fn run_shell<R, W>(app: &App, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut input = input.lines();
    let mut updates = app.session().subscribe();
    let mut transcript = Transcript::default();

    let initial = transcript.render(&updates.borrow_and_update());
    write_lines(&mut output, &initial).await?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let lines = transcript.render(&updates.borrow_and_update());
                write_lines(&mut output, &lines).await?;
            }
            line = input.next_line() => {
                let Some(line) = line? else {
                    app.dispatcher().wait_idle().await;
                    break;
                };
                match parse_command(&line) {
                    Command::Send(text) => {
                        app.dispatcher().submit(&text);
                    }
                    Command::Status => {
                        let status = app.session().read(status_line);
                        write_lines(&mut output, &[status]).await?;
                    }
                    Command::Clear => {
                        app.clear_history().await;
                        write_lines(&mut output, &["history cleared".to_string()]).await?;
                    }
                    Command::Model(model) => {
                        let applied = app
                            .apply_settings(|settings| settings.model = model)
                            .await
                            .map(|settings| format!("model set to {}", settings.model));
                        write_lines(&mut output, &[settings_outcome(applied)]).await?;
                    }
                    Command::Offline(enabled) => {
                        let applied = app
                            .apply_settings(|settings| settings.use_offline_responder = enabled)
                            .await
                            .map(|settings| {
                                let mode = if settings.is_offline() { "offline" } else { "live" };
                                format!("now answering {mode}")
                            });
                        write_lines(&mut output, &[settings_outcome(applied)]).await?;
                    }
                    Command::Help => write_lines(&mut output, &[HELP.to_string()]).await?,
                    Command::Unknown(command) => {
                        let message = format!("unknown command {command}. {HELP}");
                        write_lines(&mut output, &[message]).await?;
                    }
                    Command::Quit => {
                        tracing::info!("shell closed by user");
                        return output.flush().await;
                    }
                    Command::Empty => {}
                }
            }
        }
    }

    let remaining = transcript.render(&updates.borrow_and_update());
    write_lines(&mut output, &remaining).await?;
    output.flush().await
}

fn settings_outcome(applied: AppResult<String>) -> String {
    applied.unwrap_or_else(|error| {
        tracing::warn!(error = %error, "settings change rejected");
        format!("! settings unchanged: {error}")
    })
}

async fn write_lines<W>(output: &mut W, lines: &[String]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for line in lines {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await
}
