use std::sync::Arc;

use parley_core::{Clock, ConnectionStatus, DispatchState, Message, SessionId, SessionState};
use tokio::sync::watch;

/// Shared, observable owner of one [`SessionState`].
///
/// Every mutation runs inside a single `send_modify`, so a transition is
/// applied atomically and each subscriber sees the result.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<watch::Sender<SessionState>>,
    clock: Arc<dyn Clock>,
}

impl SessionHandle {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(SessionState::new());
        Self {
            state: Arc::new(state),
            clock,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_unix_millis()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Cloned copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.state.borrow())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut output = None;
        self.state.send_modify(|state| output = Some(f(state)));
        output.expect("send_modify runs its closure exactly once")
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.read(SessionState::dispatch_state)
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.update(|state| state.set_connection_status(status));
    }

    pub fn clear_error(&self) {
        self.update(SessionState::clear_error);
    }

    pub fn assign_session_id(&self, session_id: SessionId) {
        self.update(|state| state.session_id = Some(session_id));
    }

    pub fn restore_history(&self, messages: Vec<Message>) -> bool {
        self.update(|state| state.restore_history(messages))
    }

    /// Drops the visible conversation. Queue and in-flight work are untouched.
    pub fn clear_messages(&self) {
        self.update(|state| {
            state.messages.clear();
            state.clear_error();
        });
    }
}
