pub mod clock;
pub mod error;
pub mod ids;
pub mod message;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult, ErrorCategory, QueueError};
pub use ids::{MessageId, SessionId};
pub use message::{Message, PendingItem, Sender};
pub use session::{ConnectionStatus, DispatchState, SessionState};
