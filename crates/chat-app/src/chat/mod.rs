pub mod bootstrap;
pub mod dispatcher;
pub mod session;

pub use bootstrap::{BootstrapReport, SessionBootstrapper};
pub use dispatcher::{DRAIN_SPACING, QueueDispatcher};
pub use session::SessionHandle;
