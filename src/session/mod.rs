//! The request session: tab working set, history linkage and dispatch.

pub mod cache;
pub mod dispatch;
pub mod events;
mod linkage;
mod workspace;

pub use cache::{DEFAULT_MAX_TABS_IN_MEMORY, TabCache, TabStateUpdate};
pub use dispatch::{Dispatcher, SendOutcome};
pub use events::SessionEvent;
