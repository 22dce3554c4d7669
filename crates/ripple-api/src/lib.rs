pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod session;
pub mod state;
pub mod sweep;
mod sync;
pub mod votes;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::RoomCoordinator;
pub use error::{Result, RippleError};
pub use router::router;
pub use state::{AppState, AppStateInner};
