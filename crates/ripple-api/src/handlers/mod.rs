pub mod health;
pub mod posts;
pub mod rooms;
pub mod votes;
pub mod ws;

use crate::coordinator::RoomCoordinator;
use crate::error::Result;
use crate::state::AppState;
use crate::sync::offload;

/// Run a storage-bound coordinator call off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T>
where
    F: FnOnce(&RoomCoordinator) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let coordinator = state.coordinator.clone();
    offload(move || f(&coordinator)).await
}
