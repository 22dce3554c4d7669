use std::sync::Arc;

use crate::coordinator::RoomCoordinator;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub coordinator: Arc<RoomCoordinator>,
    /// Mark session cookies `Secure` (HTTPS deployments).
    pub secure_cookies: bool,
}
