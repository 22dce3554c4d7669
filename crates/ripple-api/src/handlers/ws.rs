use axum::{
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::close_code,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, error};
use uuid::Uuid;

use ripple_gateway::connection::{self, CLOSE_CANNOT_JOIN, CLOSE_ROOM_NOT_FOUND, LiveSession};

use super::blocking;
use crate::error::RippleError;
use crate::session::presented_token;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LiveParams {
    pub token: Option<String>,
}

/// Upgrade to a live room connection. The session comes from `?token=`, the
/// bearer header or the session cookie; without one a new session joins.
/// Rooms that cannot be joined still upgrade, then close with a code the
/// client can act on.
pub async fn live_connection(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(params): Query<LiveParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let session_id = params
        .token
        .or_else(|| presented_token(&headers))
        .and_then(|token| state.coordinator.tokens().verify_for_room(&token, room_id).ok())
        .map(|claims| claims.sub);

    match blocking(&state, move |c| c.join_room(room_id, session_id)).await {
        Ok(grant) => {
            let dispatcher = state.coordinator.dispatcher().clone();
            let session = LiveSession {
                room_id,
                session_id: grant.session_id,
                anonymous_id: grant.participant.anonymous_id,
            };
            ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, session))
        }
        Err(err) => {
            let (code, reason) = match &err {
                RippleError::NotFound(_) => (CLOSE_ROOM_NOT_FOUND, err.to_string()),
                RippleError::Expired | RippleError::Full => (CLOSE_CANNOT_JOIN, err.to_string()),
                other => {
                    error!("Live connection to room {} failed: {}", room_id, other);
                    (close_code::ERROR, "internal error".to_string())
                }
            };
            debug!("Refusing live connection to room {}: {}", room_id, reason);
            ws.on_upgrade(move |socket| connection::reject(socket, code, reason))
        }
    }
}
