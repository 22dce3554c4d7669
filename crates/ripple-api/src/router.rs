use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::handlers::{health, posts, rooms, votes, ws};
use crate::session::require_session;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(health::health))
        .route("/api/rooms", post(rooms::create_room))
        .route("/api/rooms/{room_id}", get(rooms::get_room))
        .route("/api/rooms/{room_id}/join", post(rooms::join_room))
        .route("/api/rooms/{room_id}/posts", get(rooms::list_posts))
        .route("/api/rooms/{room_id}/ws", get(ws::live_connection));

    let session_routes = Router::new()
        .route("/api/rooms/{room_id}/posts", post(posts::create_post))
        .route("/api/posts/{post_id}/vote", post(votes::cast_vote))
        .layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .with_state(state)
}
