use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use ripple_types::api::{CreatePostRequest, SessionClaims};

use crate::error::Result;
use crate::session::ensure_scope;
use crate::state::AppState;

pub async fn create_post(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse> {
    ensure_scope(&claims, room_id)?;

    let post = state
        .coordinator
        .create_post(room_id, claims.sub, req.content, req.parent_id)
        .await?;

    Ok((StatusCode::CREATED, Json(post)))
}
