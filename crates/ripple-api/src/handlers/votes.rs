use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use ripple_types::api::{SessionClaims, VoteRequest, VoteResponse};

use crate::error::Result;
use crate::state::AppState;

pub async fn cast_vote(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteResponse>> {
    let outcome = state
        .coordinator
        .cast_vote(&claims, post_id, &req.vote_type)
        .await?;

    Ok(Json(VoteResponse {
        post_id,
        vote_type: outcome.direction.as_str().to_string(),
        new_score: outcome.new_score,
    }))
}
