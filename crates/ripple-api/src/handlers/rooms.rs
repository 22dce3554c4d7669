use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Duration;
use tracing::debug;
use uuid::Uuid;

use ripple_types::api::{CreateRoomRequest, CreateRoomResponse, JoinRoomResponse, PostResponse, RoomResponse};

use super::blocking;
use crate::error::{Result, RippleError};
use crate::session::{presented_token, session_cookie};
use crate::state::AppState;

pub const MAX_TOPIC_CHARS: usize = 200;
const DEFAULT_DURATION_HOURS: i64 = 24;
const MAX_DURATION_HOURS: i64 = 168;
const DEFAULT_MAX_PARTICIPANTS: u32 = 100;
const MAX_PARTICIPANTS: u32 = 1000;

pub async fn create_room(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse> {
    let topic = req
        .topic
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    if topic.as_ref().is_some_and(|t| t.chars().count() > MAX_TOPIC_CHARS) {
        return Err(RippleError::InvalidArgument(format!(
            "topic must be at most {MAX_TOPIC_CHARS} characters"
        )));
    }

    let hours = req.duration_hours.unwrap_or(DEFAULT_DURATION_HOURS);
    if !(1..=MAX_DURATION_HOURS).contains(&hours) {
        return Err(RippleError::InvalidArgument(format!(
            "duration_hours must be between 1 and {MAX_DURATION_HOURS}"
        )));
    }

    let max_participants = req.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS);
    if !(1..=MAX_PARTICIPANTS).contains(&max_participants) {
        return Err(RippleError::InvalidArgument(format!(
            "max_participants must be between 1 and {MAX_PARTICIPANTS}"
        )));
    }

    let (room, grant) = blocking(&state, move |c| {
        let (room, grant) = c.create_room(topic, Duration::hours(hours), max_participants)?;
        Ok((c.room(room.id)?, grant))
    })
    .await?;

    let jar = jar.add(session_cookie(grant.token.clone(), state.secure_cookies));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(CreateRoomResponse {
            room,
            session_token: grant.token,
            session_id: grant.session_id,
            anonymous_id: grant.participant.anonymous_id,
        }),
    ))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomResponse>> {
    let room = blocking(&state, move |c| c.room(room_id)).await?;
    Ok(Json(room))
}

/// Join a room, reusing the session of any valid token presented. A missing
/// or unusable token starts a new session.
pub async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse> {
    let session_id = presented_token(&headers).and_then(|token| {
        state
            .coordinator
            .tokens()
            .verify(&token)
            .map(|claims| claims.sub)
            .inspect_err(|_| debug!("Ignoring unusable token on join of room {}", room_id))
            .ok()
    });

    let grant = blocking(&state, move |c| c.join_room(room_id, session_id)).await?;

    let jar = jar.add(session_cookie(grant.token.clone(), state.secure_cookies));
    Ok((
        jar,
        Json(JoinRoomResponse {
            session_token: grant.token,
            anonymous_id: grant.participant.anonymous_id,
            session_id: grant.session_id,
        }),
    ))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Vec<PostResponse>>> {
    let posts = blocking(&state, move |c| c.posts(room_id)).await?;
    Ok(Json(posts))
}
