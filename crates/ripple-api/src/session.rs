use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use uuid::Uuid;

use ripple_types::api::SessionClaims;

use crate::error::{Result, RippleError};
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "ripple_session";

/// Token presented with a request: `Authorization: Bearer` first, then the
/// session cookie.
pub fn presented_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
    })
}

pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

/// Reject a room-scoped session used against another room.
pub fn ensure_scope(claims: &SessionClaims, room_id: Uuid) -> Result<()> {
    match claims.room_id {
        Some(scope) if scope != room_id => Err(RippleError::InvalidToken),
        _ => Ok(()),
    }
}

/// Verify the presented session token and hand its claims to the handler.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = presented_token(req.headers()).ok_or(RippleError::InvalidToken)?;
    let claims = state.coordinator.tokens().verify(&token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
