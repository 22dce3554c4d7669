//! Anonymous identities and signed session tokens.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use ripple_types::api::{SESSION_TOKEN_TYPE, SessionClaims};

use crate::error::{Result, RippleError};

const ADJECTIVES: &[&str] = &[
    "Happy", "Calm", "Bright", "Swift", "Gentle", "Bold", "Quiet", "Clever", "Kind", "Brave",
    "Lucky", "Eager", "Witty", "Mellow", "Nimble", "Sunny", "Humble", "Jolly", "Keen", "Plucky",
];

const ANIMALS: &[&str] = &[
    "Cat", "Dog", "Bird", "Fish", "Bear", "Wolf", "Fox", "Deer", "Owl", "Bee",
    "Otter", "Heron", "Lynx", "Moth", "Seal", "Crane", "Hare", "Newt", "Wren", "Yak",
];

/// Pool of "Adjective Animal" display labels.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    adjectives: &'static [&'static str],
    animals: &'static [&'static str],
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::new(ADJECTIVES, ANIMALS)
    }
}

impl IdentityPool {
    pub fn new(adjectives: &'static [&'static str], animals: &'static [&'static str]) -> Self {
        Self { adjectives, animals }
    }

    pub fn capacity(&self) -> usize {
        self.adjectives.len() * self.animals.len()
    }

    /// Pick a label for `session_id` that is not in `taken`.
    ///
    /// The first candidate is derived from a hash of (room, session), so a
    /// session tends to get the same label when it rejoins; collisions probe
    /// forward through the pool.
    pub fn issue(&self, room_id: Uuid, session_id: Uuid, taken: &HashSet<String>) -> Result<String> {
        let capacity = self.capacity();
        if capacity == 0 {
            return Err(RippleError::IdentityExhausted);
        }

        let digest = Sha256::digest(format!("{room_id}-{session_id}").as_bytes());
        let seed = digest.iter().take(8).fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let start = (seed % capacity as u64) as usize;

        (0..capacity)
            .map(|offset| self.label((start + offset) % capacity))
            .find(|label| !taken.contains(label))
            .ok_or(RippleError::IdentityExhausted)
    }

    fn label(&self, index: usize) -> String {
        let animals = self.animals.len();
        format!("{} {}", self.adjectives[index / animals], self.animals[index % animals])
    }
}

/// Mints and verifies HS256 session tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a token for `session_id`, optionally scoped to one room, valid
    /// for `ttl` from now.
    pub fn mint(&self, session_id: Uuid, room_id: Option<Uuid>, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: session_id,
            room_id,
            exp: usize::try_from((now + ttl).timestamp()).unwrap_or(0),
            iat: usize::try_from(now.timestamp()).unwrap_or(0),
            typ: SESSION_TOKEN_TYPE.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| RippleError::Internal(e.into()))
    }

    /// Verify signature, structure, type and expiry. Any failure is
    /// `InvalidToken`; a token at or past its expiry second is rejected.
    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        let claims = decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                debug!("Rejected session token: {}", e);
                RippleError::InvalidToken
            })?
            .claims;

        if claims.typ != SESSION_TOKEN_TYPE {
            debug!("Rejected session token with type '{}'", claims.typ);
            return Err(RippleError::InvalidToken);
        }
        let now = usize::try_from(Utc::now().timestamp()).unwrap_or(0);
        if claims.exp <= now {
            return Err(RippleError::InvalidToken);
        }

        Ok(claims)
    }

    /// Like `verify`, but a token scoped to a different room is rejected.
    pub fn verify_for_room(&self, token: &str, room_id: Uuid) -> Result<SessionClaims> {
        let claims = self.verify(token)?;
        match claims.room_id {
            Some(scope) if scope != room_id => {
                debug!("Session token scoped to room {} used for room {}", scope, room_id);
                Err(RippleError::InvalidToken)
            }
            _ => Ok(claims),
        }
    }
}
