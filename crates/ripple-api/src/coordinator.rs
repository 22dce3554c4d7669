use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use ripple_db::Store;
use ripple_gateway::Dispatcher;
use ripple_types::api::{PostResponse, RoomResponse, SessionClaims};
use ripple_types::events::RoomEvent;
use ripple_types::models::{ParseVoteDirectionError, Participant, Post, Room, VoteDirection};

use crate::error::{Result, RippleError};
use crate::identity::{IdentityPool, TokenService};
use crate::rate_limit::{ActionKind, RateLimiter};
use crate::registry::RoomRegistry;
use crate::sync::offload;
use crate::votes::{VoteAggregator, VoteOutcome};

pub const MAX_POST_CHARS: usize = 500;

/// A session admitted to a room, with a token it can present later.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session_id: Uuid,
    pub token: String,
    pub participant: Participant,
}

/// Sequences every user action across the registry, limiter, vote
/// aggregator and dispatcher. Events are broadcast only after the mutation
/// they describe has been stored.
pub struct RoomCoordinator {
    store: Arc<dyn Store>,
    registry: RoomRegistry,
    votes: VoteAggregator,
    limiter: RateLimiter,
    tokens: TokenService,
    dispatcher: Dispatcher,
    token_ttl: Duration,
}

impl RoomCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        identities: IdentityPool,
        tokens: TokenService,
        limiter: RateLimiter,
        dispatcher: Dispatcher,
        token_ttl: Duration,
    ) -> Self {
        Self {
            registry: RoomRegistry::new(store.clone(), identities),
            votes: VoteAggregator::new(store.clone()),
            store,
            limiter,
            tokens,
            dispatcher,
            token_ttl,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Open a room and seat its creator as the first participant.
    pub fn create_room(
        &self,
        topic: Option<String>,
        ttl: Duration,
        max_participants: u32,
    ) -> Result<(Room, SessionGrant)> {
        let room = self.registry.create(topic, ttl, max_participants)?;
        let grant = self.join_room(room.id, None)?;
        Ok((room, grant))
    }

    /// Admit a session to a room, minting a fresh session when none is
    /// given. Rejoining returns the existing identity.
    pub fn join_room(&self, room_id: Uuid, session_id: Option<Uuid>) -> Result<SessionGrant> {
        let session_id = session_id.unwrap_or_else(Uuid::new_v4);
        let participant = self.registry.join(room_id, session_id)?;
        let token = self.tokens.mint(session_id, Some(room_id), self.token_ttl)?;

        Ok(SessionGrant {
            session_id,
            token,
            participant,
        })
    }

    pub fn room(&self, room_id: Uuid) -> Result<RoomResponse> {
        let state = self.registry.get_live(room_id)?;
        Ok(RoomResponse::from_room(&state.room, state.participant_count, Utc::now()))
    }

    /// Posts of a live room as a reply tree, each level oldest first.
    pub fn posts(&self, room_id: Uuid) -> Result<Vec<PostResponse>> {
        self.registry.get_live(room_id)?;
        let posts = self.store.load_posts(room_id)?;
        Ok(thread_posts(posts))
    }

    /// Store a post from a member of a live room, then broadcast it.
    pub async fn create_post(
        self: &Arc<Self>,
        room_id: Uuid,
        session_id: Uuid,
        content: String,
        parent_id: Option<Uuid>,
    ) -> Result<PostResponse> {
        let coordinator = self.clone();
        let response =
            offload(move || coordinator.store_post(room_id, session_id, content, parent_id)).await?;

        self.dispatcher
            .broadcast(room_id, RoomEvent::NewPost(response.clone()))
            .await;
        Ok(response)
    }

    /// Cast a vote for the session named in `claims`. A room-scoped token
    /// may only vote on posts of its own room.
    pub async fn cast_vote(
        self: &Arc<Self>,
        claims: &SessionClaims,
        post_id: Uuid,
        direction: &str,
    ) -> Result<VoteOutcome> {
        let direction: VoteDirection = direction
            .parse()
            .map_err(|e: ParseVoteDirectionError| RippleError::InvalidArgument(e.to_string()))?;

        let coordinator = self.clone();
        let claims = claims.clone();
        let outcome = offload(move || coordinator.record_vote(&claims, post_id, direction)).await?;

        if outcome.changed {
            self.dispatcher
                .broadcast(
                    outcome.room_id,
                    RoomEvent::NewVote {
                        post_id,
                        new_score: outcome.new_score,
                    },
                )
                .await;
        }
        Ok(outcome)
    }

    /// Close a room before its expiry and disconnect everyone in it.
    pub async fn close_room(self: &Arc<Self>, room_id: Uuid) -> Result<()> {
        let coordinator = self.clone();
        offload(move || coordinator.registry.close(room_id)).await?;
        self.dispatcher.close_room(room_id).await;
        Ok(())
    }

    /// One expiry pass: deactivate overdue rooms, tell their live
    /// connections, and forget idle rate-limit windows. Returns the rooms
    /// retired.
    pub async fn sweep(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<Uuid> {
        let coordinator = self.clone();
        let retired = match offload(move || Ok(coordinator.expire_rooms(now))).await {
            Ok(retired) => retired,
            Err(e) => {
                error!("Sweep pass failed: {}", e);
                return Vec::new();
            }
        };

        for room_id in &retired {
            let dropped = self.dispatcher.close_room(*room_id).await;
            info!("Room {} expired ({} live connections closed)", room_id, dropped);
        }
        retired
    }

    fn store_post(
        &self,
        room_id: Uuid,
        session_id: Uuid,
        content: String,
        parent_id: Option<Uuid>,
    ) -> Result<PostResponse> {
        let length = content.chars().count();
        if content.trim().is_empty() || length > MAX_POST_CHARS {
            return Err(RippleError::InvalidArgument(format!(
                "content must be 1 to {MAX_POST_CHARS} characters"
            )));
        }

        let participant = self.registry.participant(room_id, session_id)?;
        if let Some(parent_id) = parent_id {
            match self.store.load_post(parent_id)? {
                Some(parent) if parent.room_id == room_id => {}
                _ => {
                    return Err(RippleError::InvalidArgument(
                        "parent post does not belong to this room".into(),
                    ));
                }
            }
        }
        self.limiter.check(session_id, ActionKind::CreatePost)?;

        let post = Post {
            id: Uuid::new_v4(),
            room_id,
            content,
            anonymous_id: participant.anonymous_id,
            created_at: Utc::now(),
            parent_id,
            vote_score: 0,
        };
        self.store.save_post(&post)?;
        debug!("{} posted {} in room {}", post.anonymous_id, post.id, room_id);
        Ok(PostResponse::from(post))
    }

    fn record_vote(&self, claims: &SessionClaims, post_id: Uuid, direction: VoteDirection) -> Result<VoteOutcome> {
        let post = self
            .store
            .load_post(post_id)?
            .ok_or(RippleError::NotFound("post"))?;
        if claims.room_id.is_some_and(|scope| scope != post.room_id) {
            debug!("Session {} voted outside its room scope", claims.sub);
            return Err(RippleError::InvalidToken);
        }
        self.registry.get_live(post.room_id)?;
        self.limiter.check(claims.sub, ActionKind::CastVote)?;

        self.votes.cast(post_id, claims.sub, direction)
    }

    fn expire_rooms(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let retired = self.registry.sweep(now);
        let pruned = self.limiter.prune();
        if pruned > 0 {
            debug!("Pruned {} idle rate-limit windows", pruned);
        }
        retired
    }
}

/// Nest posts under their parents. Input order is kept within each level.
fn thread_posts(posts: Vec<Post>) -> Vec<PostResponse> {
    let mut children: HashMap<Option<Uuid>, Vec<PostResponse>> = HashMap::new();
    for post in posts {
        children.entry(post.parent_id).or_default().push(post.into());
    }

    fn attach(node: &mut PostResponse, children: &mut HashMap<Option<Uuid>, Vec<PostResponse>>) {
        if let Some(mut replies) = children.remove(&Some(node.id)) {
            for reply in &mut replies {
                attach(reply, children);
            }
            node.replies = replies;
        }
    }

    let mut roots = children.remove(&None).unwrap_or_default();
    for root in &mut roots {
        attach(root, &mut children);
    }
    roots
}
