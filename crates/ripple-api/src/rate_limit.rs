use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, RippleError};
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CreatePost,
    CastVote,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum actions admitted within `window`
    pub max_actions: usize,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_actions: usize, window: Duration) -> Self {
        Self { max_actions, window }
    }

    pub fn per_minute(max_actions: usize) -> Self {
        Self::new(max_actions, Duration::from_secs(60))
    }
}

type Window = Arc<Mutex<VecDeque<Instant>>>;

/// Sliding-window limiter keyed by (session, action).
///
/// The key map is locked only to look up or insert a window; admission
/// itself serializes on the per-key window, so two tabs of one session race
/// on the same lock and never double-spend a slot.
pub struct RateLimiter {
    post: RateLimitConfig,
    vote: RateLimitConfig,
    windows: Mutex<HashMap<(Uuid, ActionKind), Window>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::per_minute(30), RateLimitConfig::per_minute(100))
    }
}

impl RateLimiter {
    pub fn new(post: RateLimitConfig, vote: RateLimitConfig) -> Self {
        Self {
            post,
            vote,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn config(&self, action: ActionKind) -> RateLimitConfig {
        match action {
            ActionKind::CreatePost => self.post,
            ActionKind::CastVote => self.vote,
        }
    }

    /// Admit the action iff fewer than `max_actions` were admitted for this
    /// key within the trailing window. Only admitted actions are recorded.
    pub fn allow(&self, session_id: Uuid, action: ActionKind) -> bool {
        let config = self.config(action);
        let window = lock(&self.windows)
            .entry((session_id, action))
            .or_default()
            .clone();

        let mut stamps = lock(&window);
        let now = Instant::now();
        evict_stale(&mut stamps, now, config.window);

        if stamps.len() >= config.max_actions {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// `allow`, as a typed failure.
    pub fn check(&self, session_id: Uuid, action: ActionKind) -> Result<()> {
        if self.allow(session_id, action) {
            Ok(())
        } else {
            debug!("Session {} rate limited for {:?}", session_id, action);
            Err(RippleError::RateLimited)
        }
    }

    /// Drop windows with no timestamps left inside their period. Returns the
    /// number of keys removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut windows = lock(&self.windows);
        let before = windows.len();
        windows.retain(|(_, action), window| {
            // Someone is mid-`allow` on this key
            if Arc::strong_count(window) > 1 {
                return true;
            }
            let mut stamps = lock(window);
            evict_stale(&mut stamps, now, self.config(*action).window);
            !stamps.is_empty()
        });
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        lock(&self.windows).len()
    }
}

fn evict_stale(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while stamps
        .front()
        .is_some_and(|oldest| now.duration_since(*oldest) >= window)
    {
        stamps.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;

    fn limiter(max_actions: usize) -> RateLimiter {
        let config = RateLimitConfig::new(max_actions, Duration::from_secs(60));
        RateLimiter::new(config, config)
    }

    #[test]
    fn test_ceiling_per_key() {
        let limiter = limiter(3);
        let session = Uuid::new_v4();

        for _ in 0..3 {
            assert!(limiter.allow(session, ActionKind::CreatePost));
        }
        assert!(!limiter.allow(session, ActionKind::CreatePost));
        assert!(matches!(
            limiter.check(session, ActionKind::CreatePost),
            Err(RippleError::RateLimited)
        ));

        // Other actions and other sessions have their own windows
        assert!(limiter.allow(session, ActionKind::CastVote));
        assert!(limiter.allow(Uuid::new_v4(), ActionKind::CreatePost));
    }

    #[test]
    fn test_distinct_ceilings() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(1), RateLimitConfig::per_minute(2));
        let session = Uuid::new_v4();

        assert!(limiter.allow(session, ActionKind::CreatePost));
        assert!(!limiter.allow(session, ActionKind::CreatePost));
        assert!(limiter.allow(session, ActionKind::CastVote));
        assert!(limiter.allow(session, ActionKind::CastVote));
        assert!(!limiter.allow(session, ActionKind::CastVote));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = limiter(2);
        let session = Uuid::new_v4();

        assert!(limiter.allow(session, ActionKind::CreatePost));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.allow(session, ActionKind::CreatePost));
        assert!(!limiter.allow(session, ActionKind::CreatePost));

        // First stamp ages out; the rejected call above recorded nothing
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.allow(session, ActionKind::CreatePost));
        assert!(!limiter.allow(session, ActionKind::CreatePost));
    }

    #[test]
    fn test_simultaneous_calls_share_last_slot() {
        for _ in 0..50 {
            let limiter = limiter(2);
            let session = Uuid::new_v4();
            assert!(limiter.allow(session, ActionKind::CreatePost));

            let barrier = Barrier::new(2);
            let admitted: usize = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            limiter.allow(session, ActionKind::CreatePost)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| usize::from(h.join().unwrap()))
                    .sum()
            });
            assert_eq!(admitted, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_idle_windows() {
        let limiter = limiter(5);
        limiter.allow(Uuid::new_v4(), ActionKind::CreatePost);
        limiter.allow(Uuid::new_v4(), ActionKind::CastVote);
        assert_eq!(limiter.prune(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.prune(), 2);
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
