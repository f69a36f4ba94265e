use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

/// Sliding-window request limiter keyed by user id. Prune, check, and record
/// happen under one lock so simultaneous requests for the same user cannot
/// both slip under the limit.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    hits: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Records the request and reports whether it is allowed.
    pub async fn check(&self, user_id: Uuid) -> bool {
        self.check_at(user_id, Instant::now()).await
    }

    async fn check_at(&self, user_id: Uuid, now: Instant) -> bool {
        let mut hits = self.hits.lock().await;
        let window = hits.entry(user_id).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.limit as usize {
            return false;
        }
        window.push_back(now);
        true
    }
}
