/// `commands/rate_limit.rs` — one script run per nick per window
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

pub struct RateLimiter {
    window: Duration,
    last_run: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_run: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a run for `nick` if its window has passed.
    pub fn try_acquire(&self, nick: &str) -> bool {
        self.try_acquire_at(nick, Instant::now())
    }

    pub fn try_acquire_at(&self, nick: &str, now: Instant) -> bool {
        let mut last_run = self
            .last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = self.window;
        last_run.retain(|_, previous| now.saturating_duration_since(*previous) < window);
        let key = nick.to_lowercase();
        if last_run.contains_key(&key) {
            return false;
        }
        last_run.insert(key, now);
        true
    }
}
