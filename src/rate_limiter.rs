use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub const RATE_LIMIT: usize = 10;
pub const TIME_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// クライアントごとのスライディングウィンドウ式レートリミッタ。
/// 拒否した試行はウィンドウに記録しない。
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    log: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            log: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check(&self, identity: &str) -> RateDecision {
        let now = Instant::now();
        let mut log = self.log.lock().await;
        // TODO: sweep identities whose timestamps have all expired so the map
        // does not grow unbounded across many distinct clients.
        let timestamps = log.entry(identity.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            // Entries are pushed in arrival order, so the front is the oldest.
            // A zero-capacity limiter has no entries to age out.
            let retry_after = match timestamps.first() {
                Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                None => self.window,
            };
            return RateDecision::Limited {
                retry_after_secs: retry_after.as_secs_f64().ceil() as u64,
            };
        }

        timestamps.push(now);
        RateDecision::Allowed
    }
}
