use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

/// Fixed-window cooldown for agent triggers, keyed by user identity.
///
/// Stores the time of the last *accepted* trigger only; rejected attempts
/// leave it untouched, so a user retrying during the cooldown does not
/// extend it.
#[derive(Clone, Default)]
pub struct RateLimiter {
    last_accepted: Arc<Mutex<HashMap<String, u64>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept if at least `window_ms` has passed since the identity's last
    /// accepted trigger (absent = time zero). The boundary is inclusive.
    pub async fn try_acquire(&self, identity: &str, now_ms: u64, window_ms: u64) -> bool {
        let mut last_accepted = self.last_accepted.lock().await;
        let last = last_accepted.get(identity).copied().unwrap_or(0);

        if now_ms.saturating_sub(last) >= window_ms {
            last_accepted.insert(identity.to_string(), now_ms);
            true
        } else {
            false
        }
    }

    /// Evict entries whose cooldown has fully elapsed. An evicted identity
    /// would be accepted anyway, so this never changes an outcome.
    pub async fn purge_stale(&self, now_ms: u64, window_ms: u64) {
        let mut last_accepted = self.last_accepted.lock().await;
        let before = last_accepted.len();
        last_accepted.retain(|_, last| now_ms.saturating_sub(*last) < window_ms);
        let removed = before - last_accepted.len();
        if removed > 0 {
            debug!(removed, "Purged stale rate limit entries");
        }
    }
}
