//! Per-session sliding window rate limiter

use dashmap::DashMap;

/// Counts requests per key over a sliding window
pub struct RateLimiter {
    /// Request timestamps (ms) per key in the current window
    requests: DashMap<String, Vec<i64>>,
    window_ms: i64,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(window_ms: i64, max_requests: u32) -> Self {
        Self {
            requests: DashMap::new(),
            window_ms,
            max_requests,
        }
    }

    /// Check if a request is allowed at `now_ms` and record it
    pub fn check_and_record(&self, key: &str, now_ms: i64) -> bool {
        if self.max_requests == 0 {
            return true;
        }

        let cutoff = now_ms.saturating_sub(self.window_ms);
        let mut entry = self.requests.entry(key.to_string()).or_default();

        entry.retain(|&ts| ts > cutoff);

        if entry.len() >= self.max_requests as usize {
            return false;
        }

        entry.push(now_ms);
        true
    }

    /// Give back a slot recorded at `at_ms` by [`check_and_record`](Self::check_and_record)
    pub fn release(&self, key: &str, at_ms: i64) {
        if let Some(mut entry) = self.requests.get_mut(key) {
            if let Some(pos) = entry.iter().rposition(|&ts| ts == at_ms) {
                entry.remove(pos);
            }
        }
    }

    /// Drop keys with no requests inside the window
    pub fn cleanup(&self, now_ms: i64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        self.requests.retain(|_, requests| {
            requests.retain(|&ts| ts > cutoff);
            !requests.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.requests.len()
    }
}
