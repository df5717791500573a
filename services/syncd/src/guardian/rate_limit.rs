use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window alert limiter keyed by subject.
///
/// Allows at most `cap` events per key within `window`; older timestamps
/// are pruned on each check. Shared across advisory-handling tasks behind
/// one mutex, held only for the map update.
pub struct SlidingWindowLimiter {
    window: Duration,
    cap: usize,
    seen: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, cap: usize) -> Self {
        Self {
            window,
            cap,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an event for `key` may pass right now. Counts the event if
    /// allowed.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().expect("limiter map poisoned");
        let timestamps = seen.entry(key.to_string()).or_default();

        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.cap {
            return false;
        }
        timestamps.push_back(now);
        true
    }
}
