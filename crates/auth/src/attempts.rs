//! Failed-attempt accounting for brute-force protection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use brokerage_core::{StoreError, UserId};

/// Counter key: the client address plus the acting user, or `anonymous`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub ip: String,
    pub subject: String,
}

impl AttemptKey {
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn new(ip: impl Into<String>, actor: Option<UserId>) -> Self {
        Self {
            ip: ip.into(),
            subject: actor.map_or_else(|| Self::ANONYMOUS.to_string(), |id| id.to_string()),
        }
    }
}

impl core::fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.ip, self.subject)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BruteForcePolicy {
    pub max_attempts: u32,
    /// Rolling window measured from the most recent failed attempt.
    pub window: Duration,
}

impl Default for BruteForcePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::hours(1),
        }
    }
}

/// Failed attempts recorded for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptWindow {
    pub count: u32,
    pub last_attempt: DateTime<Utc>,
}

impl AttemptWindow {
    pub fn first(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            last_attempt: now,
        }
    }

    /// The last attempt is older than the window, so the count no longer applies.
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.last_attempt > window
    }

    /// Count one more failure at `now`, starting over if the window lapsed.
    pub fn register(self, now: DateTime<Utc>, window: Duration) -> Self {
        if self.is_stale(now, window) {
            Self::first(now)
        } else {
            Self {
                count: self.count.saturating_add(1),
                last_attempt: now,
            }
        }
    }

    /// Time left on the block, if this window is blocking.
    pub fn blocked_for(&self, now: DateTime<Utc>, policy: &BruteForcePolicy) -> Option<Duration> {
        if self.count < policy.max_attempts || self.is_stale(now, policy.window) {
            return None;
        }
        let remaining = policy.window - (now - self.last_attempt);
        (remaining > Duration::zero()).then_some(remaining)
    }
}

/// Whole minutes, rounded up, for a remaining block duration.
pub fn minutes_remaining(remaining: Duration) -> i64 {
    let seconds = remaining.num_seconds().max(0);
    (seconds + 59) / 60
}

/// Failed-attempt counters. Implementations must make `record_failure` atomic
/// per key.
#[async_trait]
pub trait AttemptCounter: Send + Sync {
    /// The live window for `key`, or `None` if there is none or it went stale.
    async fn current(
        &self,
        key: &AttemptKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<AttemptWindow>, StoreError>;

    async fn record_failure(
        &self,
        key: &AttemptKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<AttemptWindow, StoreError>;

    async fn clear(&self, key: &AttemptKey) -> Result<(), StoreError>;
}

/// Process-local counters. Only correct for a single server instance.
///
/// Stale windows for every key are dropped whenever a failure is recorded.
#[derive(Debug, Default)]
pub struct InMemoryAttemptCounter {
    windows: Mutex<HashMap<AttemptKey, AttemptWindow>>,
}

impl InMemoryAttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> StoreError {
    StoreError::unavailable("attempt counter lock poisoned")
}

#[async_trait]
impl AttemptCounter for InMemoryAttemptCounter {
    async fn current(
        &self,
        key: &AttemptKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<AttemptWindow>, StoreError> {
        let mut windows = self.windows.lock().map_err(|_| poisoned())?;
        match windows.get(key) {
            Some(w) if w.is_stale(now, window) => {
                windows.remove(key);
                Ok(None)
            }
            Some(w) => Ok(Some(*w)),
            None => Ok(None),
        }
    }

    async fn record_failure(
        &self,
        key: &AttemptKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<AttemptWindow, StoreError> {
        let mut windows = self.windows.lock().map_err(|_| poisoned())?;
        windows.retain(|_, w| !w.is_stale(now, window));
        let next = match windows.get(key) {
            Some(w) => w.register(now, window),
            None => AttemptWindow::first(now),
        };
        windows.insert(key.clone(), next);
        Ok(next)
    }

    async fn clear(&self, key: &AttemptKey) -> Result<(), StoreError> {
        let mut windows = self.windows.lock().map_err(|_| poisoned())?;
        windows.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_at_the_threshold_for_the_rest_of_the_window() {
        let policy = BruteForcePolicy::default();
        let start = Utc::now();
        let mut window = AttemptWindow::first(start);
        for i in 1..4 {
            window = window.register(start + Duration::minutes(i), policy.window);
        }
        assert_eq!(window.count, 4);
        assert_eq!(window.blocked_for(start + Duration::minutes(4), &policy), None);

        window = window.register(start + Duration::minutes(10), policy.window);
        assert_eq!(window.count, 5);

        let remaining = window.blocked_for(start + Duration::minutes(20), &policy).unwrap();
        assert_eq!(remaining, Duration::minutes(50));
        assert_eq!(minutes_remaining(remaining), 50);

        assert_eq!(window.blocked_for(start + Duration::minutes(71), &policy), None);
    }

    #[test]
    fn stale_window_starts_over() {
        let window = Duration::hours(1);
        let start = Utc::now();
        let w = AttemptWindow {
            count: 9,
            last_attempt: start,
        };
        let next = w.register(start + Duration::minutes(61), window);
        assert_eq!(next.count, 1);
    }

    #[test]
    fn remaining_minutes_round_up() {
        assert_eq!(minutes_remaining(Duration::seconds(61)), 2);
        assert_eq!(minutes_remaining(Duration::seconds(60)), 1);
        assert_eq!(minutes_remaining(Duration::seconds(1)), 1);
        assert_eq!(minutes_remaining(Duration::zero()), 0);
    }

    #[test]
    fn anonymous_and_user_keys_differ() {
        let user = UserId::new();
        assert_eq!(AttemptKey::new("10.0.0.1", None).subject, "anonymous");
        assert_ne!(AttemptKey::new("10.0.0.1", None), AttemptKey::new("10.0.0.1", Some(user)));
    }

    #[tokio::test]
    async fn in_memory_counter_tracks_and_clears() {
        let counter = InMemoryAttemptCounter::new();
        let key = AttemptKey::new("10.0.0.1", None);
        let window = Duration::hours(1);
        let now = Utc::now();

        counter.record_failure(&key, now, window).await.unwrap();
        let w = counter.record_failure(&key, now, window).await.unwrap();
        assert_eq!(w.count, 2);
        assert_eq!(counter.current(&key, now, window).await.unwrap().unwrap().count, 2);
        assert!(counter.current(&key, now + Duration::hours(2), window).await.unwrap().is_none());

        counter.record_failure(&key, now, window).await.unwrap();
        counter.clear(&key).await.unwrap();
        assert!(counter.current(&key, now, window).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recording_a_failure_drops_other_stale_keys() {
        let counter = InMemoryAttemptCounter::new();
        let window = Duration::hours(1);
        let now = Utc::now();

        for octet in 1..=3 {
            let key = AttemptKey::new(format!("10.0.0.{octet}"), None);
            counter.record_failure(&key, now, window).await.unwrap();
        }
        let recent = AttemptKey::new("10.0.0.9", None);
        counter.record_failure(&recent, now + Duration::minutes(30), window).await.unwrap();

        let later = AttemptKey::new("192.168.1.1", None);
        counter.record_failure(&later, now + Duration::minutes(90), window).await.unwrap();

        let windows = counter.windows.lock().unwrap();
        let mut ips: Vec<&str> = windows.keys().map(|k| k.ip.as_str()).collect();
        ips.sort();
        assert_eq!(ips, ["10.0.0.9", "192.168.1.1"]);
    }
}
