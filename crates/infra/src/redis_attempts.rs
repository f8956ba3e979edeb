//! Redis-backed failed-attempt counters, shared by every server instance.
//!
//! One key per `(ip, subject)` holds the count. Each failure runs
//! `INCR` + `EXPIRE window` in one MULTI/EXEC, so the key lives for a full
//! window after the most recent failure and then disappears.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument};

use brokerage_auth::{AttemptCounter, AttemptKey, AttemptWindow};
use brokerage_core::StoreError;

const KEY_PREFIX: &str = "brokerage:bruteforce";

#[derive(Clone)]
pub struct RedisAttemptCounter {
    conn: MultiplexedConnection,
}

impl RedisAttemptCounter {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(map_redis_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        debug!("connected to redis for attempt counters");
        Ok(Self { conn })
    }

    fn key(key: &AttemptKey) -> String {
        format!("{KEY_PREFIX}:{}:{}", key.ip, key.subject)
    }
}

fn map_redis_error(err: redis::RedisError) -> StoreError {
    StoreError::unavailable(format!("redis error: {err}"))
}

/// Rebuild a window from a stored count and the key's remaining TTL.
///
/// The TTL is reset to `window` on every failure, so the last failure happened
/// `window - ttl` ago.
fn window_from_ttl(count: Option<u32>, ttl_ms: i64, now: DateTime<Utc>, window: Duration) -> Option<AttemptWindow> {
    let count = count.filter(|c| *c > 0)?;
    if ttl_ms <= 0 {
        return None;
    }
    let elapsed = window - Duration::milliseconds(ttl_ms);
    Some(AttemptWindow {
        count,
        last_attempt: now - elapsed.max(Duration::zero()),
    })
}

#[async_trait]
impl AttemptCounter for RedisAttemptCounter {
    async fn current(
        &self,
        key: &AttemptKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<AttemptWindow>, StoreError> {
        let redis_key = Self::key(key);
        let mut conn = self.conn.clone();
        let (count, ttl_ms): (Option<u32>, i64) = redis::pipe()
            .get(&redis_key)
            .pttl(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(window_from_ttl(count, ttl_ms, now, window))
    }

    #[instrument(skip_all, fields(%key), err)]
    async fn record_failure(
        &self,
        key: &AttemptKey,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<AttemptWindow, StoreError> {
        let redis_key = Self::key(key);
        let mut conn = self.conn.clone();
        let (count,): (u32,) = redis::pipe()
            .atomic()
            .incr(&redis_key, 1u32)
            .expire(&redis_key, window.num_seconds().max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(AttemptWindow {
            count,
            last_attempt: now,
        })
    }

    async fn clear(&self, key: &AttemptKey) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(Self::key(key))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_redis_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let key = AttemptKey::new("10.1.2.3", None);
        assert_eq!(RedisAttemptCounter::key(&key), "brokerage:bruteforce:10.1.2.3:anonymous");
    }

    #[test]
    fn window_is_rebuilt_from_ttl() {
        let now = Utc::now();
        let window = Duration::hours(1);

        let w = window_from_ttl(Some(5), Duration::minutes(50).num_milliseconds(), now, window).unwrap();
        assert_eq!(w.count, 5);
        assert_eq!(w.last_attempt, now - Duration::minutes(10));

        assert_eq!(window_from_ttl(None, 1000, now, window), None);
        // -2: key missing, -1: no expiry set.
        assert_eq!(window_from_ttl(Some(3), -2, now, window), None);
        assert_eq!(window_from_ttl(Some(3), -1, now, window), None);
    }
}
