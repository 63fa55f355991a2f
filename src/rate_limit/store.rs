//! Sliding-log window stores.

use anyhow::{Context, Result};
use redis::{Client, aio::MultiplexedConnection};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Outcome of recording one hit against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowCount {
    pub count: u64,
    pub oldest: i64,
}

/// Counters shared by every instance through Redis sorted sets.
#[derive(Clone)]
pub(crate) struct RedisWindowStore {
    connection: MultiplexedConnection,
}

impl RedisWindowStore {
    /// Open the client and confirm the server answers `PING`.
    pub(crate) async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).context("invalid redis url")?;
        let mut connection = client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to redis")?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .context("redis did not answer PING")?;
        if pong != "PONG" {
            anyhow::bail!("unexpected PING reply: {pong}");
        }
        Ok(Self { connection })
    }

    /// Trim, record and count in one `MULTI` block.
    pub(crate) async fn hit(&self, key: &str, now: i64, window_ms: i64) -> Result<WindowCount> {
        let mut connection = self.connection.clone();
        let member = format!("{now}-{}", uuid::Uuid::new_v4());
        let (count, oldest): (u64, Vec<(String, f64)>) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(now - window_ms)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now)
            .arg(&member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .ignore()
            .query_async(&mut connection)
            .await
            .with_context(|| format!("rate limit pipeline failed for {key}"))?;

        #[allow(clippy::cast_possible_truncation)]
        let oldest = oldest.first().map_or(now, |(_, score)| *score as i64);
        Ok(WindowCount { count, oldest })
    }
}

impl std::fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWindowStore").finish_non_exhaustive()
    }
}

/// Per-process counters. Each instance counts on its own, so the effective
/// limit across `n` instances is `n * limit`.
#[derive(Debug, Default)]
pub(crate) struct MemoryWindowStore {
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

/// Idle keys are swept only once the map grows past this many entries.
const PRUNE_THRESHOLD: usize = 1024;

impl MemoryWindowStore {
    pub(crate) fn hit(&self, key: &str, now: i64, window_ms: i64) -> WindowCount {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let cutoff = now - window_ms;
        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, log| log.back().is_some_and(|last| *last > cutoff));
        }

        let log = windows.entry(key.to_string()).or_default();
        while log.front().is_some_and(|first| *first <= cutoff) {
            log.pop_front();
        }
        log.push_back(now);
        WindowCount {
            count: log.len() as u64,
            oldest: log.front().copied().unwrap_or(now),
        }
    }
}

#[derive(Debug)]
pub(crate) enum WindowStore {
    Shared(RedisWindowStore),
    Local(MemoryWindowStore),
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_slides() {
        let store = MemoryWindowStore::default();
        assert_eq!(store.hit("k", 1_000, 60_000).count, 1);
        assert_eq!(store.hit("k", 2_000, 60_000).count, 2);
        let counted = store.hit("k", 61_000, 60_000);
        assert_eq!(counted.count, 2);
        assert_eq!(counted.oldest, 2_000);
    }

    #[test]
    fn memory_store_keys_are_independent() {
        let store = MemoryWindowStore::default();
        store.hit("a", 1_000, 60_000);
        assert_eq!(store.hit("b", 1_000, 60_000).count, 1);
    }

    #[test]
    fn memory_store_sweeps_idle_keys_past_threshold() {
        let store = MemoryWindowStore::default();
        for n in 0..PRUNE_THRESHOLD - 1 {
            store.hit(&format!("idle-{n}"), 1_000, 60_000);
        }
        store.hit("fresh", 1_000, 60_000);
        assert_eq!(store.windows.lock().map(|w| w.len()).unwrap_or(0), PRUNE_THRESHOLD);

        store.hit("late", 100_000, 60_000);
        let windows = store.windows.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(windows.len(), 1);
        assert!(windows.contains_key("late"));
    }

    #[tokio::test]
    async fn unreachable_redis_fails_to_connect() {
        assert!(RedisWindowStore::connect("redis://127.0.0.1:1/").await.is_err());
        assert!(RedisWindowStore::connect("not a url").await.is_err());
    }
}
