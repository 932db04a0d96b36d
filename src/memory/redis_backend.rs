//! Redis/Valkey store backend
//!
//! One lazily opened multiplexed connection is shared by every request.
//! A failed command drops the cached connection so the next call reconnects;
//! the failed call itself is not retried.

use std::sync::Arc;

use redis::FromRedisValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::backend::{ScoredMember, StoreBackend, SwapOutcome};
use crate::error::MemoryError;
use crate::Result;

/// KEYS: log, version. ARGV: expected version (-1 = unconditional), ttl,
/// then score/member pairs. With no pairs the log is cleared and only the
/// version key keeps a TTL.
const SWAP_SCRIPT: &str = r#"
local key = KEYS[1]
local version_key = KEYS[2]
local expected = tonumber(ARGV[1]) or -1
local ttl = tonumber(ARGV[2]) or 0
local current = tonumber(redis.call("GET", version_key) or "0") or 0
if expected >= 0 and current ~= expected then
  return {0, current}
end
redis.call("DEL", key)
local count = (#ARGV - 2) / 2
for i = 1, count do
  redis.call("ZADD", key, ARGV[1 + 2 * i], ARGV[2 + 2 * i])
end
local version = redis.call("INCR", version_key)
if ttl > 0 then
  if count > 0 then
    redis.call("EXPIRE", key, ttl)
  end
  redis.call("EXPIRE", version_key, ttl)
end
return {1, version}
"#;

pub struct RedisBackend {
    client: redis::Client,
    url: String,
    connection: Arc<Mutex<Option<redis::aio::MultiplexedConnection>>>,
}

impl RedisBackend {
    /// Validates the URL; no connection is opened until the first command.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            MemoryError::InvalidConfig(format!("invalid redis url {}: {}", url, e))
        })?;

        Ok(Self {
            client,
            url: url.to_string(),
            connection: Arc::new(Mutex::new(None)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                warn!(url = %self.url, error = %e, "redis connection failed");
                MemoryError::from(e)
            })?;
        debug!(url = %self.url, "redis session backend connected");

        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn forget_connection(&self) {
        *self.connection.lock().await = None;
    }

    async fn run_command<T>(&self, operation: &'static str, cmd: redis::Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<T> = cmd.query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(operation, error = %err, "redis command failed");
                self.forget_connection().await;
                Err(err.into())
            }
        }
    }

    async fn run_pipeline<T>(&self, operation: &'static str, pipe: redis::Pipeline) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<T> = pipe.query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(operation, error = %err, "redis pipeline failed");
                self.forget_connection().await;
                Err(err.into())
            }
        }
    }
}

#[async_trait::async_trait]
impl StoreBackend for RedisBackend {
    async fn sorted_add(
        &self,
        key: &str,
        version_key: &str,
        members: &[ScoredMember],
        ttl_secs: Option<u64>,
    ) -> Result<u64> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZADD").arg(key);
        for item in members {
            pipe.arg(item.score).arg(&item.member);
        }
        pipe.ignore();
        pipe.cmd("INCR").arg(version_key);
        if let Some(ttl) = ttl_secs.filter(|ttl| *ttl > 0) {
            pipe.cmd("EXPIRE").arg(key).arg(ttl).ignore();
            pipe.cmd("EXPIRE").arg(version_key).arg(ttl).ignore();
        }

        let (version,): (u64,) = self.run_pipeline("sorted_add", pipe).await?;
        Ok(version)
    }

    async fn sorted_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut cmd = redis::cmd("ZRANGE");
        cmd.arg(key).arg(start).arg(stop);
        self.run_command("sorted_range", cmd).await
    }

    async fn sorted_len(&self, key: &str) -> Result<usize> {
        let mut cmd = redis::cmd("ZCARD");
        cmd.arg(key);
        self.run_command("sorted_len", cmd).await
    }

    async fn sorted_swap(
        &self,
        key: &str,
        version_key: &str,
        expected_version: Option<u64>,
        members: &[ScoredMember],
        ttl_secs: Option<u64>,
    ) -> Result<SwapOutcome> {
        let expected: i64 = match expected_version {
            Some(v) => i64::try_from(v)
                .map_err(|_| MemoryError::corrupt(version_key, "version overflow"))?,
            None => -1,
        };

        let mut cmd = redis::cmd("EVAL");
        cmd.arg(SWAP_SCRIPT)
            .arg(2)
            .arg(key)
            .arg(version_key)
            .arg(expected)
            .arg(ttl_secs.unwrap_or(0));
        for item in members {
            cmd.arg(item.score).arg(&item.member);
        }

        let (swapped, version): (i64, i64) = self.run_command("sorted_swap", cmd).await?;
        let version = u64::try_from(version)
            .map_err(|_| MemoryError::corrupt(version_key, "negative version"))?;

        Ok(if swapped == 1 {
            SwapOutcome::Swapped { version }
        } else {
            SwapOutcome::Conflict { found: version }
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run_command("get", cmd).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.run_command("set", cmd).await
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let _: i64 = self.run_command("delete", cmd).await?;
        Ok(())
    }

    fn supports_expiry(&self) -> bool {
        true
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(ttl_secs);
        let _: i64 = self.run_command("expire", cmd).await?;
        Ok(())
    }
}
