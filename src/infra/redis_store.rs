//! Redis-backed sorted-set store.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::{Client, ErrorKind, RedisError, Value, aio::ConnectionManager};
use tracing::{info, warn};

use crate::cache::{ScriptBackend, ScriptReply, SortedSetBackend, StoreError};
use crate::config::RedisSettings;
use crate::domain::entities::ScoreEntry;

const BACKOFF_STEP: Duration = Duration::from_millis(100);
const BACKOFF_CEILING: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    ///
    /// Failed attempts are retried with a linear backoff until the configured
    /// retry window is exhausted.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, StoreError> {
        let client = Client::open(settings.url.as_str()).map_err(map_redis_error)?;
        let deadline = Instant::now() + settings.connect_retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match Self::try_connect(&client).await {
                Ok(conn) => {
                    info!(
                        target = "popcache::infra::redis",
                        attempt,
                        "connection established"
                    );
                    return Ok(Self { conn });
                }
                Err(err) => {
                    let delay = backoff_delay(attempt);
                    if Instant::now() + delay > deadline {
                        return Err(StoreError::unavailable(format!(
                            "giving up after {attempt} attempts: {err}"
                        )));
                    }
                    warn!(
                        target = "popcache::infra::redis",
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "redis connection failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_connect(client: &Client) -> Result<ConnectionManager, RedisError> {
        let mut conn = ConnectionManager::new(client.clone()).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(conn)
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_STEP.saturating_mul(attempt).min(BACKOFF_CEILING)
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.kind() == ErrorKind::NoScriptError {
        return StoreError::NoScript {
            sha: err.detail().unwrap_or_default().to_string(),
        };
    }
    if err.kind() == ErrorKind::TypeError {
        return StoreError::protocol(err.to_string());
    }
    StoreError::unavailable(err.to_string())
}

fn to_script_reply(value: Value) -> Result<ScriptReply, StoreError> {
    match value {
        Value::Nil => Ok(ScriptReply::Nil),
        Value::Int(number) => Ok(ScriptReply::Integer(number)),
        Value::BulkString(bytes) => String::from_utf8(bytes)
            .map(ScriptReply::Text)
            .map_err(|err| StoreError::protocol(format!("non-utf8 script reply: {err}"))),
        Value::SimpleString(text) => Ok(ScriptReply::Text(text)),
        Value::Okay => Ok(ScriptReply::Text("OK".to_string())),
        other => Err(StoreError::protocol(format!(
            "unsupported script reply: {other:?}"
        ))),
    }
}

#[async_trait]
impl ScriptBackend for RedisStore {
    async fn script_exists(&self, sha: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let exists: Vec<bool> = redis::cmd("SCRIPT")
            .arg("EXISTS")
            .arg(sha)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(exists.first().copied().unwrap_or(false))
    }

    async fn script_load(&self, source: &str) -> Result<String, StoreError> {
        let mut conn = self.connection();
        redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn eval_sha(
        &self,
        sha: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, StoreError> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha).arg(keys.len());
        for key in keys {
            cmd.arg(key.as_str());
        }
        for arg in args {
            cmd.arg(arg.as_str());
        }

        let mut conn = self.connection();
        let value: Value = cmd.query_async(&mut conn).await.map_err(map_redis_error)?;
        to_script_reply(value)
    }
}

#[async_trait]
impl SortedSetBackend for RedisStore {
    async fn range_desc_by_score(
        &self,
        key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Option<Vec<ScoreEntry>>, StoreError> {
        let mut conn = self.connection();
        let (exists, members): (bool, Vec<(String, i64)>) = redis::pipe()
            .atomic()
            .cmd("EXISTS")
            .arg(key)
            .cmd("ZREVRANGEBYSCORE")
            .arg(key)
            .arg("+inf")
            .arg("-inf")
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(offset)
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        if !exists {
            return Ok(None);
        }

        Ok(Some(
            members
                .into_iter()
                .map(|(member, score)| ScoreEntry::new(member, score))
                .collect(),
        ))
    }

    async fn bulk_set(&self, key: &str, entries: &[ScoreEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key);
        for entry in entries {
            cmd.arg(entry.count).arg(entry.item_id.as_str());
        }

        let mut conn = self.connection();
        let _: i64 = cmd.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(())
    }
}
