//! Redis shared store implementation

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Pipeline, Value};
use tracing::warn;

use crate::domain::store::{Store, StoreOp, StoreValue};
use crate::domain::DomainError;

/// Configuration for the Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: Option<String>,
    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisStoreConfig {
    /// Creates a new configuration with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Sets the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Redis store implementation
///
/// Pipelines are sent in one round trip; transactions are wrapped in
/// MULTI/EXEC. The connection manager reconnects transparently.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisStore {
    /// Creates a new Redis store connection
    pub async fn new(config: RedisStoreConfig) -> Result<Self, DomainError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| DomainError::store(format!("Failed to create Redis client: {}", e)))?;

        let connection = tokio::time::timeout(
            config.connection_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| DomainError::store(format!("Timed out connecting to Redis at {}", config.url)))?
        .map_err(|e| DomainError::store(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { connection, config })
    }

    /// Creates a Redis store with default configuration
    pub async fn with_url(url: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(RedisStoreConfig::new(url)).await
    }

    fn prefix_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    fn build(&self, ops: &[StoreOp], atomic: bool) -> Result<Pipeline, DomainError> {
        let mut pipe = redis::pipe();

        if atomic {
            pipe.atomic();
        }

        for op in ops {
            if op.is_empty_variadic() {
                return Err(DomainError::internal(format!(
                    "Refusing to send command without arguments: {:?}",
                    op
                )));
            }
            self.push_command(&mut pipe, op);
        }

        Ok(pipe)
    }

    fn push_command(&self, pipe: &mut Pipeline, op: &StoreOp) {
        match op {
            StoreOp::Get { key } => {
                pipe.cmd("GET").arg(self.prefix_key(key));
            }
            StoreOp::Set { key, value } => {
                pipe.cmd("SET").arg(self.prefix_key(key)).arg(value);
            }
            StoreOp::SetNx { key, value } => {
                pipe.cmd("SETNX").arg(self.prefix_key(key)).arg(value);
            }
            StoreOp::Del { keys } => {
                let keys: Vec<String> = keys.iter().map(|k| self.prefix_key(k)).collect();
                pipe.cmd("DEL").arg(keys);
            }
            StoreOp::IncrBy { key, delta } => {
                pipe.cmd("INCRBY").arg(self.prefix_key(key)).arg(*delta);
            }
            StoreOp::Expire { key, seconds } => {
                pipe.cmd("EXPIRE").arg(self.prefix_key(key)).arg(*seconds);
            }
            StoreOp::Exists { key } => {
                pipe.cmd("EXISTS").arg(self.prefix_key(key));
            }
            StoreOp::HGet { key, field } => {
                pipe.cmd("HGET").arg(self.prefix_key(key)).arg(field);
            }
            StoreOp::HMGet { key, fields } => {
                pipe.cmd("HMGET").arg(self.prefix_key(key)).arg(fields);
            }
            StoreOp::HSet { key, field, value } => {
                pipe.cmd("HSET").arg(self.prefix_key(key)).arg(field).arg(value);
            }
            StoreOp::HSetNx { key, field, value } => {
                pipe.cmd("HSETNX")
                    .arg(self.prefix_key(key))
                    .arg(field)
                    .arg(value);
            }
            StoreOp::HDel { key, fields } => {
                pipe.cmd("HDEL").arg(self.prefix_key(key)).arg(fields);
            }
            StoreOp::HIncrBy { key, field, delta } => {
                pipe.cmd("HINCRBY")
                    .arg(self.prefix_key(key))
                    .arg(field)
                    .arg(*delta);
            }
            StoreOp::HGetAll { key } => {
                pipe.cmd("HGETALL").arg(self.prefix_key(key));
            }
            StoreOp::HKeys { key } => {
                pipe.cmd("HKEYS").arg(self.prefix_key(key));
            }
            StoreOp::RPush { key, values } => {
                pipe.cmd("RPUSH").arg(self.prefix_key(key)).arg(values);
            }
            StoreOp::LRange { key } => {
                pipe.cmd("LRANGE").arg(self.prefix_key(key)).arg(0).arg(-1);
            }
            StoreOp::SAdd { key, members } => {
                pipe.cmd("SADD").arg(self.prefix_key(key)).arg(members);
            }
            StoreOp::SRem { key, members } => {
                pipe.cmd("SREM").arg(self.prefix_key(key)).arg(members);
            }
            StoreOp::SMembers { key } => {
                pipe.cmd("SMEMBERS").arg(self.prefix_key(key));
            }
            StoreOp::SIsMember { key, member } => {
                pipe.cmd("SISMEMBER").arg(self.prefix_key(key)).arg(member);
            }
        }
    }

    async fn execute(&self, ops: &[StoreOp], atomic: bool) -> Result<Vec<StoreValue>, DomainError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let pipe = self.build(ops, atomic)?;
        let mut conn = self.connection.clone();

        let replies: Vec<Value> = pipe.query_async(&mut conn).await.map_err(|e| {
            warn!(error = %e, commands = ops.len(), atomic, "Redis command batch failed");
            DomainError::store(format!("Redis command failed: {}", e))
        })?;

        if replies.len() != ops.len() {
            return Err(DomainError::store(format!(
                "Expected {} replies from Redis, got {}",
                ops.len(),
                replies.len()
            )));
        }

        ops.iter()
            .zip(replies.iter())
            .map(|(op, value)| decode(op, value))
            .collect()
    }
}

/// Interprets a raw reply according to the command that produced it
fn decode(op: &StoreOp, value: &Value) -> Result<StoreValue, DomainError> {
    let converted = match op {
        StoreOp::Get { .. } | StoreOp::HGet { .. } => {
            redis::from_redis_value::<Option<String>>(value)
                .map(|text| text.map_or(StoreValue::Nil, StoreValue::Text))
        }
        StoreOp::Set { .. } => Ok(StoreValue::Nil),
        StoreOp::SetNx { .. }
        | StoreOp::HSetNx { .. }
        | StoreOp::Expire { .. }
        | StoreOp::Exists { .. }
        | StoreOp::SIsMember { .. } => redis::from_redis_value::<bool>(value).map(StoreValue::Bool),
        StoreOp::Del { .. }
        | StoreOp::IncrBy { .. }
        | StoreOp::HSet { .. }
        | StoreOp::HDel { .. }
        | StoreOp::HIncrBy { .. }
        | StoreOp::RPush { .. }
        | StoreOp::SAdd { .. }
        | StoreOp::SRem { .. } => redis::from_redis_value::<i64>(value).map(StoreValue::Int),
        StoreOp::HMGet { .. } => {
            redis::from_redis_value::<Vec<Option<String>>>(value).map(StoreValue::Values)
        }
        StoreOp::HKeys { .. } | StoreOp::LRange { .. } | StoreOp::SMembers { .. } => {
            redis::from_redis_value::<Vec<String>>(value).map(StoreValue::Strings)
        }
        StoreOp::HGetAll { .. } => {
            redis::from_redis_value::<HashMap<String, String>>(value).map(StoreValue::Map)
        }
    };

    converted.map_err(|e| DomainError::store(format!("Unexpected Redis reply: {}", e)))
}

#[async_trait]
impl Store for RedisStore {
    async fn pipeline(&self, ops: &[StoreOp]) -> Result<Vec<StoreValue>, DomainError> {
        self.execute(ops, false).await
    }

    async fn transaction(&self, ops: &[StoreOp]) -> Result<Vec<StoreValue>, DomainError> {
        self.execute(ops, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::StoreExt;

    // Note: These tests require a running Redis instance
    // Run with: cargo test -- --ignored

    fn get_test_config() -> RedisStoreConfig {
        RedisStoreConfig::new("redis://127.0.0.1:6379").with_key_prefix("pmp-experiments-test")
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_hash_counters() {
        let store = RedisStore::new(get_test_config()).await.unwrap();
        store.del(&["alt".to_string()]).await.unwrap();

        assert_eq!(store.hincr_by("alt", "participant_count", 1).await.unwrap(), 1);
        assert_eq!(store.hincr_by("alt", "participant_count", 1).await.unwrap(), 2);

        let all = store.hget_all("alt").await.unwrap();
        assert_eq!(all.get("participant_count").map(String::as_str), Some("2"));

        store.del(&["alt".to_string()]).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_transaction_replies_in_order() {
        let store = RedisStore::new(get_test_config()).await.unwrap();
        store.del(&["tx:value".to_string(), "tx:set".to_string()]).await.unwrap();

        let replies = store
            .transaction(&[
                StoreOp::set_nx("tx:value", "5"),
                StoreOp::sadd("tx:set", ["a", "b"]),
                StoreOp::get("tx:value"),
                StoreOp::smembers("tx:set"),
                StoreOp::del(["tx:value", "tx:set"]),
            ])
            .await
            .unwrap();

        assert_eq!(replies[0], StoreValue::Bool(true));
        assert_eq!(replies[1], StoreValue::Int(2));
        assert_eq!(replies[2], StoreValue::Text("5".into()));
        assert_eq!(replies[4], StoreValue::Int(2));
    }

    #[test]
    fn test_decode_by_command() {
        let value = Value::Int(3);
        assert_eq!(
            decode(&StoreOp::hincr_by("k", "f", 1), &value).unwrap(),
            StoreValue::Int(3)
        );
        assert_eq!(
            decode(&StoreOp::sismember("k", "m"), &Value::Int(1)).unwrap(),
            StoreValue::Bool(true)
        );
        assert_eq!(
            decode(&StoreOp::get("k"), &Value::Nil).unwrap(),
            StoreValue::Nil
        );
    }

    #[test]
    fn test_key_prefix() {
        let config = RedisStoreConfig::new("redis://localhost").with_key_prefix("myapp");
        assert_eq!(config.key_prefix, Some("myapp".to_string()));
    }
}
