//! Shared store trait definition

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::domain::DomainError;

/// A single command against the shared store.
///
/// Commands are plain data so that the same list can be sent as a batched
/// pipeline or wrapped into an atomic transaction by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Get { key: String },
    Set { key: String, value: String },
    SetNx { key: String, value: String },
    Del { keys: Vec<String> },
    IncrBy { key: String, delta: i64 },
    Expire { key: String, seconds: u64 },
    Exists { key: String },
    HGet { key: String, field: String },
    HMGet { key: String, fields: Vec<String> },
    HSet { key: String, field: String, value: String },
    HSetNx { key: String, field: String, value: String },
    HDel { key: String, fields: Vec<String> },
    HIncrBy { key: String, field: String, delta: i64 },
    HGetAll { key: String },
    HKeys { key: String },
    RPush { key: String, values: Vec<String> },
    /// Reads the whole list
    LRange { key: String },
    SAdd { key: String, members: Vec<String> },
    SRem { key: String, members: Vec<String> },
    SMembers { key: String },
    SIsMember { key: String, member: String },
}

impl StoreOp {
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn set_nx(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::SetNx {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Del {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn incr_by(key: impl Into<String>, delta: i64) -> Self {
        Self::IncrBy {
            key: key.into(),
            delta,
        }
    }

    pub fn expire(key: impl Into<String>, seconds: u64) -> Self {
        Self::Expire {
            key: key.into(),
            seconds,
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self::Exists { key: key.into() }
    }

    pub fn hget(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::HGet {
            key: key.into(),
            field: field.into(),
        }
    }

    pub fn hmget<I, S>(key: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::HMGet {
            key: key.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn hset(
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn hset_nx(
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::HSetNx {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn hdel<I, S>(key: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::HDel {
            key: key.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn hincr_by(key: impl Into<String>, field: impl Into<String>, delta: i64) -> Self {
        Self::HIncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        }
    }

    pub fn hget_all(key: impl Into<String>) -> Self {
        Self::HGetAll { key: key.into() }
    }

    pub fn hkeys(key: impl Into<String>) -> Self {
        Self::HKeys { key: key.into() }
    }

    pub fn rpush<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::RPush {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn lrange(key: impl Into<String>) -> Self {
        Self::LRange { key: key.into() }
    }

    pub fn sadd<I, S>(key: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SAdd {
            key: key.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn srem<I, S>(key: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SRem {
            key: key.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn smembers(key: impl Into<String>) -> Self {
        Self::SMembers { key: key.into() }
    }

    pub fn sismember(key: impl Into<String>, member: impl Into<String>) -> Self {
        Self::SIsMember {
            key: key.into(),
            member: member.into(),
        }
    }

    /// Commands whose variadic argument list is empty are rejected by Redis.
    pub fn is_empty_variadic(&self) -> bool {
        match self {
            Self::Del { keys } => keys.is_empty(),
            Self::HMGet { fields, .. } | Self::HDel { fields, .. } => fields.is_empty(),
            Self::RPush { values, .. } => values.is_empty(),
            Self::SAdd { members, .. } | Self::SRem { members, .. } => members.is_empty(),
            _ => false,
        }
    }
}

/// Reply to a single [`StoreOp`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Nil,
    Int(i64),
    Bool(bool),
    Text(String),
    /// Positional reply, e.g. HMGET
    Values(Vec<Option<String>>),
    /// Collection reply, e.g. LRANGE, SMEMBERS, HKEYS
    Strings(Vec<String>),
    Map(HashMap<String, String>),
}

impl StoreValue {
    pub fn into_text(self) -> Result<Option<String>, DomainError> {
        match self {
            Self::Nil => Ok(None),
            Self::Text(text) => Ok(Some(text)),
            Self::Int(value) => Ok(Some(value.to_string())),
            other => Err(unexpected("text", &other)),
        }
    }

    pub fn into_int(self) -> Result<i64, DomainError> {
        match self {
            Self::Nil => Ok(0),
            Self::Int(value) => Ok(value),
            Self::Bool(flag) => Ok(i64::from(flag)),
            Self::Text(text) => text
                .parse()
                .map_err(|_| DomainError::store(format!("Expected integer, got '{}'", text))),
            other => Err(unexpected("integer", &other)),
        }
    }

    pub fn into_bool(self) -> Result<bool, DomainError> {
        match self {
            Self::Nil => Ok(false),
            Self::Bool(flag) => Ok(flag),
            Self::Int(value) => Ok(value != 0),
            other => Err(unexpected("boolean", &other)),
        }
    }

    pub fn into_values(self) -> Result<Vec<Option<String>>, DomainError> {
        match self {
            Self::Values(values) => Ok(values),
            Self::Strings(values) => Ok(values.into_iter().map(Some).collect()),
            other => Err(unexpected("positional values", &other)),
        }
    }

    pub fn into_strings(self) -> Result<Vec<String>, DomainError> {
        match self {
            Self::Nil => Ok(Vec::new()),
            Self::Strings(values) => Ok(values),
            other => Err(unexpected("string collection", &other)),
        }
    }

    pub fn into_map(self) -> Result<HashMap<String, String>, DomainError> {
        match self {
            Self::Nil => Ok(HashMap::new()),
            Self::Map(map) => Ok(map),
            other => Err(unexpected("hash", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &StoreValue) -> DomainError {
    DomainError::store(format!("Unexpected reply: expected {}, got {:?}", expected, got))
}

/// Shared key-value store with the primitives the engine needs:
/// batched reads and atomic multi-command transactions.
///
/// Both methods return one reply per command, in command order.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync + Debug {
    /// Sends all commands in one round trip without atomicity guarantees
    async fn pipeline(&self, ops: &[StoreOp]) -> Result<Vec<StoreValue>, DomainError>;

    /// Executes all commands atomically (MULTI/EXEC semantics)
    async fn transaction(&self, ops: &[StoreOp]) -> Result<Vec<StoreValue>, DomainError>;
}

/// Extension trait providing single-command helpers
pub trait StoreExt: Store {
    /// Runs one command and returns its reply
    fn run(&self, op: StoreOp) -> impl Future<Output = Result<StoreValue, DomainError>> + Send {
        async move {
            self.pipeline(std::slice::from_ref(&op))
                .await?
                .pop()
                .ok_or_else(|| DomainError::store("Store returned no reply"))
        }
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> impl Future<Output = Result<Option<String>, DomainError>> + Send + 'a {
        async move { self.run(StoreOp::get(key)).await?.into_text() }
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> impl Future<Output = Result<(), DomainError>> + Send + 'a {
        async move {
            self.run(StoreOp::set(key, value)).await?;
            Ok(())
        }
    }

    fn del<'a>(
        &'a self,
        keys: &'a [String],
    ) -> impl Future<Output = Result<i64, DomainError>> + Send + 'a {
        async move {
            if keys.is_empty() {
                return Ok(0);
            }
            self.run(StoreOp::del(keys.iter().cloned())).await?.into_int()
        }
    }

    fn incr_by<'a>(
        &'a self,
        key: &'a str,
        delta: i64,
    ) -> impl Future<Output = Result<i64, DomainError>> + Send + 'a {
        async move { self.run(StoreOp::incr_by(key, delta)).await?.into_int() }
    }

    fn hget<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
    ) -> impl Future<Output = Result<Option<String>, DomainError>> + Send + 'a {
        async move { self.run(StoreOp::hget(key, field)).await?.into_text() }
    }

    fn hset<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        value: &'a str,
    ) -> impl Future<Output = Result<(), DomainError>> + Send + 'a {
        async move {
            self.run(StoreOp::hset(key, field, value)).await?;
            Ok(())
        }
    }

    fn hset_nx<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        value: &'a str,
    ) -> impl Future<Output = Result<bool, DomainError>> + Send + 'a {
        async move { self.run(StoreOp::hset_nx(key, field, value)).await?.into_bool() }
    }

    fn hdel<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
    ) -> impl Future<Output = Result<(), DomainError>> + Send + 'a {
        async move {
            self.run(StoreOp::hdel(key, [field])).await?;
            Ok(())
        }
    }

    fn hincr_by<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        delta: i64,
    ) -> impl Future<Output = Result<i64, DomainError>> + Send + 'a {
        async move { self.run(StoreOp::hincr_by(key, field, delta)).await?.into_int() }
    }

    fn hget_all<'a>(
        &'a self,
        key: &'a str,
    ) -> impl Future<Output = Result<HashMap<String, String>, DomainError>> + Send + 'a {
        async move { self.run(StoreOp::hget_all(key)).await?.into_map() }
    }

    fn lrange<'a>(
        &'a self,
        key: &'a str,
    ) -> impl Future<Output = Result<Vec<String>, DomainError>> + Send + 'a {
        async move { self.run(StoreOp::lrange(key)).await?.into_strings() }
    }

    fn smembers<'a>(
        &'a self,
        key: &'a str,
    ) -> impl Future<Output = Result<Vec<String>, DomainError>> + Send + 'a {
        async move { self.run(StoreOp::smembers(key)).await?.into_strings() }
    }

    fn sismember<'a>(
        &'a self,
        key: &'a str,
        member: &'a str,
    ) -> impl Future<Output = Result<bool, DomainError>> + Send + 'a {
        async move { self.run(StoreOp::sismember(key, member)).await?.into_bool() }
    }
}

// Blanket implementation for all types implementing Store
impl<T: Store + ?Sized> StoreExt for T {}
