//! In-memory shared store implementation

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::domain::store::{Store, StoreOp, StoreValue};
use crate::domain::DomainError;

#[derive(Debug, Clone)]
enum Data {
    Text(String),
    Hash(HashMap<String, String>),
    List(Vec<String>),
    Set(BTreeSet<String>),
}

impl Data {
    fn is_empty(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Hash(hash) => hash.is_empty(),
            Self::List(list) => list.is_empty(),
            Self::Set(set) => set.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

type Entries = HashMap<String, Entry>;

/// Process-local store with Redis command semantics.
///
/// Every pipeline and transaction runs under one lock, so transactions are
/// atomic and isolated. A transaction that hits an error leaves the store
/// untouched. Expired keys are dropped lazily when touched.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<Entries>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| entries.values().filter(|e| !is_expired(e, now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every key
    pub fn clear(&self) {
        if let Ok(mut entries) = self.lock() {
            entries.clear();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Entries>, DomainError> {
        self.entries
            .lock()
            .map_err(|_| DomainError::store("In-memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn pipeline(&self, ops: &[StoreOp]) -> Result<Vec<StoreValue>, DomainError> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        ops.iter().map(|op| apply(&mut entries, op, now)).collect()
    }

    async fn transaction(&self, ops: &[StoreOp]) -> Result<Vec<StoreValue>, DomainError> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        let touched: BTreeSet<&str> = ops.iter().flat_map(touched_keys).collect();

        // Commands only see the keys they name, so staging those is enough
        let mut staged: Entries = touched
            .iter()
            .filter_map(|key| entries.get(*key).map(|entry| (key.to_string(), entry.clone())))
            .collect();

        let replies = ops
            .iter()
            .map(|op| apply(&mut staged, op, now))
            .collect::<Result<Vec<_>, _>>()?;

        for key in touched {
            match staged.remove(key) {
                Some(entry) => entries.insert(key.to_string(), entry),
                None => entries.remove(key),
            };
        }

        Ok(replies)
    }
}

fn touched_keys(op: &StoreOp) -> Vec<&str> {
    match op {
        StoreOp::Del { keys } => keys.iter().map(String::as_str).collect(),
        StoreOp::Get { key }
        | StoreOp::Set { key, .. }
        | StoreOp::SetNx { key, .. }
        | StoreOp::IncrBy { key, .. }
        | StoreOp::Expire { key, .. }
        | StoreOp::Exists { key }
        | StoreOp::HGet { key, .. }
        | StoreOp::HMGet { key, .. }
        | StoreOp::HSet { key, .. }
        | StoreOp::HSetNx { key, .. }
        | StoreOp::HDel { key, .. }
        | StoreOp::HIncrBy { key, .. }
        | StoreOp::HGetAll { key }
        | StoreOp::HKeys { key }
        | StoreOp::RPush { key, .. }
        | StoreOp::LRange { key }
        | StoreOp::SAdd { key, .. }
        | StoreOp::SRem { key, .. }
        | StoreOp::SMembers { key }
        | StoreOp::SIsMember { key, .. } => vec![key.as_str()],
    }
}

fn is_expired(entry: &Entry, now: Instant) -> bool {
    entry.expires_at.is_some_and(|at| at <= now)
}

/// Looks up a live entry, evicting it if expired
fn live<'a>(entries: &'a mut Entries, key: &str, now: Instant) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|entry| is_expired(entry, now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn wrong_type(key: &str) -> DomainError {
    DomainError::store(format!(
        "WRONGTYPE Operation against key '{}' holding the wrong kind of value",
        key
    ))
}

fn hash_mut<'a>(
    entries: &'a mut Entries,
    key: &str,
    now: Instant,
) -> Result<&'a mut HashMap<String, String>, DomainError> {
    if live(entries, key, now).is_none() {
        entries.insert(
            key.to_string(),
            Entry {
                data: Data::Hash(HashMap::new()),
                expires_at: None,
            },
        );
    }

    match entries.get_mut(key).map(|entry| &mut entry.data) {
        Some(Data::Hash(hash)) => Ok(hash),
        _ => Err(wrong_type(key)),
    }
}

fn list_mut<'a>(
    entries: &'a mut Entries,
    key: &str,
    now: Instant,
) -> Result<&'a mut Vec<String>, DomainError> {
    if live(entries, key, now).is_none() {
        entries.insert(
            key.to_string(),
            Entry {
                data: Data::List(Vec::new()),
                expires_at: None,
            },
        );
    }

    match entries.get_mut(key).map(|entry| &mut entry.data) {
        Some(Data::List(list)) => Ok(list),
        _ => Err(wrong_type(key)),
    }
}

fn set_mut<'a>(
    entries: &'a mut Entries,
    key: &str,
    now: Instant,
) -> Result<&'a mut BTreeSet<String>, DomainError> {
    if live(entries, key, now).is_none() {
        entries.insert(
            key.to_string(),
            Entry {
                data: Data::Set(BTreeSet::new()),
                expires_at: None,
            },
        );
    }

    match entries.get_mut(key).map(|entry| &mut entry.data) {
        Some(Data::Set(set)) => Ok(set),
        _ => Err(wrong_type(key)),
    }
}

/// Drops a collection key left empty by a removal, as Redis does
fn prune(entries: &mut Entries, key: &str) {
    if entries.get(key).is_some_and(|entry| entry.data.is_empty()) {
        entries.remove(key);
    }
}

fn read_hash<'a>(
    entries: &'a mut Entries,
    key: &str,
    now: Instant,
) -> Result<Option<&'a HashMap<String, String>>, DomainError> {
    match live(entries, key, now).map(|entry| &entry.data) {
        None => Ok(None),
        Some(Data::Hash(hash)) => Ok(Some(hash)),
        Some(_) => Err(wrong_type(key)),
    }
}

fn apply(entries: &mut Entries, op: &StoreOp, now: Instant) -> Result<StoreValue, DomainError> {
    match op {
        StoreOp::Get { key } => match live(entries, key, now).map(|entry| &entry.data) {
            None => Ok(StoreValue::Nil),
            Some(Data::Text(text)) => Ok(StoreValue::Text(text.clone())),
            Some(_) => Err(wrong_type(key)),
        },
        StoreOp::Set { key, value } => {
            entries.insert(
                key.clone(),
                Entry {
                    data: Data::Text(value.clone()),
                    expires_at: None,
                },
            );
            Ok(StoreValue::Nil)
        }
        StoreOp::SetNx { key, value } => {
            if live(entries, key, now).is_some() {
                return Ok(StoreValue::Bool(false));
            }
            entries.insert(
                key.clone(),
                Entry {
                    data: Data::Text(value.clone()),
                    expires_at: None,
                },
            );
            Ok(StoreValue::Bool(true))
        }
        StoreOp::Del { keys } => {
            let mut removed = 0;
            for key in keys {
                if live(entries, key, now).is_some() {
                    entries.remove(key);
                    removed += 1;
                }
            }
            Ok(StoreValue::Int(removed))
        }
        StoreOp::IncrBy { key, delta } => {
            if live(entries, key, now).is_none() {
                entries.insert(
                    key.clone(),
                    Entry {
                        data: Data::Text("0".to_string()),
                        expires_at: None,
                    },
                );
            }
            let Some(Data::Text(text)) = entries.get_mut(key).map(|entry| &mut entry.data) else {
                return Err(wrong_type(key));
            };
            let current: i64 = text
                .parse()
                .map_err(|_| DomainError::store("ERR value is not an integer"))?;
            let next = current + delta;
            *text = next.to_string();
            Ok(StoreValue::Int(next))
        }
        StoreOp::Expire { key, seconds } => match live(entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + Duration::from_secs(*seconds));
                Ok(StoreValue::Bool(true))
            }
            None => Ok(StoreValue::Bool(false)),
        },
        StoreOp::Exists { key } => Ok(StoreValue::Bool(live(entries, key, now).is_some())),
        StoreOp::HGet { key, field } => Ok(read_hash(entries, key, now)?
            .and_then(|hash| hash.get(field))
            .map_or(StoreValue::Nil, |value| StoreValue::Text(value.clone()))),
        StoreOp::HMGet { key, fields } => {
            let hash = read_hash(entries, key, now)?;
            Ok(StoreValue::Values(
                fields
                    .iter()
                    .map(|field| hash.and_then(|h| h.get(field)).cloned())
                    .collect(),
            ))
        }
        StoreOp::HSet { key, field, value } => {
            let created = hash_mut(entries, key, now)?
                .insert(field.clone(), value.clone())
                .is_none();
            Ok(StoreValue::Int(i64::from(created)))
        }
        StoreOp::HSetNx { key, field, value } => {
            let hash = hash_mut(entries, key, now)?;
            if hash.contains_key(field) {
                return Ok(StoreValue::Bool(false));
            }
            hash.insert(field.clone(), value.clone());
            Ok(StoreValue::Bool(true))
        }
        StoreOp::HDel { key, fields } => {
            if read_hash(entries, key, now)?.is_none() {
                return Ok(StoreValue::Int(0));
            }
            let hash = hash_mut(entries, key, now)?;
            let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
            prune(entries, key);
            Ok(StoreValue::Int(removed as i64))
        }
        StoreOp::HIncrBy { key, field, delta } => {
            let hash = hash_mut(entries, key, now)?;
            let current: i64 = match hash.get(field) {
                Some(value) => value
                    .parse()
                    .map_err(|_| DomainError::store("ERR hash value is not an integer"))?,
                None => 0,
            };
            let next = current + delta;
            hash.insert(field.clone(), next.to_string());
            Ok(StoreValue::Int(next))
        }
        StoreOp::HGetAll { key } => Ok(StoreValue::Map(
            read_hash(entries, key, now)?.cloned().unwrap_or_default(),
        )),
        StoreOp::HKeys { key } => Ok(StoreValue::Strings(
            read_hash(entries, key, now)?
                .map(|hash| hash.keys().cloned().collect())
                .unwrap_or_default(),
        )),
        StoreOp::RPush { key, values } => {
            let list = list_mut(entries, key, now)?;
            list.extend(values.iter().cloned());
            Ok(StoreValue::Int(list.len() as i64))
        }
        StoreOp::LRange { key } => match live(entries, key, now).map(|entry| &entry.data) {
            None => Ok(StoreValue::Strings(Vec::new())),
            Some(Data::List(list)) => Ok(StoreValue::Strings(list.clone())),
            Some(_) => Err(wrong_type(key)),
        },
        StoreOp::SAdd { key, members } => {
            let set = set_mut(entries, key, now)?;
            let added = members.iter().filter(|m| set.insert((*m).clone())).count();
            Ok(StoreValue::Int(added as i64))
        }
        StoreOp::SRem { key, members } => {
            let removed = match live(entries, key, now).map(|entry| &mut entry.data) {
                None => 0,
                Some(Data::Set(set)) => members.iter().filter(|m| set.remove(*m)).count(),
                Some(_) => return Err(wrong_type(key)),
            };
            prune(entries, key);
            Ok(StoreValue::Int(removed as i64))
        }
        StoreOp::SMembers { key } => match live(entries, key, now).map(|entry| &entry.data) {
            None => Ok(StoreValue::Strings(Vec::new())),
            Some(Data::Set(set)) => Ok(StoreValue::Strings(set.iter().cloned().collect())),
            Some(_) => Err(wrong_type(key)),
        },
        StoreOp::SIsMember { key, member } => {
            match live(entries, key, now).map(|entry| &entry.data) {
                None => Ok(StoreValue::Bool(false)),
                Some(Data::Set(set)) => Ok(StoreValue::Bool(set.contains(member))),
                Some(_) => Err(wrong_type(key)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::StoreExt;

    #[tokio::test]
    async fn test_string_commands() {
        let store = InMemoryStore::new();

        store.set("key", "value").await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), Some("value".into()));
        assert_eq!(store.get("missing").await.unwrap(), None);

        assert_eq!(store.incr_by("counter", 2).await.unwrap(), 2);
        assert_eq!(store.incr_by("counter", 3).await.unwrap(), 5);

        assert_eq!(store.del(&["key".to_string(), "nope".to_string()]).await.unwrap(), 1);
        assert_eq!(store.get("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx_only_writes_once() {
        let store = InMemoryStore::new();

        let replies = store
            .pipeline(&[StoreOp::set_nx("k", "a"), StoreOp::set_nx("k", "b")])
            .await
            .unwrap();

        assert_eq!(replies, vec![StoreValue::Bool(true), StoreValue::Bool(false)]);
        assert_eq!(store.get("k").await.unwrap(), Some("a".into()));
    }

    #[tokio::test]
    async fn test_hash_commands() {
        let store = InMemoryStore::new();

        assert_eq!(store.hincr_by("h", "count", 4).await.unwrap(), 4);
        store.hset("h", "name", "red").await.unwrap();
        assert!(!store.hset_nx("h", "name", "blue").await.unwrap());
        assert!(store.hset_nx("h", "other", "x").await.unwrap());

        let all = store.hget_all("h").await.unwrap();
        assert_eq!(all.get("count").map(String::as_str), Some("4"));
        assert_eq!(all.get("name").map(String::as_str), Some("red"));

        let replies = store
            .pipeline(&[StoreOp::hmget("h", ["name", "missing"])])
            .await
            .unwrap();
        assert_eq!(
            replies[0],
            StoreValue::Values(vec![Some("red".into()), None])
        );

        store.hdel("h", "name").await.unwrap();
        assert_eq!(store.hget("h", "name").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_collections_are_removed() {
        let store = InMemoryStore::new();

        store.hset("h", "only", "1").await.unwrap();
        store.hdel("h", "only").await.unwrap();
        assert!(store.is_empty());

        store
            .pipeline(&[StoreOp::sadd("s", ["a"]), StoreOp::srem("s", ["a"])])
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_list_and_set_commands() {
        let store = InMemoryStore::new();

        store
            .pipeline(&[
                StoreOp::rpush("list", ["a", "b"]),
                StoreOp::rpush("list", ["c"]),
                StoreOp::sadd("set", ["x", "y", "x"]),
            ])
            .await
            .unwrap();

        assert_eq!(store.lrange("list").await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.smembers("set").await.unwrap(), vec!["x", "y"]);
        assert!(store.sismember("set", "x").await.unwrap());
        assert!(!store.sismember("set", "z").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_error() {
        let store = InMemoryStore::new();
        store.set("text", "value").await.unwrap();

        let err = store.hincr_by("text", "field", 1).await.unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
    }

    #[tokio::test]
    async fn test_failed_transaction_is_rolled_back() {
        let store = InMemoryStore::new();
        store.set("text", "value").await.unwrap();

        let result = store
            .transaction(&[
                StoreOp::hincr_by("counter", "n", 1),
                StoreOp::hincr_by("text", "n", 1),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(store.hget("counter", "n").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transaction_commits_only_touched_keys() {
        let store = InMemoryStore::new();
        for i in 0..50 {
            store.set(&format!("bystander:{}", i), "kept").await.unwrap();
        }
        store.hset("h", "only", "1").await.unwrap();
        store.set("gone", "1").await.unwrap();

        let replies = store
            .transaction(&[
                StoreOp::hdel("h", ["only"]),
                StoreOp::del(["gone"]),
                StoreOp::incr_by("fresh", 2),
                StoreOp::get("bystander:7"),
            ])
            .await
            .unwrap();

        assert_eq!(replies[3], StoreValue::Text("kept".to_string()));
        assert_eq!(store.len(), 51);
        assert!(store.hget_all("h").await.unwrap().is_empty());
        assert_eq!(store.get("gone").await.unwrap(), None);
        assert_eq!(store.get("fresh").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("bystander:49").await.unwrap().as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_expired_keys_disappear() {
        let store = InMemoryStore::new();

        store
            .transaction(&[StoreOp::set("temp", "1"), StoreOp::expire("temp", 0)])
            .await
            .unwrap();

        assert_eq!(store.get("temp").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStore::new());
        let mut handles = vec![];

        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.hincr_by("alt", "participant_count", 1).await.unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            store.hget("alt", "participant_count").await.unwrap(),
            Some("50".into())
        );
    }
}
