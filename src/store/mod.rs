/// Key-Value Store Contract
///
/// The reconcilers only need a handful of hash and list primitives plus an
/// all-or-nothing batch. `KvStore` names exactly those, so the same core runs
/// against RocksDB in production and an in-memory map in tests.
///
/// Atomicity: `exec` applies every `BatchOp` of one call or none of them. The pairs that
/// must land together (UTXO create + spend-index append, UTXO delete +
/// spend-index removal) are always submitted as one `exec`.

use std::collections::{BTreeMap, HashMap, HashSet};
use async_trait::async_trait;
use crate::error::{LedgerError, Result};

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

/// Field map of a stored hash
pub type HashFields = BTreeMap<String, String>;

/// One mutation inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set (merge) fields of a hash
    HSet { key: String, fields: Vec<(String, String)> },
    /// Remove a key of any kind
    Del { key: String },
    /// Append to the tail of a list
    RPush { key: String, value: String },
    /// Remove every occurrence of `value` from a list
    LRem { key: String, value: String },
}

impl BatchOp {
    pub fn hset(key: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        BatchOp::HSet { key: key.into(), fields }
    }

    pub fn del(key: impl Into<String>) -> Self {
        BatchOp::Del { key: key.into() }
    }

    pub fn rpush(key: impl Into<String>, value: impl Into<String>) -> Self {
        BatchOp::RPush { key: key.into(), value: value.into() }
    }

    pub fn lrem(key: impl Into<String>, value: impl Into<String>) -> Self {
        BatchOp::LRem { key: key.into(), value: value.into() }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// All fields of a hash; empty when the key is absent.
    async fn hgetall(&self, key: &str) -> Result<HashFields>;

    /// Atomically add `delta` to an integer hash field, returning the new value.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Whole list; empty when the key is absent.
    async fn lrange(&self, key: &str) -> Result<Vec<String>>;

    /// Apply all operations together or not at all.
    async fn exec(&self, ops: Vec<BatchOp>) -> Result<()>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.hgetall(key).await?.remove(field))
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let hash = self.hgetall(key).await?;
        Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(!self.hgetall(key).await?.is_empty() || !self.lrange(key).await?.is_empty())
    }
}

/// Hash and list contents that a batch is applied to.
///
/// `MemoryStore` keeps its whole data set in one of these; `RocksStore`
/// loads only the keys a batch touches and writes them back.
#[derive(Debug, Default, Clone)]
pub(crate) struct KvState {
    pub hashes: HashMap<String, HashFields>,
    pub lists: HashMap<String, Vec<String>>,
}

impl KvState {
    pub fn apply(&mut self, op: BatchOp) {
        match op {
            BatchOp::HSet { key, fields } => {
                self.hashes.entry(key).or_default().extend(fields);
            }
            BatchOp::Del { key } => {
                self.hashes.remove(&key);
                self.lists.remove(&key);
            }
            BatchOp::RPush { key, value } => {
                self.lists.entry(key).or_default().push(value);
            }
            BatchOp::LRem { key, value } => {
                if let Some(list) = self.lists.get_mut(&key) {
                    list.retain(|v| v != &value);
                    if list.is_empty() {
                        self.lists.remove(&key);
                    }
                }
            }
        }
    }
}

/// Keys a batch reads or writes, split by value kind.
pub(crate) fn touched_keys(ops: &[BatchOp]) -> (HashSet<String>, HashSet<String>) {
    let mut hashes = HashSet::new();
    let mut lists = HashSet::new();
    for op in ops {
        match op {
            BatchOp::HSet { key, .. } => {
                hashes.insert(key.clone());
            }
            BatchOp::Del { key } => {
                hashes.insert(key.clone());
                lists.insert(key.clone());
            }
            BatchOp::RPush { key, .. } | BatchOp::LRem { key, .. } => {
                lists.insert(key.clone());
            }
        }
    }
    (hashes, lists)
}

/// Increment an integer field in place.
pub(crate) fn incr_field(hash: &mut HashFields, key: &str, field: &str, delta: i64) -> Result<i64> {
    let current = match hash.get(field) {
        Some(raw) => raw.parse::<i64>().map_err(|_| {
            LedgerError::store(format!("{} field {} is not an integer: {}", key, field, raw))
        })?,
        None => 0,
    };
    let next = current
        .checked_add(delta)
        .ok_or_else(|| LedgerError::store(format!("{} field {} overflow", key, field)))?;
    hash.insert(field.to_string(), next.to_string());
    Ok(next)
}
