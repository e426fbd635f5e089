/// In-Memory Store
///
/// Whole data set behind one `tokio::sync::RwLock`. Used by tests and by
/// callers that reconcile without a database.

use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;
use crate::error::Result;
use super::{incr_field, BatchOp, HashFields, KvState, KvStore};

/// In-process store. A batch holds the write lock for its whole duration,
/// which makes it atomic with respect to every other caller.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<KvState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hash keys currently stored
    pub async fn hash_count(&self) -> usize {
        self.state.read().await.hashes.len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn hgetall(&self, key: &str) -> Result<HashFields> {
        let state = self.state.read().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut state = self.state.write().await;
        let mut hash = state.hashes.get(key).cloned().unwrap_or_default();
        let next = incr_field(&mut hash, key, field, delta)?;
        state.hashes.insert(key.to_string(), hash);
        Ok(next)
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.lists.get(key).cloned().unwrap_or_default())
    }

    async fn exec(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut state = self.state.write().await;
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }
}
