/// RocksDB Store
///
/// Two column families carry the key layout:
/// - `hashes`: key -> bincode `BTreeMap<String, String>`
/// - `lists`:  key -> bincode `Vec<String>`
///
/// List pushes and counter increments are read-modify-write, so every
/// mutation runs under one writer mutex. Each `exec` loads the keys it
/// touches, applies the batch in memory and commits the results through a
/// single `AtomicBatchWriter` flush.
///
/// Clones share the database and the writer mutex. A second `RocksStore`
/// built with `from_db` over the same `DB` does not; only one such store may
/// write to a given database.

use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use rocksdb::{Options, DB};
use tokio::sync::Mutex;
use tracing::info;
use crate::atomic_writer::AtomicBatchWriter;
use crate::config::DatabaseSettings;
use crate::error::{LedgerError, Result};
use super::{incr_field, touched_keys, BatchOp, HashFields, KvState, KvStore};

pub const CF_HASHES: &str = "hashes";
pub const CF_LISTS: &str = "lists";

pub const COLUMN_FAMILIES: &[&str] = &[CF_HASHES, CF_LISTS];

#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksStore {
    /// Open (or create) the database at `path` with the ledger column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path.as_ref(), COLUMN_FAMILIES)?;
        info!(path = %path.as_ref().display(), "Opened ledger database");
        Ok(Self::from_db(Arc::new(db)))
    }

    /// Open the database named by the `database` settings.
    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self> {
        Self::open(&settings.path)
    }

    /// Wrap an already-open database. It must contain the ledger column families.
    ///
    /// The store owns the writer mutex: at most one `RocksStore` (and its
    /// clones) may wrap a given `DB`, or concurrent list updates can be lost.
    pub fn from_db(db: Arc<DB>) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn db(&self) -> Arc<DB> {
        self.db.clone()
    }

    async fn get_raw(&self, cf_name: &'static str, key: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db.clone();
        let key = key.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || {
            let cf = db
                .cf_handle(cf_name)
                .ok_or_else(|| LedgerError::store(format!("Column family not found: {}", cf_name)))?;
            db.get_cf(&cf, key).map_err(LedgerError::from)
        })
        .await?
    }

    async fn read_hash(&self, key: &str) -> Result<Option<HashFields>> {
        match self.get_raw(CF_HASHES, key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.get_raw(CF_LISTS, key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl KvStore for RocksStore {
    async fn hgetall(&self, key: &str) -> Result<HashFields> {
        Ok(self.read_hash(key).await?.unwrap_or_default())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let _guard = self.write_lock.lock().await;

        let mut hash = self.read_hash(key).await?.unwrap_or_default();
        let next = incr_field(&mut hash, key, field, delta)?;

        let mut writer = AtomicBatchWriter::new(self.db.clone());
        writer.put(CF_HASHES, key.as_bytes().to_vec(), bincode::serialize(&hash)?);
        writer.flush().await?;
        Ok(next)
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.read_list(key).await?.unwrap_or_default())
    }

    async fn exec(&self, ops: Vec<BatchOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;

        let (hash_keys, list_keys) = touched_keys(&ops);
        let mut overlay = KvState::default();
        for key in &hash_keys {
            if let Some(hash) = self.read_hash(key).await? {
                overlay.hashes.insert(key.clone(), hash);
            }
        }
        for key in &list_keys {
            if let Some(list) = self.read_list(key).await? {
                overlay.lists.insert(key.clone(), list);
            }
        }

        for op in ops {
            overlay.apply(op);
        }

        let mut writer = AtomicBatchWriter::new(self.db.clone());
        for key in hash_keys {
            match overlay.hashes.get(&key) {
                Some(hash) if !hash.is_empty() => {
                    writer.put(CF_HASHES, key.into_bytes(), bincode::serialize(hash)?)
                }
                _ => writer.delete(CF_HASHES, key.into_bytes()),
            }
        }
        for key in list_keys {
            match overlay.lists.get(&key) {
                Some(list) if !list.is_empty() => {
                    writer.put(CF_LISTS, key.into_bytes(), bincode::serialize(list)?)
                }
                _ => writer.delete(CF_LISTS, key.into_bytes()),
            }
        }
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_hash_fields_persist() {
        let (store, _temp) = create_test_store();
        store
            .exec(vec![BatchOp::hset(
                "addr:DX",
                vec![("sent".into(), "1".into()), ("received".into(), "5".into())],
            )])
            .await
            .unwrap();

        assert_eq!(store.hget("addr:DX", "received").await.unwrap(), Some("5".to_string()));
        assert_eq!(
            store.hmget("addr:DX", &["sent", "staked"]).await.unwrap(),
            vec![Some("1".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_list_push_and_remove() {
        let (store, _temp) = create_test_store();
        store
            .exec(vec![BatchOp::rpush("addr.utxo:DX", "t1:0"), BatchOp::rpush("addr.utxo:DX", "t2:1")])
            .await
            .unwrap();
        store.exec(vec![BatchOp::lrem("addr.utxo:DX", "t1:0")]).await.unwrap();

        assert_eq!(store.lrange("addr.utxo:DX").await.unwrap(), vec!["t2:1"]);

        store.exec(vec![BatchOp::lrem("addr.utxo:DX", "t2:1")]).await.unwrap();
        assert!(store.lrange("addr.utxo:DX").await.unwrap().is_empty());

        // Emptied lists are deleted, not stored empty
        let db = store.db();
        let cf = db.cf_handle(CF_LISTS).unwrap();
        assert!(db.get_cf(&cf, b"addr.utxo:DX").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_del_removes_hash() {
        let (store, _temp) = create_test_store();
        store
            .exec(vec![BatchOp::hset("utxo:t1:0", vec![("val".into(), "40".into())])])
            .await
            .unwrap();
        store.exec(vec![BatchOp::del("utxo:t1:0")]).await.unwrap();
        assert!(store.hgetall("utxo:t1:0").await.unwrap().is_empty());
        assert!(!store.exists("utxo:t1:0").await.unwrap());
    }

    #[tokio::test]
    async fn test_hincrby() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.hincrby("coinbase", "sent", 10).await.unwrap(), 10);
        assert_eq!(store.hincrby("coinbase", "sent", 15).await.unwrap(), 25);
        assert_eq!(store.hget("coinbase", "sent").await.unwrap(), Some("25".to_string()));
    }

    #[tokio::test]
    async fn test_open_from_settings() {
        let temp_dir = TempDir::new().unwrap();
        let settings = DatabaseSettings {
            path: temp_dir.path().join("ledger").to_string_lossy().into_owned(),
        };
        let store = RocksStore::from_settings(&settings).unwrap();
        store.exec(vec![BatchOp::rpush("l", "v")]).await.unwrap();
        assert!(temp_dir.path().join("ledger").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clones_serialize_list_updates() {
        let (store, _temp) = create_test_store();

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .exec(vec![BatchOp::rpush("addr.utxo:DX", format!("w{}:{}", worker, i))])
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.lrange("addr.utxo:DX").await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store.exec(vec![BatchOp::rpush("l", "v")]).await.unwrap();
        }
        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.lrange("l").await.unwrap(), vec!["v"]);
    }
}
