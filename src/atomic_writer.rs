/// Atomic Multi-CF Database Writer
///
/// Collects puts and deletes across RocksDB column families and commits
/// them as a single `WriteBatch`: either every operation lands or none do.
/// The store relies on this for UTXO create/delete together with the
/// owning address's spend-index update.

use std::sync::Arc;
use std::collections::HashMap;
use rocksdb::{DB, WriteBatch};
use tracing::{debug, error, warn};
use crate::error::{LedgerError, Result};
use crate::metrics;

/// Flushes slower than this are logged as warnings
const SLOW_FLUSH_SECS: f64 = 1.0;

/// Atomic batch writer that commits writes across multiple column families atomically
pub struct AtomicBatchWriter {
    db: Arc<DB>,
    operations: Vec<Operation>,
}

/// Represents a single database operation
#[derive(Clone)]
enum Operation {
    Put {
        cf_name: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf_name: String,
        key: Vec<u8>,
    },
}

impl Operation {
    fn cf_name(&self) -> &str {
        match self {
            Operation::Put { cf_name, .. } | Operation::Delete { cf_name, .. } => cf_name,
        }
    }
}

impl AtomicBatchWriter {
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            operations: Vec::new(),
        }
    }

    /// Add a put operation to the batch
    pub fn put(&mut self, cf_name: &str, key: Vec<u8>, value: Vec<u8>) {
        self.operations.push(Operation::Put {
            cf_name: cf_name.to_string(),
            key,
            value,
        });
    }

    /// Add a delete operation to the batch
    pub fn delete(&mut self, cf_name: &str, key: Vec<u8>) {
        self.operations.push(Operation::Delete {
            cf_name: cf_name.to_string(),
            key,
        });
    }

    /// Get number of pending operations
    pub fn pending_count(&self) -> usize {
        self.operations.len()
    }

    /// Commit all accumulated writes in one RocksDB `WriteBatch`.
    ///
    /// On error nothing has been written and the pending operations are gone.
    pub async fn flush(&mut self) -> Result<()> {
        if self.operations.is_empty() {
            return Ok(());
        }

        let pending_ops = self.operations.len();
        let timer = metrics::Timer::new();
        let operations = std::mem::take(&mut self.operations);
        let db = self.db.clone();

        debug!(pending_ops = pending_ops, "Batch flush start");

        let (write_result, cf_batch_sizes) = tokio::task::spawn_blocking(
            move || -> (std::result::Result<(), String>, HashMap<String, usize>) {
                let mut batch = WriteBatch::default();
                let mut cf_batch_sizes: HashMap<String, usize> = HashMap::new();

                for op in &operations {
                    let cf = match db.cf_handle(op.cf_name()) {
                        Some(cf) => cf,
                        None => {
                            return (
                                Err(format!("Column family not found: {}", op.cf_name())),
                                HashMap::new(),
                            );
                        }
                    };
                    *cf_batch_sizes.entry(op.cf_name().to_string()).or_insert(0) += 1;

                    match op {
                        Operation::Put { key, value, .. } => batch.put_cf(&cf, key, value),
                        Operation::Delete { key, .. } => batch.delete_cf(&cf, key),
                    }
                }

                (db.write(batch).map_err(|e| e.to_string()), cf_batch_sizes)
            },
        )
        .await?;

        let elapsed_secs = timer.elapsed_secs();

        match write_result {
            Ok(()) => {
                for (cf_name, batch_size) in &cf_batch_sizes {
                    metrics::record_store_flush(cf_name, elapsed_secs, *batch_size);
                }
                if elapsed_secs > SLOW_FLUSH_SECS {
                    warn!(
                        batch_size = pending_ops,
                        duration_secs = elapsed_secs,
                        "Slow database flush"
                    );
                }
                Ok(())
            }
            Err(db_error) => {
                error!(batch_size = pending_ops, error = %db_error, "Flush error");
                for cf_name in cf_batch_sizes.keys() {
                    metrics::increment_store_errors("flush", cf_name);
                }
                Err(LedgerError::Store(db_error))
            }
        }
    }
}
