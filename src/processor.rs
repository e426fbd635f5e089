/// Transaction Processor
///
/// Drives one transaction through normalize -> inputs -> outputs -> ledger.
/// Ledger updates are grouped by address. Each group runs under that
/// address's lock, so read-modify-write on `addr:{addr}` never interleaves,
/// while distinct addresses are updated concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use futures::future::try_join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, warn, Instrument};
use crate::error::{LedgerError, Result};
use crate::inputs::process_ins;
use crate::ledger::{update_address, AddressDelta, LedgerUpdate};
use crate::metrics::{self, Timer};
use crate::normalize::normalize_tx;
use crate::outputs::{process_outs, OutputsResult};
use crate::store::KvStore;
use crate::telemetry::truncate_hex;
use crate::types::{AddrValue, LedgerEntryKind, RawTransaction, ReconcileWarning};

/// Per-address lock registry
#[derive(Default)]
pub struct AddressLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding ledger updates of `addr`.
    pub fn lock_for(&self, addr: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop locks nobody holds a handle to.
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of reconciling one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTx {
    pub txid: String,
    /// Debits per address, without the staker's consumed input
    pub spent: Vec<AddrValue>,
    /// Credits per address; for a coinstake the first entry is the net reward
    pub received: Vec<AddrValue>,
    pub staked: bool,
    /// Ledger updates applied, in delta order. Empty on a dry run.
    pub ledger: Vec<LedgerUpdate>,
    pub warnings: Vec<ReconcileWarning>,
}

impl ProcessedTx {
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Ledger deltas implied by a reconciled transaction.
///
/// Every remaining input is `Sent`. The staker's netted output of a
/// coinstake is `Staked`; every other output is `Received`.
pub fn ledger_deltas(txid: &str, outs: &OutputsResult) -> Vec<AddressDelta> {
    let sent = outs
        .nvin
        .iter()
        .map(|vin| AddressDelta::new(vin.addr.clone(), vin.val, LedgerEntryKind::Sent, txid));
    let received = outs.vout.iter().enumerate().map(|(i, vout)| {
        let kind = LedgerEntryKind::for_output(outs.staked && i == 0);
        AddressDelta::new(vout.addr.clone(), vout.val, kind, txid)
    });
    sent.chain(received).collect()
}

/// Group deltas by address, keeping first-appearance order.
fn group_deltas(deltas: Vec<AddressDelta>) -> Vec<(String, Vec<AddressDelta>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<AddressDelta>)> = Vec::new();
    for delta in deltas {
        match index.get(&delta.addr) {
            Some(&i) => groups[i].1.push(delta),
            None => {
                index.insert(delta.addr.clone(), groups.len());
                groups.push((delta.addr.clone(), vec![delta]));
            }
        }
    }
    groups
}

pub struct TxProcessor<S: KvStore> {
    store: Arc<S>,
    locks: Arc<AddressLocks>,
}

impl<S: KvStore> Clone for TxProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: KvStore> TxProcessor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_locks(store, Arc::new(AddressLocks::new()))
    }

    /// Share a lock registry with other processors writing the same store.
    pub fn with_locks(store: Arc<S>, locks: Arc<AddressLocks>) -> Self {
        if let Err(e) = metrics::init_metrics() {
            warn!(error = %e, "Failed to register metrics");
        }
        Self { store, locks }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Reconcile `raw` at `height`. With `should_update` false nothing is
    /// written and the result reports what would be applied.
    pub async fn process(&self, raw: &RawTransaction, height: i64, should_update: bool) -> Result<ProcessedTx> {
        let span = tracing::debug_span!("process_tx", txid = %truncate_hex(&raw.txid, 16), height = height);
        let result = self.process_inner(raw, height, should_update).instrument(span).await;

        if let Err(e) = &result {
            if e.is_store_unavailable() {
                metrics::increment_store_errors("process_tx", "all");
                error!(txid = %raw.txid, height = height, error = %e, "Store unavailable, transaction not reconciled");
            } else {
                warn!(txid = %raw.txid, height = height, error = %e, "Transaction rejected");
            }
        }
        result
    }

    /// Parse node RPC JSON and reconcile it.
    pub async fn process_raw_json(&self, json: &str, height: i64, should_update: bool) -> Result<ProcessedTx> {
        let raw: RawTransaction = serde_json::from_str(json)?;
        self.process(&raw, height, should_update).await
    }

    async fn process_inner(&self, raw: &RawTransaction, height: i64, should_update: bool) -> Result<ProcessedTx> {
        let timer = Timer::new();
        let tx = normalize_tx(raw)?;

        let ins = process_ins(&*self.store, &tx, height, should_update).await?;
        let outs = process_outs(&*self.store, &tx, &ins.value, height, should_update).await?;

        let ledger = if should_update {
            self.apply_deltas(ledger_deltas(&tx.txid, &outs)).await?
        } else {
            Vec::new()
        };

        if !ins.warnings.is_empty() {
            warn!(
                txid = %tx.txid,
                height = height,
                unresolved = ins.warnings.len(),
                "Transaction reconciled with unresolved inputs"
            );
        }

        metrics::TX_PROCESS_DURATION.observe(timer.elapsed_secs());
        metrics::increment_transactions_processed(should_update);
        debug!(
            inputs = outs.nvin.len(),
            outputs = outs.vout.len(),
            staked = outs.staked,
            ledger_updates = ledger.len(),
            "Transaction reconciled"
        );

        Ok(ProcessedTx {
            txid: tx.txid,
            spent: outs.nvin,
            received: outs.vout,
            staked: outs.staked,
            ledger,
            warnings: ins.warnings,
        })
    }

    async fn apply_deltas(&self, deltas: Vec<AddressDelta>) -> Result<Vec<LedgerUpdate>> {
        let tasks = group_deltas(deltas).into_iter().map(|(addr, deltas)| {
            let lock = self.locks.lock_for(&addr);
            let store = self.store.clone();
            async move {
                let _guard = lock.lock().await;
                let mut updates = Vec::with_capacity(deltas.len());
                for delta in &deltas {
                    updates.push(update_address(&*store, delta).await?);
                }
                Ok::<_, LedgerError>(updates)
            }
        });

        let updates = try_join_all(tasks).await?;
        self.locks.prune();
        Ok(updates.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::read_ledger;
    use crate::store::MemoryStore;

    fn outs(vout: Vec<AddrValue>, nvin: Vec<AddrValue>, staked: bool) -> OutputsResult {
        OutputsResult { vout, nvin, staked }
    }

    #[test]
    fn test_deltas_for_plain_payment() {
        let deltas = ledger_deltas(
            "t",
            &outs(
                vec![AddrValue::new("B", 9), AddrValue::new("A", 1)],
                vec![AddrValue::new("A", 10)],
                false,
            ),
        );
        let kinds: Vec<(&str, LedgerEntryKind)> = deltas.iter().map(|d| (d.addr.as_str(), d.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("A", LedgerEntryKind::Sent),
                ("B", LedgerEntryKind::Received),
                ("A", LedgerEntryKind::Received),
            ]
        );
    }

    #[test]
    fn test_deltas_for_coinstake() {
        let deltas = ledger_deltas(
            "t",
            &outs(vec![AddrValue::new("X", 70), AddrValue::new("MN", 20)], vec![], true),
        );
        assert_eq!(deltas[0], AddressDelta::new("X", 70, LedgerEntryKind::Staked, "t"));
        assert_eq!(deltas[1], AddressDelta::new("MN", 20, LedgerEntryKind::Received, "t"));
    }

    #[test]
    fn test_group_deltas_keeps_order() {
        let groups = group_deltas(vec![
            AddressDelta::new("A", 1, LedgerEntryKind::Sent, "t"),
            AddressDelta::new("B", 2, LedgerEntryKind::Received, "t"),
            AddressDelta::new("A", 3, LedgerEntryKind::Received, "t"),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "A");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "B");
    }

    #[test]
    fn test_address_locks_shared_and_pruned() {
        let locks = AddressLocks::new();
        let a = locks.lock_for("A");
        let again = locks.lock_for("A");
        assert!(Arc::ptr_eq(&a, &again));
        locks.lock_for("B");
        assert_eq!(locks.len(), 2);

        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(a);
        drop(again);
        locks.prune();
        assert!(locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_same_address_serialized() {
        let processor = TxProcessor::new(Arc::new(MemoryStore::new()));

        let mut handles = Vec::new();
        for i in 0..32u32 {
            let processor = processor.clone();
            handles.push(tokio::spawn(async move {
                let deltas = vec![AddressDelta::new("HOT", 5, LedgerEntryKind::Received, format!("t{}", i))];
                processor.apply_deltas(deltas).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let ledger = read_ledger(&**processor.store(), "HOT").await.unwrap();
        assert_eq!(ledger.received, 160);
        assert_eq!(ledger.balance, 160);
        assert_eq!(processor.store().lrange("addr.received:HOT").await.unwrap().len(), 32);
    }

    struct UnavailableStore;

    #[async_trait::async_trait]
    impl KvStore for UnavailableStore {
        async fn hgetall(&self, _key: &str) -> Result<crate::store::HashFields> {
            Err(LedgerError::store("connection refused"))
        }

        async fn hincrby(&self, _key: &str, _field: &str, _delta: i64) -> Result<i64> {
            Err(LedgerError::store("connection refused"))
        }

        async fn lrange(&self, _key: &str) -> Result<Vec<String>> {
            Err(LedgerError::store("connection refused"))
        }

        async fn exec(&self, _ops: Vec<crate::store::BatchOp>) -> Result<()> {
            Err(LedgerError::store("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_unavailable() {
        let processor = TxProcessor::new(Arc::new(UnavailableStore));
        let counter = metrics::STORE_ERRORS.with_label_values(&["process_tx", "all"]);
        let before = counter.get();

        let json = r#"{"txid": "t", "vin": [{"txid": "prev", "vout": 0}], "vout": []}"#;
        let err = processor.process_raw_json(json, 1, true).await.unwrap_err();

        assert!(err.is_store_unavailable());
        assert!(counter.get() > before);
    }

    #[tokio::test]
    async fn test_process_raw_json_rejects_malformed() {
        let processor = TxProcessor::new(Arc::new(MemoryStore::new()));
        let err = processor.process_raw_json("{not json", 1, true).await.unwrap_err();
        assert!(matches!(err, LedgerError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_invalid_amount_rejected_before_any_write() {
        let store = Arc::new(MemoryStore::new());
        let processor = TxProcessor::new(store.clone());
        let json = r#"{
            "txid": "bad",
            "vin": [{"coinbase": "01"}],
            "vout": [{"value": "lots", "n": 0, "scriptPubKey": {"type": "pubkeyhash", "addresses": ["A"]}}]
        }"#;

        let err = processor.process_raw_json(json, 1, true).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        assert_eq!(store.hash_count().await, 0);
    }
}
