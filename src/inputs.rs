/// Input Reconciliation
///
/// Resolves which addresses value flowed out of for one transaction.
///
/// - Coinbase input: the block's issuance, summed over the countable outputs
///   and attributed to the `coinbase` pseudo-account. No store access.
/// - Spend input: looked up under `utxo:{txid}:{n}`. With `should_update`
///   the record and its spend-index entry are removed in one atomic batch.
///   A dry run reports the same debits without touching the store.
///
/// A missing or unparsable UTXO does not fail the transaction: it is logged,
/// counted and returned as a `ReconcileWarning`, and the input contributes
/// nothing to the result.

use tracing::{debug, error};
use crate::classify::{group_by_addr, has_valid_outs};
use crate::error::Result;
use crate::keys::{addr_utxo_key, outpoint_ref, utxo_key, UTXO_JSON_FIELD};
use crate::metrics;
use crate::store::{BatchOp, KvStore};
use crate::telemetry::truncate_hex;
use crate::types::{
    AddrValue, InputRef, NormalizedTransaction, ReconcileWarning, Reconciled, UtxoRecord,
    COINBASE_ADDR,
};

/// Outcome of reading one UTXO record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoLookup {
    Found(UtxoRecord),
    Missing,
    Corrupt(String),
}

/// Read the UTXO stored for output `n` of `txid`.
pub async fn lookup_utxo<S: KvStore + ?Sized>(store: &S, txid: &str, n: u32) -> Result<UtxoLookup> {
    let raw = match store.hget(&utxo_key(txid, n), UTXO_JSON_FIELD).await? {
        Some(raw) => raw,
        None => return Ok(UtxoLookup::Missing),
    };
    match serde_json::from_str::<UtxoRecord>(&raw) {
        Ok(utxo) => Ok(UtxoLookup::Found(utxo)),
        Err(e) => Ok(UtxoLookup::Corrupt(e.to_string())),
    }
}

/// Issuance of a coinbase transaction: sum of its countable outputs.
pub fn coinbase_issuance(tx: &NormalizedTransaction) -> i64 {
    tx.vout
        .iter()
        .filter(|out| has_valid_outs(out))
        .map(|out| out.val)
        .sum()
}

/// Batch that consumes a UTXO: record and spend-index entry go together.
pub(crate) fn utxo_spend_ops(addr: &str, txid: &str, n: u32) -> Vec<BatchOp> {
    vec![
        BatchOp::del(utxo_key(txid, n)),
        BatchOp::lrem(addr_utxo_key(addr), outpoint_ref(txid, n)),
    ]
}

/// Compute the per-address debits of `tx`, optionally spending the UTXOs.
pub async fn process_ins<S: KvStore + ?Sized>(
    store: &S,
    tx: &NormalizedTransaction,
    height: i64,
    should_update: bool,
) -> Result<Reconciled<Vec<AddrValue>>> {
    let mut result: Vec<AddrValue> = Vec::with_capacity(tx.vin.len());
    let mut warnings: Vec<ReconcileWarning> = Vec::new();

    for vin in &tx.vin {
        match vin {
            InputRef::Coinbase => {
                result.push(AddrValue::new(COINBASE_ADDR, coinbase_issuance(tx)));
            }
            InputRef::Spend { id, n } => match lookup_utxo(store, id, *n).await? {
                UtxoLookup::Found(utxo) => {
                    if should_update {
                        store.exec(utxo_spend_ops(&utxo.addr, id, *n)).await?;
                        metrics::UTXOS_SPENT.inc();
                    }
                    debug!(
                        txid = %truncate_hex(&tx.txid, 16),
                        prev = %truncate_hex(id, 16),
                        n = *n,
                        addr = %utxo.addr,
                        val = utxo.val,
                        height = height,
                        "Input resolved"
                    );
                    result.push(AddrValue::new(utxo.addr, utxo.val));
                }
                UtxoLookup::Missing => {
                    error!(
                        txid = %tx.txid,
                        key = %utxo_key(id, *n),
                        height = height,
                        "DB missed UTXO for input"
                    );
                    metrics::increment_utxo_misses("missing");
                    warnings.push(ReconcileWarning::MissingUtxo { txid: id.clone(), n: *n });
                }
                UtxoLookup::Corrupt(parse_error) => {
                    error!(
                        txid = %tx.txid,
                        key = %utxo_key(id, *n),
                        error = %parse_error,
                        "Error parsing stored UTXO"
                    );
                    metrics::increment_utxo_misses("corrupt");
                    warnings.push(ReconcileWarning::CorruptUtxo {
                        txid: id.clone(),
                        n: *n,
                        error: parse_error,
                    });
                }
            },
        }
    }

    Ok(Reconciled::new(group_by_addr(result), warnings))
}
