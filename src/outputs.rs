/// Output Reconciliation
///
/// Resolves which addresses value flowed into, creates the new UTXOs and
/// detects coinstake transactions.
///
/// An output is credited when its script type counts (see `classify`) and
/// it names an address. With `should_update` each credited output writes
/// its UTXO record and appends to the receiver's spend index in one atomic
/// batch.
///
/// Coinstake shape (PoS): the first output is the empty `nonstandard`
/// marker and the staker re-receives its own input. The staker's input is
/// netted against its output so only the reward is credited, and that input
/// no longer counts as sent.

use tracing::debug;
use crate::classify::{group_by_addr, has_valid_outs};
use crate::error::Result;
use crate::keys::{addr_utxo_key, outpoint_ref, utxo_key, UTXO_JSON_FIELD};
use crate::metrics;
use crate::store::{BatchOp, KvStore};
use crate::telemetry::truncate_hex;
use crate::types::{AddrValue, NormalizedTransaction, OutputKind, UtxoRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputsResult {
    /// Credits per address, net of the stake for a coinstake
    pub vout: Vec<AddrValue>,
    /// Debits that remain after the stake input is consumed
    pub nvin: Vec<AddrValue>,
    pub staked: bool,
}

/// Batch that creates a UTXO and indexes it under its owner.
///
/// Keyed strictly on `(txid, n)`: the hash write overwrites and the index
/// reference is removed before it is appended, so replaying a transaction
/// leaves a single entry.
pub(crate) fn utxo_create_ops(record: &UtxoRecord) -> Result<Vec<BatchOp>> {
    let json = serde_json::to_string(record)?;
    let fields = vec![
        ("addr".to_string(), record.addr.clone()),
        ("val".to_string(), record.val.to_string()),
        ("txid".to_string(), record.txid.clone()),
        ("height".to_string(), record.height.to_string()),
        ("n".to_string(), record.n.to_string()),
        ("time".to_string(), record.time.to_string()),
        (UTXO_JSON_FIELD.to_string(), json),
    ];
    let index_key = addr_utxo_key(&record.addr);
    let reference = outpoint_ref(&record.txid, record.n);

    Ok(vec![
        BatchOp::hset(utxo_key(&record.txid, record.n), fields),
        BatchOp::lrem(index_key.clone(), reference.clone()),
        BatchOp::rpush(index_key, reference),
    ])
}

/// Net the staker's input against its re-output.
///
/// Applies when the transaction's first output is `nonstandard`, both sides
/// are non-empty and the first input and first output share an address.
/// Returns whether the transaction is a coinstake.
pub fn detect_coinstake(
    tx: &NormalizedTransaction,
    vout: &mut [AddrValue],
    nvin: &mut Vec<AddrValue>,
) -> bool {
    let marker = matches!(tx.vout.first().map(|o| &o.kind), Some(OutputKind::NonStandard));
    if !marker || vout.is_empty() || nvin.is_empty() || nvin[0].addr != vout[0].addr {
        return false;
    }

    let stake = nvin.remove(0);
    vout[0].val -= stake.val;
    true
}

pub async fn process_outs<S: KvStore + ?Sized>(
    store: &S,
    tx: &NormalizedTransaction,
    vin: &[AddrValue],
    height: i64,
    should_update: bool,
) -> Result<OutputsResult> {
    let mut credited: Vec<AddrValue> = Vec::with_capacity(tx.vout.len());

    for out in &tx.vout {
        let addr = match (&out.addr, has_valid_outs(out)) {
            (Some(addr), true) => addr,
            _ => continue,
        };

        if should_update {
            let record = UtxoRecord {
                addr: addr.clone(),
                val: out.val,
                txid: tx.txid.clone(),
                height,
                n: out.n,
                time: tx.time,
            };
            store.exec(utxo_create_ops(&record)?).await?;
            metrics::UTXOS_ADDED.inc();
        }
        credited.push(AddrValue::new(addr.clone(), out.val));
    }

    let mut vout = group_by_addr(credited);
    let mut nvin = vin.to_vec();
    let staked = detect_coinstake(tx, &mut vout, &mut nvin);

    if staked {
        metrics::COINSTAKES.inc();
        debug!(
            txid = %truncate_hex(&tx.txid, 16),
            staker = %vout[0].addr,
            reward = vout[0].val,
            "Coinstake detected"
        );
    }

    Ok(OutputsResult { vout, nvin, staked })
}
