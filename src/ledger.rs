/// Address Ledger Updates
///
/// Applies one address's delta to its running totals under `addr:{addr}`:
/// - `Sent`     -> `sent += val`,     txid appended to `addr.sent:{addr}`
/// - `Received` -> `received += val`, txid appended to `addr.received:{addr}`
/// - `Staked`   -> `staked += val`,   txid appended to `addr.staked:{addr}`
///
/// `balance` is rewritten as `received + staked - sent` with every update.
/// The `coinbase` pseudo-account only tracks cumulative issuance in `sent`.
///
/// The update is read-modify-write and NOT safe to run concurrently for the
/// same address. Callers serialize per address (see `processor::AddressLocks`).

use tracing::{debug, warn};
use crate::error::{LedgerError, Result};
use crate::inputs::{lookup_utxo, UtxoLookup};
use crate::keys::{
    addr_history_key, addr_key, addr_utxo_key, parse_outpoint_ref, COINBASE_KEY, FIELD_BALANCE,
    FIELD_RECEIVED, FIELD_SENT, FIELD_STAKED,
};
use crate::metrics;
use crate::satoshi::format_amount;
use crate::store::{BatchOp, KvStore};
use crate::types::{AddressLedger, LedgerEntryKind, UtxoRecord, COINBASE_ADDR};

/// One address's share of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDelta {
    pub addr: String,
    pub val: i64,
    pub kind: LedgerEntryKind,
    pub txid: String,
}

impl AddressDelta {
    pub fn new(addr: impl Into<String>, val: i64, kind: LedgerEntryKind, txid: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            val,
            kind,
            txid: txid.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerUpdate {
    /// New cumulative issuance
    Coinbase { sent: i64 },
    /// New totals of a real address, with the applied value
    Address { addr: String, record: AddressLedger, val: i64 },
}

impl LedgerUpdate {
    pub fn val(&self) -> Option<i64> {
        match self {
            LedgerUpdate::Coinbase { .. } => None,
            LedgerUpdate::Address { val, .. } => Some(*val),
        }
    }
}

fn parse_counter(addr: &str, field: &str, raw: Option<&String>) -> i64 {
    match raw {
        None => 0,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(addr = %addr, field = field, value = %raw, "Unparsable ledger counter, using 0");
            0
        }),
    }
}

/// Current totals of `addr`; zeros when it has no record yet.
pub async fn read_ledger<S: KvStore + ?Sized>(store: &S, addr: &str) -> Result<AddressLedger> {
    let values = store
        .hmget(&addr_key(addr), &[FIELD_SENT, FIELD_RECEIVED, FIELD_STAKED])
        .await?;
    AddressLedger::new(
        parse_counter(addr, FIELD_SENT, values[0].as_ref()),
        parse_counter(addr, FIELD_RECEIVED, values[1].as_ref()),
        parse_counter(addr, FIELD_STAKED, values[2].as_ref()),
    )
}

fn add_counter(addr: &str, field: &str, current: i64, val: i64) -> Result<i64> {
    current.checked_add(val).ok_or_else(|| {
        LedgerError::store(format!("{} field {} overflow: {} + {}", addr_key(addr), field, current, val))
    })
}

/// Cumulative issuance recorded on the `coinbase` pseudo-account.
pub async fn read_coinbase_issuance<S: KvStore + ?Sized>(store: &S) -> Result<i64> {
    let raw = store.hget(COINBASE_KEY, FIELD_SENT).await?;
    Ok(parse_counter(COINBASE_ADDR, FIELD_SENT, raw.as_ref()))
}

/// Transaction ids recorded for `addr` in the history of `kind`.
pub async fn address_history<S: KvStore + ?Sized>(
    store: &S,
    addr: &str,
    kind: LedgerEntryKind,
) -> Result<Vec<String>> {
    store.lrange(&addr_history_key(kind, addr)).await
}

/// Unspent outputs of `addr`, in spend-index order.
///
/// Index entries that do not parse or whose record is gone are skipped.
pub async fn address_utxos<S: KvStore + ?Sized>(store: &S, addr: &str) -> Result<Vec<UtxoRecord>> {
    let mut utxos = Vec::new();
    for reference in store.lrange(&addr_utxo_key(addr)).await? {
        let (txid, n) = match parse_outpoint_ref(&reference) {
            Some(outpoint) => outpoint,
            None => {
                warn!(addr = %addr, reference = %reference, "Malformed spend-index entry");
                continue;
            }
        };
        match lookup_utxo(store, txid, n).await? {
            UtxoLookup::Found(utxo) => utxos.push(utxo),
            other => warn!(addr = %addr, reference = %reference, lookup = ?other, "Spend-index entry without UTXO"),
        }
    }
    Ok(utxos)
}

/// Apply one delta and return the resulting totals.
pub async fn update_address<S: KvStore + ?Sized>(store: &S, delta: &AddressDelta) -> Result<LedgerUpdate> {
    if delta.addr == COINBASE_ADDR {
        let sent = store.hincrby(COINBASE_KEY, FIELD_SENT, delta.val).await?;
        metrics::increment_ledger_updates("coinbase");
        debug!(issued = %format_amount(delta.val), total = %format_amount(sent), "Coinbase issuance");
        return Ok(LedgerUpdate::Coinbase { sent });
    }

    let current = read_ledger(store, &delta.addr).await?;
    let (mut sent, mut received, mut staked) = (current.sent, current.received, current.staked);

    let kind_label = match delta.kind {
        LedgerEntryKind::Sent => {
            sent = add_counter(&delta.addr, FIELD_SENT, sent, delta.val)?;
            "sent"
        }
        LedgerEntryKind::Received => {
            received = add_counter(&delta.addr, FIELD_RECEIVED, received, delta.val)?;
            "received"
        }
        LedgerEntryKind::Staked => {
            staked = add_counter(&delta.addr, FIELD_STAKED, staked, delta.val)?;
            "staked"
        }
    };
    let record = AddressLedger::new(sent, received, staked)?;

    store
        .exec(vec![
            BatchOp::hset(
                addr_key(&delta.addr),
                vec![
                    (FIELD_SENT.to_string(), record.sent.to_string()),
                    (FIELD_RECEIVED.to_string(), record.received.to_string()),
                    (FIELD_STAKED.to_string(), record.staked.to_string()),
                    (FIELD_BALANCE.to_string(), record.balance.to_string()),
                ],
            ),
            BatchOp::rpush(addr_history_key(delta.kind, &delta.addr), delta.txid.clone()),
        ])
        .await?;

    metrics::increment_ledger_updates(kind_label);
    debug!(
        addr = %delta.addr,
        kind = kind_label,
        val = %format_amount(delta.val),
        balance = %format_amount(record.balance),
        "Ledger updated"
    );

    Ok(LedgerUpdate::Address {
        addr: delta.addr.clone(),
        record,
        val: delta.val,
    })
}
