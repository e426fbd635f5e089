/// Store Key Helpers
///
/// Centralized builders for the key layout shared with external readers.
///
/// KEY FORMAT:
/// - `utxo:{txid}:{n}`        hash: addr, val, txid, height, n, time, json
/// - `addr.utxo:{addr}`       list of `"{txid}:{n}"`
/// - `addr:{addr}`            hash: sent, received, staked, balance
/// - `addr.sent:{addr}`       list of txid
/// - `addr.received:{addr}`   list of txid
/// - `addr.staked:{addr}`     list of txid
/// - `coinbase`               hash: sent

use crate::types::LedgerEntryKind;

pub const COINBASE_KEY: &str = "coinbase";

/// Hash field holding the serialized UTXO record
pub const UTXO_JSON_FIELD: &str = "json";

pub const FIELD_SENT: &str = "sent";
pub const FIELD_RECEIVED: &str = "received";
pub const FIELD_STAKED: &str = "staked";
pub const FIELD_BALANCE: &str = "balance";

/// Build the UTXO hash key for output `n` of `txid`.
pub fn utxo_key(txid: &str, n: u32) -> String {
    format!("utxo:{}:{}", txid, n)
}

/// Reference stored in an address's spend index.
pub fn outpoint_ref(txid: &str, n: u32) -> String {
    format!("{}:{}", txid, n)
}

/// Split a spend-index reference back into txid and index.
///
/// Returns None if the reference is malformed.
pub fn parse_outpoint_ref(reference: &str) -> Option<(&str, u32)> {
    let (txid, n) = reference.rsplit_once(':')?;
    if txid.is_empty() {
        return None;
    }
    Some((txid, n.parse().ok()?))
}

pub fn addr_utxo_key(addr: &str) -> String {
    format!("addr.utxo:{}", addr)
}

pub fn addr_key(addr: &str) -> String {
    format!("addr:{}", addr)
}

/// History list that a ledger delta of `kind` appends to.
pub fn addr_history_key(kind: LedgerEntryKind, addr: &str) -> String {
    match kind {
        LedgerEntryKind::Sent => format!("addr.sent:{}", addr),
        LedgerEntryKind::Received => format!("addr.received:{}", addr),
        LedgerEntryKind::Staked => format!("addr.staked:{}", addr),
    }
}
