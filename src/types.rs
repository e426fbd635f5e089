use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{LedgerError, Result};

/// Ledger key of the issuance pseudo-account
pub const COINBASE_ADDR: &str = "coinbase";

// ========== Node RPC Shapes ==========

/// Transaction as returned by the node's verbose `getrawtransaction`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub txid: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub vin: Vec<RawTxIn>,
    #[serde(default)]
    pub vout: Vec<RawTxOut>,
}

/// Either a coinbase input (`coinbase` set) or a spend of `txid:vout`.
/// Anything else the node reports for an input is ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RawTxIn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    /// Kept loose: only a JSON number counts as an output index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawTxOut {
    pub value: Amount,
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pubkey: RawScriptPubKey,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RawScriptPubKey {
    #[serde(rename = "type", default)]
    pub script_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
    /// Single-address form emitted by newer nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Coin amount as the node reports it: a JSON number or a decimal string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

// ========== Normalized Shapes ==========

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef {
    /// Newly issued value; its amount is resolved from the outputs
    Coinbase,
    /// Spend of output `n` of transaction `id`
    Spend { id: String, n: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputKind {
    Standard(String),
    NonStandard,
    NullData,
}

impl OutputKind {
    pub fn from_script_type(script_type: &str) -> Self {
        match script_type {
            "nonstandard" => OutputKind::NonStandard,
            "nulldata" => OutputKind::NullData,
            other => OutputKind::Standard(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OutputKind::Standard(t) => t,
            OutputKind::NonStandard => "nonstandard",
            OutputKind::NullData => "nulldata",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEntry {
    /// Minimal units
    pub val: i64,
    pub n: u32,
    /// First address named by the script, if any
    pub addr: Option<String>,
    pub kind: OutputKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTransaction {
    pub txid: String,
    pub time: i64,
    pub vin: Vec<InputRef>,
    pub vout: Vec<OutputEntry>,
}

/// Value attributed to one address
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AddrValue {
    pub addr: String,
    pub val: i64,
}

impl AddrValue {
    pub fn new(addr: impl Into<String>, val: i64) -> Self {
        Self { addr: addr.into(), val }
    }

    pub fn is_coinbase(&self) -> bool {
        self.addr == COINBASE_ADDR
    }
}

// ========== Persisted Records ==========

/// Unspent output as stored under `utxo:{txid}:{n}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UtxoRecord {
    pub addr: String,
    pub val: i64,
    pub txid: String,
    pub height: i64,
    pub n: u32,
    pub time: i64,
}

impl UtxoRecord {
    /// `"{txid}:{n}"` as kept in the owner's spend index
    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.txid, self.n)
    }
}

/// Running totals stored under `addr:{addr}`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressLedger {
    pub sent: i64,
    pub received: i64,
    pub staked: i64,
    pub balance: i64,
}

impl AddressLedger {
    /// Totals with `balance = received + staked - sent`; fails on overflow.
    pub fn new(sent: i64, received: i64, staked: i64) -> Result<Self> {
        let balance = received
            .checked_add(staked)
            .and_then(|credited| credited.checked_sub(sent))
            .ok_or_else(|| {
                LedgerError::store(format!(
                    "balance overflow: received {} staked {} sent {}",
                    received, staked, sent
                ))
            })?;
        Ok(Self {
            sent,
            received,
            staked,
            balance,
        })
    }
}

/// Which counter and history index a ledger delta lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEntryKind {
    /// Input side
    Sent,
    /// Output side, ordinary payment
    Received,
    /// Output side, coinstake reward
    Staked,
}

impl LedgerEntryKind {
    /// Staking only ever applies to the output side.
    pub fn for_output(is_staked: bool) -> Self {
        if is_staked {
            LedgerEntryKind::Staked
        } else {
            LedgerEntryKind::Received
        }
    }
}

// ========== Reconciliation Results ==========

/// Input that could not be resolved against the UTXO set. The transaction's
/// accounting is incomplete for that input; processing of the rest goes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileWarning {
    /// No UTXO record for the referenced output
    MissingUtxo { txid: String, n: u32 },
    /// UTXO record present but its payload does not parse
    CorruptUtxo { txid: String, n: u32, error: String },
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReconcileWarning::MissingUtxo { txid, n } => write!(f, "missing utxo {}:{}", txid, n),
            ReconcileWarning::CorruptUtxo { txid, n, error } => {
                write!(f, "unparsable utxo {}:{}: {}", txid, n, error)
            }
        }
    }
}

/// A reconciliation result plus the inputs it had to skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled<T> {
    pub value: T,
    pub warnings: Vec<ReconcileWarning>,
}

impl<T> Reconciled<T> {
    pub fn new(value: T, warnings: Vec<ReconcileWarning>) -> Self {
        Self { value, warnings }
    }

    /// True when every input was resolved
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_kind_mapping() {
        assert_eq!(OutputKind::from_script_type("nonstandard"), OutputKind::NonStandard);
        assert_eq!(OutputKind::from_script_type("nulldata"), OutputKind::NullData);
        assert_eq!(
            OutputKind::from_script_type("pubkeyhash"),
            OutputKind::Standard("pubkeyhash".to_string())
        );
        assert_eq!(OutputKind::from_script_type("coldstake").as_str(), "coldstake");
    }

    #[test]
    fn test_ledger_balance_derived() {
        let ledger = AddressLedger::new(30, 100, 20).unwrap();
        assert_eq!(ledger.balance, 90);
        assert_eq!(AddressLedger::default().balance, 0);
    }

    #[test]
    fn test_ledger_balance_overflow_is_error() {
        assert!(AddressLedger::new(0, i64::MAX, 1).is_err());
        assert!(AddressLedger::new(1, i64::MIN, 0).is_err());
        assert_eq!(AddressLedger::new(i64::MAX, i64::MAX, 0).unwrap().balance, 0);
    }

    #[test]
    fn test_raw_transaction_from_rpc_json() {
        let json = r#"{
            "txid": "aa11",
            "time": 1600000000,
            "vin": [
                {"coinbase": "03a0860104", "sequence": 4294967295},
                {"txid": "bb22", "vout": 1, "scriptSig": {"asm": "", "hex": ""}}
            ],
            "vout": [
                {"value": 12.5, "n": 0, "scriptPubKey": {"type": "pubkeyhash", "addresses": ["DAddr1"]}},
                {"value": "0.001", "n": 1, "scriptPubKey": {"type": "nulldata"}}
            ]
        }"#;
        let tx: RawTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.vin.len(), 2);
        assert_eq!(tx.vin[0].coinbase.as_deref(), Some("03a0860104"));
        assert_eq!(tx.vin[1].vout, Some(serde_json::json!(1)));
        assert_eq!(tx.vout[0].value, Amount::Number(12.5));
        assert_eq!(tx.vout[1].value, Amount::Text("0.001".to_string()));
        assert_eq!(tx.vout[1].script_pubkey.addresses, None);
    }

    #[test]
    fn test_utxo_outpoint() {
        let utxo = UtxoRecord {
            addr: "X".into(),
            val: 40,
            txid: "abc".into(),
            height: 10,
            n: 3,
            time: 0,
        };
        assert_eq!(utxo.outpoint(), "abc:3");
    }
}
