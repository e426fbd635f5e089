//! UTXO and address-ledger reconciliation for proof-of-stake UTXO chains.
//!
//! One raw transaction at a time: consume the UTXOs its inputs reference,
//! create the ones its outputs fund, detect coinstakes and fold the
//! per-address deltas into running `sent / received / staked` totals.

pub mod atomic_writer;
pub mod classify;
pub mod config;
pub mod error;
pub mod inputs;
pub mod keys;
pub mod ledger;
pub mod metrics;
pub mod normalize;
pub mod outputs;
pub mod processor;
pub mod satoshi;
pub mod store;
pub mod telemetry;
pub mod types;


pub use error::{LedgerError, Result};
pub use ledger::{update_address, AddressDelta, LedgerUpdate};
pub use processor::{AddressLocks, ProcessedTx, TxProcessor};
pub use store::{BatchOp, KvStore, MemoryStore, RocksStore};
pub use types::{
    AddrValue, AddressLedger, LedgerEntryKind, NormalizedTransaction, RawTransaction,
    ReconcileWarning, Reconciled, UtxoRecord,
};
