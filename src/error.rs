/// Ledger Error Taxonomy
///
/// Errors that surface to the caller. A referenced UTXO that is missing or
/// unreadable is NOT an error here: the reconcilers absorb it and report a
/// `ReconcileWarning` alongside their result instead.

use std::fmt;

#[derive(Debug)]
pub enum LedgerError {
    /// Amount could not be converted to minimal units
    InvalidAmount(String),
    /// Store rejected or could not serve an operation
    Store(String),
    Rocks(rocksdb::Error),
    Serialization(String),
    Join(tokio::task::JoinError),
    Config(config::ConfigError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub fn store(message: impl Into<String>) -> Self {
        LedgerError::Store(message.into())
    }

    /// True for failures of the backing store itself (connectivity, IO).
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, LedgerError::Store(_) | LedgerError::Rocks(_) | LedgerError::Join(_))
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerError::InvalidAmount(s) => write!(f, "Invalid amount: {}", s),
            LedgerError::Store(s) => write!(f, "Store error: {}", s),
            LedgerError::Rocks(e) => write!(f, "RocksDB error: {}", e),
            LedgerError::Serialization(s) => write!(f, "Serialization error: {}", s),
            LedgerError::Join(e) => write!(f, "Task join error: {}", e),
            LedgerError::Config(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Rocks(e) => Some(e),
            LedgerError::Join(e) => Some(e),
            LedgerError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        LedgerError::Rocks(e)
    }
}

impl From<tokio::task::JoinError> for LedgerError {
    fn from(e: tokio::task::JoinError) -> Self {
        LedgerError::Join(e)
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(e: config::ConfigError) -> Self {
        LedgerError::Config(e)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(e: bincode::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}
