/// Metrics Module - Prometheus Instrumentation
///
/// Counters for UTXO churn, store misses and ledger updates, plus flush
/// latency of the RocksDB backend. Everything lives in one registry that
/// `gather_metrics` renders in text exposition format.

use prometheus::{
    Registry, IntCounter, IntCounterVec, IntGaugeVec, Histogram, HistogramVec,
    HistogramOpts, Opts, Encoder, TextEncoder,
};
use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use std::time::Instant;

/// Standard latency buckets for histograms (seconds)
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

static INIT: OnceCell<()> = OnceCell::new();

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Transactions reconciled
    /// Labels: mode (persist, dry_run)
    pub static ref TRANSACTIONS_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("rustyledger_transactions_processed_total", "Transactions reconciled by mode"),
        &["mode"]
    ).unwrap();

    pub static ref UTXOS_ADDED: IntCounter = IntCounter::new(
        "rustyledger_utxos_added_total",
        "UTXO records created"
    ).unwrap();

    pub static ref UTXOS_SPENT: IntCounter = IntCounter::new(
        "rustyledger_utxos_spent_total",
        "UTXO records removed by spends"
    ).unwrap();

    /// Inputs whose UTXO could not be resolved
    /// Labels: reason (missing, corrupt)
    pub static ref UTXO_MISSES: IntCounterVec = IntCounterVec::new(
        Opts::new("rustyledger_utxo_misses_total", "Inputs whose UTXO could not be resolved"),
        &["reason"]
    ).unwrap();

    pub static ref COINSTAKES: IntCounter = IntCounter::new(
        "rustyledger_coinstakes_total",
        "Coinstake transactions detected"
    ).unwrap();

    /// Labels: kind (sent, received, staked, coinbase)
    pub static ref LEDGER_UPDATES: IntCounterVec = IntCounterVec::new(
        Opts::new("rustyledger_ledger_updates_total", "Ledger record updates by kind"),
        &["kind"]
    ).unwrap();

    pub static ref TX_PROCESS_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("rustyledger_tx_process_duration_seconds", "Time to reconcile one transaction")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();

    /// Labels: cf
    pub static ref STORE_FLUSH_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("rustyledger_store_flush_duration_seconds", "Atomic batch commit latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["cf"]
    ).unwrap();

    /// Labels: cf
    pub static ref STORE_BATCH_SIZE_ENTRIES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("rustyledger_store_batch_size_entries", "Operations in the last committed batch"),
        &["cf"]
    ).unwrap();

    /// Labels: operation, cf
    pub static ref STORE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("rustyledger_store_errors_total", "Store operation failures"),
        &["operation", "cf"]
    ).unwrap();
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    INIT.get_or_try_init(|| {
        REGISTRY.register(Box::new(TRANSACTIONS_PROCESSED.clone()))?;
        REGISTRY.register(Box::new(UTXOS_ADDED.clone()))?;
        REGISTRY.register(Box::new(UTXOS_SPENT.clone()))?;
        REGISTRY.register(Box::new(UTXO_MISSES.clone()))?;
        REGISTRY.register(Box::new(COINSTAKES.clone()))?;
        REGISTRY.register(Box::new(LEDGER_UPDATES.clone()))?;
        REGISTRY.register(Box::new(TX_PROCESS_DURATION.clone()))?;
        REGISTRY.register(Box::new(STORE_FLUSH_DURATION.clone()))?;
        REGISTRY.register(Box::new(STORE_BATCH_SIZE_ENTRIES.clone()))?;
        REGISTRY.register(Box::new(STORE_ERRORS.clone()))?;
        Ok(())
    })
    .map(|_| ())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn increment_transactions_processed(should_update: bool) {
    let mode = if should_update { "persist" } else { "dry_run" };
    TRANSACTIONS_PROCESSED.with_label_values(&[mode]).inc();
}

pub fn increment_utxo_misses(reason: &str) {
    UTXO_MISSES.with_label_values(&[reason]).inc();
}

pub fn increment_ledger_updates(kind: &str) {
    LEDGER_UPDATES.with_label_values(&[kind]).inc();
}

pub fn record_store_flush(cf: &str, duration_secs: f64, batch_size: usize) {
    STORE_FLUSH_DURATION.with_label_values(&[cf]).observe(duration_secs);
    STORE_BATCH_SIZE_ENTRIES.with_label_values(&[cf]).set(batch_size as i64);
}

pub fn increment_store_errors(operation: &str, cf: &str) {
    STORE_ERRORS.with_label_values(&[operation, cf]).inc();
}
