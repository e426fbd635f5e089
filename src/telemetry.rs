/// Telemetry Module - Structured Logging with Tracing
///
/// - `RUST_LOG` overrides the configured level
/// - JSON or pretty output
/// - Optional file output with daily / hourly / no rotation

use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tracing_appender::rolling;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub log_level: String,
    /// Log format: "json" or "pretty"
    pub log_format: String,
    /// Optional log file path (None = console only)
    pub log_file: Option<String>,
    /// Rotation interval: "daily", "hourly", "never"
    pub rotation: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: std::env::var("RUSTYLEDGER_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            log_file: std::env::var("RUSTYLEDGER_LOG_FILE").ok(),
            rotation: "daily".to_string(),
        }
    }
}

fn file_appender(log_file_path: &str, rotation: &str) -> Result<rolling::RollingFileAppender, Box<dyn std::error::Error>> {
    let path = Path::new(log_file_path);
    let directory = path.parent()
        .ok_or("Invalid log file path: no parent directory")?;
    let file_name = path.file_name()
        .ok_or("Invalid log file path: no filename")?;
    let filename_prefix = path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or("Invalid log file path: no filename")?;

    Ok(match rotation {
        "hourly" => rolling::hourly(directory, filename_prefix),
        "never" => rolling::never(directory, file_name),
        _ => rolling::daily(directory, filename_prefix),
    })
}

/// Install the global tracing subscriber. Fails if one is already set.
pub fn init_tracing(config: TelemetryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let json = config.log_format == "json";

    if let Some(log_file_path) = config.log_file {
        let (non_blocking, guard) = tracing_appender::non_blocking(
            file_appender(&log_file_path, &config.rotation)?
        );

        if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_writer(non_blocking)
                )
                .try_init()?;
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(true)
                        .with_line_number(true)
                        .with_writer(non_blocking)
                )
                .try_init()?;
        }

        // Writer thread must outlive the process' logging
        std::mem::forget(guard);
    } else if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(true)
                    .with_line_number(true)
            )
            .try_init()?;
    }

    Ok(())
}

/// Truncate hex string for logging
///
/// Example: "0a1b2c3d4e5f67890a1b2c3d4e5f6789" -> "0a1b2c3d4e5f6789..."
pub fn truncate_hex(hex: &str, len: usize) -> String {
    match hex.get(..len) {
        Some(prefix) if hex.len() > len => format!("{}...", prefix),
        _ => hex.to_string(),
    }
}
