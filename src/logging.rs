//! Logging setup and packet dumps
//!
//! The library logs through `tracing`. Binaries call [`init_logging`] once to
//! install a formatting subscriber; embedding applications may install their
//! own instead.

use serde::{Deserialize, Serialize};
use tracing::{debug, Level};

/// Log levels accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages, including packet dumps
    Debug,
    /// Everything
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Install a global fmt subscriber at the given level
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_logging(level: LogLevel) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(Level::from(level))
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Format raw bytes as hex string for packet logging
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log packet with direction and protocol label
pub fn log_packet(direction: &str, data: &[u8], protocol: &str) {
    debug!(
        "[MODBUS-{}] {} ({} bytes) {}",
        protocol,
        direction,
        data.len(),
        format_hex_packet(data)
    );
}
