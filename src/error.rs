//! # Error Handling
//!
//! Two layers of errors flow through the gateway:
//!
//! - [`ModbusError`] describes everything that can go wrong while a Modbus
//!   transaction is in flight: transport I/O, timeouts, framing, checksum and
//!   response validation failures, and exception responses returned by the
//!   device itself.
//! - [`CallError`] is what a caller of [`crate::Service::call`] sees. It either
//!   rejects the call up front (`InvalidParams`, `MethodNotFound`) or wraps the
//!   transaction's [`ModbusError`] unchanged.
//!
//! ## Mapping to JSON-RPC
//!
//! ```rust
//! use voltage_modbus_rpc::CallError;
//!
//! let err = CallError::method_not_found("modbus-bogus");
//! let object = err.to_error_object();
//! assert_eq!(object.code, -32601);
//! assert_eq!(object.data.unwrap()["method"], "modbus-bogus");
//! ```
//!
//! ## Error Classification
//!
//! ```rust
//! use voltage_modbus_rpc::ModbusError;
//!
//! fn classify_error(error: &ModbusError) {
//!     if error.is_transport_error() {
//!         println!("Network/transport issue: {}", error);
//!     } else if error.is_recoverable() {
//!         println!("Device busy, may retry: {}", error);
//!     } else {
//!         println!("Other issue: {}", error);
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// JSON-RPC error code for invalid method parameters
pub const INVALID_PARAMS_CODE: i32 = -32602;

/// JSON-RPC error code for unknown methods
pub const METHOD_NOT_FOUND_CODE: i32 = -32601;

/// JSON-RPC server error code used for failed Modbus transactions
pub const TRANSACTION_ERROR_CODE: i32 = -32000;

/// Modbus transaction error types
///
/// Covers every failure a single request/response exchange can produce, from
/// transport-level issues to protocol violations reported by the device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// I/O related errors (network, serial)
    ///
    /// # Examples
    /// - TCP connection reset
    /// - Serial port read failure
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment and maintenance errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation exceeded its configured timeout
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// General protocol violations
    ///
    /// # Examples
    /// - Response function code differs from the request
    /// - MBAP transaction or unit identifier mismatch
    /// - Response slave ID mismatch
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Request or response data outside protocol limits
    ///
    /// # Examples
    /// - Reading 200 holding registers (max 125)
    /// - Coil value other than 0x0000 or 0xFF00
    /// - Echoed address or quantity differs from the request
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// CRC validation failure on an RTU frame
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Exception response returned by the device
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Slave Device Failure
    /// - 0x05: Acknowledge
    /// - 0x06: Slave Device Busy
    /// - 0x08: Memory Parity Error
    /// - 0x0A: Gateway Path Unavailable
    /// - 0x0B: Gateway Target Device Failed to Respond
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Frame format violations (length, start/end markers, LRC)
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Gateway configuration issues
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a CRC mismatch error
    ///
    /// # Arguments
    ///
    /// * `expected` - CRC calculated over the received frame
    /// * `actual` - CRC carried by the received frame
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a Modbus exception error
    ///
    /// Standard exception codes are mapped to human-readable messages.
    ///
    /// # Arguments
    ///
    /// * `function` - Original function code that caused the exception
    /// * `code` - Modbus exception code
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception { function, code, message }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if the error is recoverable (a caller may retry)
    ///
    /// The gateway itself never retries; this is exposed for the RPC layer.
    ///
    /// ```rust
    /// use voltage_modbus_rpc::ModbusError;
    ///
    /// assert!(ModbusError::timeout("read response", 5000).is_recoverable());
    /// assert!(!ModbusError::exception(0x03, 0x02).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            // Acknowledge, Busy
            Self::Exception { code, .. } => matches!(code, 0x05 | 0x06),
            _ => false,
        }
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}

/// Errors returned by [`crate::Service::call`]
///
/// `InvalidParams` and `MethodNotFound` are always raised before any
/// transaction is attempted. `Modbus` carries the transaction's own error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// Malformed, missing, out-of-range or wrong-typed parameter
    ///
    /// `value` is only set for rejected coil states.
    #[error("Invalid params: {msg}")]
    InvalidParams { msg: String, value: Option<i64> },

    /// Unrecognized method name
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    /// Failure of the underlying Modbus transaction
    #[error(transparent)]
    Modbus(#[from] ModbusError),
}

impl CallError {
    /// Create an invalid params error with a message
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParams {
            msg: msg.into(),
            value: None,
        }
    }

    /// Create an invalid params error that also reports the offending value
    pub fn invalid_value<S: Into<String>>(msg: S, value: i64) -> Self {
        Self::InvalidParams {
            msg: msg.into(),
            value: Some(value),
        }
    }

    /// Create a method not found error
    pub fn method_not_found<S: Into<String>>(method: S) -> Self {
        Self::MethodNotFound { method: method.into() }
    }

    /// JSON-RPC error code for this error
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS_CODE,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND_CODE,
            Self::Modbus(_) => TRANSACTION_ERROR_CODE,
        }
    }

    /// Structured auxiliary data attached to the error
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::InvalidParams { msg, value: None } => Some(json!({ "msg": msg })),
            Self::InvalidParams { msg, value: Some(v) } => Some(json!({ "msg": msg, "v": v })),
            Self::MethodNotFound { method } => Some(json!({ "method": method })),
            Self::Modbus(_) => None,
        }
    }

    /// Build the JSON-RPC error object handed back to the RPC layer
    pub fn to_error_object(&self) -> ErrorObject {
        let message = match self {
            Self::InvalidParams { .. } => "Invalid params".to_string(),
            Self::MethodNotFound { .. } => "Method not found".to_string(),
            Self::Modbus(err) => err.to_string(),
        };

        ErrorObject {
            code: self.code(),
            message,
            data: self.data(),
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
