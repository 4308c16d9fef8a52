//! # Voltage Modbus RPC - JSON-RPC to Modbus master gateway core
//!
//! Translates named JSON-RPC style method calls into Modbus master
//! transactions against a field device, and decodes the device's response into
//! a JSON-friendly result.
//!
//! ## Methods
//!
//! | Method | Function | Params |
//! |--------|----------|--------|
//! | `modbus-read-coil` | 0x01 Read Coils | address, quantity, slave_id? |
//! | `modbus-read-discrete` | 0x02 Read Discrete Inputs | address, quantity, slave_id? |
//! | `modbus-read-holding` | 0x03 Read Holding Registers | address, quantity, slave_id? |
//! | `modbus-read-input` | 0x04 Read Input Registers | address, quantity, slave_id? |
//! | `modbus-write-coil` | 0x05 Write Single Coil | address, value (0/1), slave_id? |
//! | `modbus-write-register` | 0x06 Write Single Register | address, value, slave_id? |
//! | `modbus-write-multiple-coils` | 0x0F Write Multiple Coils | address, quantity, value (base64), slave_id? |
//! | `modbus-write-multiple-registers` | 0x10 Write Multiple Registers | address, quantity, value (base64), slave_id? |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use voltage_modbus_rpc::{Call, GatewayConfig, Service};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::from_yaml_str("framing: tcp\naddress: 127.0.0.1:502\n")?;
//!     let service = Service::from_config(&config).await?;
//!
//!     let call: Call = serde_json::from_value(json!({
//!         "method": "modbus-write-coil",
//!         "params": { "address": 16, "value": 1, "slave_id": 1 }
//!     }))?;
//!
//!     match service.call(&call).await {
//!         Ok(result) => println!("{}", serde_json::to_string(&result)?),
//!         Err(err) => println!("{}", serde_json::to_string(&err.to_error_object())?),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    RPC layer    │  Call { method, params }
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │     Service     │  dispatch, params, codec
//! └─────────────────┘
//!          │  one ModbusClient per call
//! ┌─────────────────┐
//! │    Packager     │  TCP / RTU / ASCII framing
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Transporter   │  shared TCP stream or serial port
//! └─────────────────┘
//! ```

/// Core error types and JSON-RPC error mapping
pub mod error;

/// Modbus protocol definitions
pub mod protocol;

/// ADU framing for TCP, RTU and ASCII
pub mod packager;

/// Byte transport over TCP and serial lines
pub mod transport;

/// Modbus master client
pub mod client;

/// Response decoding and coil state conversion
pub mod codec;

/// Typed parameter extraction
pub mod params;

/// Method dispatch
pub mod handler;

/// Gateway configuration
pub mod config;

/// Logging setup
pub mod logging;

// Re-export main types for convenience
pub use client::{build_client, ModbusClient};
pub use codec::DecodedResult;
pub use config::GatewayConfig;
pub use error::{CallError, ErrorObject, ModbusError, ModbusResult};
pub use handler::{Call, Method, Service};
pub use logging::{init_logging, LogLevel};
pub use packager::{Framing, Packager, PackagerFn};
pub use params::Params;
pub use protocol::{FunctionCode, ProtocolDataUnit, SlaveId};
pub use transport::{SerialSettings, SerialTransporter, TcpTransporter, TransportStats, Transporter};

/// Default timeout for operations (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
