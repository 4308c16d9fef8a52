//! Gateway configuration
//!
//! A YAML document selects the framing and the link the gateway talks over:
//!
//! ```yaml
//! framing: rtu
//! address: /dev/ttyUSB0
//! baud_rate: 9600
//! parity: E
//! timeout_ms: 1000
//! packet_logging: true
//! log_level: debug
//! ```
//!
//! Missing keys take their defaults, which describe a Modbus TCP device on
//! `127.0.0.1:502`.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ModbusError, ModbusResult};
use crate::logging::LogLevel;
use crate::packager::{Framing, PackagerFn};
use crate::transport::{SerialSettings, SerialTransporter, TcpTransporter, Transporter};
use crate::{DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS};

/// Serial parity as written in configuration (`N`, `E` or `O`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Parity {
    #[default]
    #[serde(rename = "N", alias = "none")]
    None,
    #[serde(rename = "E", alias = "even")]
    Even,
    #[serde(rename = "O", alias = "odd")]
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub framing: Framing,
    /// `host:port` for TCP, device path for serial framings
    pub address: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub timeout_ms: u64,
    pub packet_logging: bool,
    pub log_level: LogLevel,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Tcp,
            address: format!("127.0.0.1:{}", DEFAULT_TCP_PORT),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            packet_logging: false,
            log_level: LogLevel::Info,
        }
    }
}

impl GatewayConfig {
    /// Parse a configuration from YAML text
    pub fn from_yaml_str(text: &str) -> ModbusResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read and parse a YAML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check that the settings describe a usable link
    pub fn validate(&self) -> ModbusResult<()> {
        if self.timeout_ms == 0 {
            return Err(ModbusError::configuration("timeout_ms must be greater than 0"));
        }

        if self.address.trim().is_empty() {
            return Err(ModbusError::configuration("address must not be empty"));
        }

        match self.framing {
            Framing::Tcp => {
                self.address.parse::<SocketAddr>().map_err(|e| {
                    ModbusError::configuration(format!("Invalid address '{}': {}", self.address, e))
                })?;
            }
            Framing::Rtu | Framing::Ascii => {
                if self.baud_rate == 0 {
                    return Err(ModbusError::configuration("baud_rate must be greater than 0"));
                }
                self.serial_data_bits()?;
                self.serial_stop_bits()?;
            }
        }

        Ok(())
    }

    /// Build the packager factory for the configured framing
    pub fn packager_fn(&self) -> PackagerFn {
        self.framing.packager_fn()
    }

    /// Build the transporter for the configured link
    ///
    /// TCP connects lazily on first send; serial ports are opened here.
    pub async fn connect(&self) -> ModbusResult<Arc<dyn Transporter>> {
        match self.framing {
            Framing::Tcp => {
                info!(address = %self.address, "using Modbus TCP transport");
                let transporter = TcpTransporter::new(self.address.as_str(), self.timeout())
                    .with_packet_logging(self.packet_logging);
                Ok(Arc::new(transporter))
            }
            Framing::Rtu | Framing::Ascii => {
                info!(
                    port = %self.address,
                    baud_rate = self.baud_rate,
                    framing = %self.framing,
                    "opening serial transport"
                );
                let transporter = SerialTransporter::new(self.framing, self.serial_settings()?)?
                    .with_packet_logging(self.packet_logging);
                Ok(Arc::new(transporter))
            }
        }
    }

    /// Serial line settings derived from this configuration
    pub fn serial_settings(&self) -> ModbusResult<SerialSettings> {
        let mut settings = SerialSettings::new(self.address.as_str(), self.baud_rate);
        settings.data_bits = self.serial_data_bits()?;
        settings.stop_bits = self.serial_stop_bits()?;
        settings.parity = self.parity.into();
        settings.timeout = self.timeout();
        Ok(settings)
    }

    fn serial_data_bits(&self) -> ModbusResult<tokio_serial::DataBits> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(ModbusError::configuration(format!("Unsupported data_bits: {}", other))),
        }
    }

    fn serial_stop_bits(&self) -> ModbusResult<tokio_serial::StopBits> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(ModbusError::configuration(format!("Unsupported stop_bits: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.framing, Framing::Tcp);
        assert_eq!(config.address, "127.0.0.1:502");
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serial_config() {
        let config = GatewayConfig::from_yaml_str(
            "framing: rtu\naddress: /dev/ttyUSB0\nbaud_rate: 19200\nparity: E\nstop_bits: 2\nlog_level: debug\n",
        )
        .unwrap();

        assert_eq!(config.framing, Framing::Rtu);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.validate().is_ok());

        let settings = config.serial_settings().unwrap();
        assert_eq!(settings.port, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.parity, tokio_serial::Parity::Even);
        assert_eq!(settings.stop_bits, tokio_serial::StopBits::Two);
        assert_eq!(settings.data_bits, tokio_serial::DataBits::Eight);
    }

    #[test]
    fn test_parity_aliases() {
        let config = GatewayConfig::from_yaml_str("parity: odd").unwrap();
        assert_eq!(config.parity, Parity::Odd);
        assert!(GatewayConfig::from_yaml_str("parity: X").is_err());
    }

    #[test]
    fn test_validation_errors() {
        let config = GatewayConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ModbusError::Configuration { .. })));

        let config = GatewayConfig {
            address: "not an address".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = GatewayConfig {
            framing: Framing::Ascii,
            address: "/dev/ttyS0".to_string(),
            data_bits: 9,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = GatewayConfig {
            framing: Framing::Rtu,
            address: "/dev/ttyS0".to_string(),
            baud_rate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_framing_rejected() {
        let err = GatewayConfig::from_yaml_str("framing: udp").unwrap_err();
        assert!(matches!(err, ModbusError::Configuration { .. }));
    }

    #[test]
    fn test_framing_case_insensitive() {
        let config = GatewayConfig::from_yaml_str("framing: TCP").unwrap();
        assert_eq!(config.framing, Framing::Tcp);
        let config = GatewayConfig::from_yaml_str("framing: Rtu\naddress: /dev/ttyUSB0").unwrap();
        assert_eq!(config.framing, Framing::Rtu);
    }

    #[tokio::test]
    async fn test_tcp_connect_is_lazy() {
        let config = GatewayConfig {
            address: "127.0.0.1:1".to_string(),
            ..Default::default()
        };
        assert!(config.connect().await.is_ok());
    }
}
