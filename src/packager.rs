//! # Framing Strategies
//!
//! Modbus TCP, RTU and ASCII share the same protocol data unit (PDU) and differ
//! only in how it is wrapped into an application data unit (ADU):
//!
//! - **TCP**: MBAP header (transaction id, protocol id, length, unit id) + PDU
//! - **RTU**: slave id + PDU + CRC-16 (little-endian)
//! - **ASCII**: `:` + hex(slave id + PDU + LRC) + CR LF
//!
//! A [`Packager`] is bound to one slave id. Packagers are produced per call by a
//! [`PackagerFn`], usually obtained from [`Framing::packager_fn`].
//!
//! ```rust
//! use voltage_modbus_rpc::packager::Framing;
//! use voltage_modbus_rpc::protocol::{FunctionCode, ProtocolDataUnit};
//!
//! let packager = (Framing::Rtu.packager_fn())(1);
//! let pdu = ProtocolDataUnit::with_words(FunctionCode::ReadHoldingRegisters, &[0, 2]);
//! let adu = packager.encode(&pdu).unwrap();
//! assert_eq!(adu, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ProtocolDataUnit, SlaveId};

/// Modbus TCP Application Protocol header size
pub const MBAP_HEADER_SIZE: usize = 6;

/// Maximum frame size for Modbus TCP (MBAP header + PDU)
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// Maximum frame size for Modbus RTU
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Maximum frame size for Modbus ASCII
pub const MAX_ASCII_FRAME_SIZE: usize = 513;

const TCP_PROTOCOL_ID: u16 = 0;
const RTU_MIN_FRAME_SIZE: usize = 4;
const ASCII_MIN_FRAME_SIZE: usize = 9;
const ASCII_START: u8 = b':';
const ASCII_END: &[u8] = b"\r\n";

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Encodes and decodes ADUs for one slave
pub trait Packager: Send + Sync {
    /// Slave id this packager addresses
    fn slave_id(&self) -> SlaveId;

    /// Wrap a request PDU into an ADU
    fn encode(&self, pdu: &ProtocolDataUnit) -> ModbusResult<Vec<u8>>;

    /// Check that a response ADU answers the given request ADU
    fn verify(&self, request: &[u8], response: &[u8]) -> ModbusResult<()>;

    /// Extract the PDU from a response ADU
    fn decode(&self, adu: &[u8]) -> ModbusResult<ProtocolDataUnit>;
}

/// Factory from slave id to framing strategy
pub type PackagerFn = Arc<dyn Fn(SlaveId) -> Box<dyn Packager> + Send + Sync>;

/// Modbus framing variant
///
/// Deserializes case-insensitively through [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Framing {
    Tcp,
    Rtu,
    Ascii,
}

impl Framing {
    /// Build the packager factory for this framing
    ///
    /// TCP packagers produced by one factory share a transaction id counter.
    pub fn packager_fn(self) -> PackagerFn {
        match self {
            Framing::Tcp => {
                let transaction_id = Arc::new(AtomicU16::new(0));
                Arc::new(move |slave_id| {
                    Box::new(TcpPackager::new(slave_id, transaction_id.clone())) as Box<dyn Packager>
                })
            }
            Framing::Rtu => Arc::new(|slave_id| Box::new(RtuPackager::new(slave_id)) as Box<dyn Packager>),
            Framing::Ascii => Arc::new(|slave_id| Box::new(AsciiPackager::new(slave_id)) as Box<dyn Packager>),
        }
    }

    /// Protocol label used in packet logs
    pub fn label(self) -> &'static str {
        match self {
            Framing::Tcp => "TCP",
            Framing::Rtu => "RTU",
            Framing::Ascii => "ASCII",
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Framing {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Framing::Tcp),
            "rtu" => Ok(Framing::Rtu),
            "ascii" => Ok(Framing::Ascii),
            other => Err(ModbusError::configuration(format!("Unknown framing: {}", other))),
        }
    }
}

impl TryFrom<String> for Framing {
    type Error = ModbusError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Modbus TCP packager
pub struct TcpPackager {
    slave_id: SlaveId,
    transaction_id: Arc<AtomicU16>,
}

impl TcpPackager {
    pub fn new(slave_id: SlaveId, transaction_id: Arc<AtomicU16>) -> Self {
        Self { slave_id, transaction_id }
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

impl Packager for TcpPackager {
    fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    fn encode(&self, pdu: &ProtocolDataUnit) -> ModbusResult<Vec<u8>> {
        // unit id + function code + data
        let length = 2 + pdu.data.len();
        if MBAP_HEADER_SIZE + length > MAX_TCP_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "length of data '{}' must not be bigger than '{}'",
                MBAP_HEADER_SIZE + length,
                MAX_TCP_FRAME_SIZE
            )));
        }

        let mut frame = BytesMut::with_capacity(MBAP_HEADER_SIZE + length);
        frame.put_u16(self.next_transaction_id());
        frame.put_u16(TCP_PROTOCOL_ID);
        frame.put_u16(length as u16);
        frame.put_u8(self.slave_id);
        frame.put_slice(&pdu.to_bytes());

        Ok(frame.to_vec())
    }

    fn verify(&self, request: &[u8], response: &[u8]) -> ModbusResult<()> {
        if request.len() <= MBAP_HEADER_SIZE || response.len() <= MBAP_HEADER_SIZE {
            return Err(ModbusError::frame("MBAP header incomplete"));
        }

        let request_tid = u16::from_be_bytes([request[0], request[1]]);
        let response_tid = u16::from_be_bytes([response[0], response[1]]);
        if request_tid != response_tid {
            return Err(ModbusError::protocol(format!(
                "response transaction id '{}' does not match request '{}'",
                response_tid, request_tid
            )));
        }

        let protocol_id = u16::from_be_bytes([response[2], response[3]]);
        if protocol_id != TCP_PROTOCOL_ID {
            return Err(ModbusError::protocol(format!(
                "response protocol id '{}' does not match request '{}'",
                protocol_id, TCP_PROTOCOL_ID
            )));
        }

        if response[6] != request[6] {
            return Err(ModbusError::protocol(format!(
                "response unit id '{}' does not match request '{}'",
                response[6], request[6]
            )));
        }

        Ok(())
    }

    fn decode(&self, adu: &[u8]) -> ModbusResult<ProtocolDataUnit> {
        if adu.len() < MBAP_HEADER_SIZE + 2 {
            return Err(ModbusError::frame("Frame too short"));
        }

        let length = u16::from_be_bytes([adu[4], adu[5]]) as usize;
        let pdu_length = adu.len() - MBAP_HEADER_SIZE;
        if length != pdu_length {
            return Err(ModbusError::frame(format!(
                "length in response header '{}' does not match pdu data length '{}'",
                length, pdu_length
            )));
        }

        ProtocolDataUnit::from_bytes(&adu[MBAP_HEADER_SIZE + 1..])
    }
}

/// Modbus RTU packager
pub struct RtuPackager {
    slave_id: SlaveId,
}

impl RtuPackager {
    pub fn new(slave_id: SlaveId) -> Self {
        Self { slave_id }
    }

    /// Calculate CRC for RTU frame
    pub fn calculate_crc(data: &[u8]) -> u16 {
        CRC_MODBUS.checksum(data)
    }
}

impl Packager for RtuPackager {
    fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    fn encode(&self, pdu: &ProtocolDataUnit) -> ModbusResult<Vec<u8>> {
        let length = pdu.data.len() + 4;
        if length > MAX_RTU_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "length of data '{}' must not be bigger than '{}'",
                length, MAX_RTU_FRAME_SIZE
            )));
        }

        let mut frame = BytesMut::with_capacity(length);
        frame.put_u8(self.slave_id);
        frame.put_slice(&pdu.to_bytes());
        let crc = Self::calculate_crc(&frame);
        // CRC is little-endian in RTU
        frame.put_u16_le(crc);

        Ok(frame.to_vec())
    }

    fn verify(&self, request: &[u8], response: &[u8]) -> ModbusResult<()> {
        if response.len() < RTU_MIN_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "response length '{}' does not meet minimum '{}'",
                response.len(),
                RTU_MIN_FRAME_SIZE
            )));
        }

        if request.first() != response.first() {
            return Err(ModbusError::protocol(format!(
                "Response slave ID mismatch: expected {}, got {}",
                request.first().copied().unwrap_or_default(),
                response[0]
            )));
        }

        Ok(())
    }

    fn decode(&self, adu: &[u8]) -> ModbusResult<ProtocolDataUnit> {
        if adu.len() < RTU_MIN_FRAME_SIZE {
            return Err(ModbusError::frame("RTU frame too short"));
        }

        let data_len = adu.len() - 2;
        let received_crc = u16::from_le_bytes([adu[data_len], adu[data_len + 1]]);
        let calculated_crc = Self::calculate_crc(&adu[..data_len]);
        if received_crc != calculated_crc {
            return Err(ModbusError::crc_mismatch(calculated_crc, received_crc));
        }

        ProtocolDataUnit::from_bytes(&adu[1..data_len])
    }
}

/// Modbus ASCII packager
///
/// ```text
/// Start -> Address -> Function -> Data -> LRC -> End
///   :        01         03       00000002   FA   \r\n
/// ```
pub struct AsciiPackager {
    slave_id: SlaveId,
}

impl AsciiPackager {
    pub fn new(slave_id: SlaveId) -> Self {
        Self { slave_id }
    }

    /// Two's complement of the byte sum
    pub fn calculate_lrc(data: &[u8]) -> u8 {
        data.iter()
            .fold(0u8, |sum, &b| sum.wrapping_add(b))
            .wrapping_neg()
    }

    /// Strip markers and hex-decode an ASCII frame into `slave || pdu || lrc`
    fn unwrap_frame(adu: &[u8]) -> ModbusResult<Vec<u8>> {
        if adu.len() < ASCII_MIN_FRAME_SIZE {
            return Err(ModbusError::frame("ASCII frame too short"));
        }
        if adu[0] != ASCII_START {
            return Err(ModbusError::frame("Invalid ASCII frame start character"));
        }
        if !adu.ends_with(ASCII_END) {
            return Err(ModbusError::frame("Invalid ASCII frame end characters"));
        }

        hex::decode(&adu[1..adu.len() - ASCII_END.len()])
            .map_err(|e| ModbusError::frame(format!("Invalid ASCII hex data: {}", e)))
    }
}

impl Packager for AsciiPackager {
    fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    fn encode(&self, pdu: &ProtocolDataUnit) -> ModbusResult<Vec<u8>> {
        let mut raw = Vec::with_capacity(pdu.data.len() + 3);
        raw.push(self.slave_id);
        raw.extend_from_slice(&pdu.to_bytes());
        raw.push(Self::calculate_lrc(&raw));

        let length = 1 + raw.len() * 2 + ASCII_END.len();
        if length > MAX_ASCII_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "length of data '{}' must not be bigger than '{}'",
                length, MAX_ASCII_FRAME_SIZE
            )));
        }

        let mut frame = BytesMut::with_capacity(length);
        frame.put_u8(ASCII_START);
        frame.put_slice(hex::encode_upper(&raw).as_bytes());
        frame.put_slice(ASCII_END);

        Ok(frame.to_vec())
    }

    fn verify(&self, request: &[u8], response: &[u8]) -> ModbusResult<()> {
        let response_raw = Self::unwrap_frame(response)?;
        let request_raw = Self::unwrap_frame(request)?;

        if request_raw[0] != response_raw[0] {
            return Err(ModbusError::protocol(format!(
                "Response slave ID mismatch: expected {}, got {}",
                request_raw[0], response_raw[0]
            )));
        }

        Ok(())
    }

    fn decode(&self, adu: &[u8]) -> ModbusResult<ProtocolDataUnit> {
        let mut raw = Self::unwrap_frame(adu)?;
        if raw.len() < 3 {
            return Err(ModbusError::frame("ASCII frame too short after decoding"));
        }

        let received_lrc = raw.pop().unwrap_or_default();
        let calculated_lrc = Self::calculate_lrc(&raw);
        if received_lrc != calculated_lrc {
            return Err(ModbusError::frame(format!(
                "LRC mismatch: expected 0x{:02X}, got 0x{:02X}",
                calculated_lrc, received_lrc
            )));
        }

        ProtocolDataUnit::from_bytes(&raw[1..])
    }
}
