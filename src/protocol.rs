//! Modbus protocol definitions and data structures
//!
//! This module contains the function codes the gateway issues, the protocol
//! data unit (PDU) shared by all framings, and the protocol limits enforced by
//! the master client.

use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus value type (16-bit register value)
pub type ModbusValue = u16;

/// Modbus slave/unit identifier (0-255 on the wire)
pub type SlaveId = u8;

/// Wire value of an ON coil
pub const COIL_ON: u16 = 0xFF00;

/// Wire value of an OFF coil
pub const COIL_OFF: u16 = 0x0000;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Maximum coils / discrete inputs per read request
pub const MAX_READ_BITS: u16 = 2000;

/// Maximum registers per read request
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum coils per write request
pub const MAX_WRITE_COILS: u16 = 1968;

/// Maximum registers per write request
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Modbus function codes issued by the master client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Protocol data unit: function code plus function-specific data
///
/// The function code is kept as a raw byte because responses may carry the
/// exception flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDataUnit {
    pub function_code: u8,
    pub data: Vec<u8>,
}

impl ProtocolDataUnit {
    /// Create a PDU from a function code and payload
    pub fn new(function: FunctionCode, data: Vec<u8>) -> Self {
        Self {
            function_code: function.to_u8(),
            data,
        }
    }

    /// Build a request whose payload is a sequence of big-endian words
    pub fn with_words(function: FunctionCode, words: &[u16]) -> Self {
        let mut data = Vec::with_capacity(words.len() * 2);
        for word in words {
            data.extend_from_slice(&word.to_be_bytes());
        }
        Self::new(function, data)
    }

    /// Build a request made of words followed by a byte-count-prefixed payload
    pub fn with_words_and_payload(function: FunctionCode, words: &[u16], payload: &[u8]) -> Self {
        let mut pdu = Self::with_words(function, words);
        pdu.data.push(payload.len() as u8);
        pdu.data.extend_from_slice(payload);
        pdu
    }

    /// Check if this PDU is an exception response
    pub fn is_exception(&self) -> bool {
        self.function_code & EXCEPTION_FLAG != 0
    }

    /// Serialize to `function code || data`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.data.len());
        bytes.push(self.function_code);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Parse from `function code || data`
    pub fn from_bytes(bytes: &[u8]) -> ModbusResult<Self> {
        match bytes.split_first() {
            Some((&function_code, data)) => Ok(Self {
                function_code,
                data: data.to_vec(),
            }),
            None => Err(ModbusError::frame("Empty PDU")),
        }
    }
}

/// Validate a request quantity against protocol limits
pub fn check_quantity(quantity: u16, min: u16, max: u16) -> ModbusResult<()> {
    if quantity < min || quantity > max {
        return Err(ModbusError::invalid_data(format!(
            "quantity '{}' must be between '{}' and '{}'",
            quantity, min, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_codes() {
        assert_eq!(FunctionCode::ReadHoldingRegisters.to_u8(), 0x03);
        assert_eq!(FunctionCode::WriteMultipleCoils.to_u8(), 0x0F);
        assert_eq!(FunctionCode::WriteMultipleRegisters.to_u8(), 0x10);
    }

    #[test]
    fn test_pdu_building() {
        let pdu = ProtocolDataUnit::with_words(FunctionCode::ReadHoldingRegisters, &[0x006B, 0x0003]);
        assert_eq!(pdu.to_bytes(), vec![0x03, 0x00, 0x6B, 0x00, 0x03]);

        let pdu = ProtocolDataUnit::with_words_and_payload(
            FunctionCode::WriteMultipleCoils,
            &[0x0013, 0x000A],
            &[0xCD, 0x01],
        );
        assert_eq!(pdu.to_bytes(), vec![0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]);
    }

    #[test]
    fn test_pdu_parsing() {
        let pdu = ProtocolDataUnit::from_bytes(&[0x83, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.data, vec![0x02]);

        assert!(ProtocolDataUnit::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_quantity_limits() {
        assert!(check_quantity(1, 1, MAX_READ_REGISTERS).is_ok());
        assert!(check_quantity(125, 1, MAX_READ_REGISTERS).is_ok());

        let err = check_quantity(0, 1, MAX_READ_REGISTERS).unwrap_err();
        assert_eq!(err.to_string(), "Invalid data: quantity '0' must be between '1' and '125'");
        assert!(check_quantity(2001, 1, MAX_READ_BITS).is_err());
    }
}
