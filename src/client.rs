//! Modbus master client bound to one slave
//!
//! Modbus TCP, RTU and ASCII share the same application layer (PDU), differing
//! only in how it is framed. A [`ModbusClient`] therefore pairs a
//! [`Packager`] (framing for one slave id) with a shared [`Transporter`]
//! (byte exchange), and implements the function codes once on top.
//!
//! Every operation performs exactly one transaction and returns the raw
//! response payload: the data after the byte count for reads, the echoed
//! value or quantity for writes.

use std::sync::Arc;

use tracing::trace;

use crate::error::{ModbusError, ModbusResult};
use crate::packager::{Packager, PackagerFn};
use crate::protocol::{
    check_quantity, FunctionCode, ModbusAddress, ModbusValue, ProtocolDataUnit, SlaveId, COIL_OFF,
    COIL_ON, EXCEPTION_FLAG, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::transport::Transporter;

/// Build a client for `slave_id` on a shared transporter
///
/// Cheap and side-effect free; clients are meant to be built per call and
/// dropped afterwards.
pub fn build_client(
    transporter: &Arc<dyn Transporter>,
    packager_fn: &PackagerFn,
    slave_id: SlaveId,
) -> ModbusClient {
    ModbusClient::new(packager_fn(slave_id), transporter.clone())
}

/// Protocol client for a single slave
pub struct ModbusClient {
    packager: Box<dyn Packager>,
    transporter: Arc<dyn Transporter>,
}

impl ModbusClient {
    pub fn new(packager: Box<dyn Packager>, transporter: Arc<dyn Transporter>) -> Self {
        Self { packager, transporter }
    }

    /// Slave id this client addresses
    pub fn slave_id(&self) -> SlaveId {
        self.packager.slave_id()
    }

    /// Read coils (function code 0x01)
    pub async fn read_coils(&self, address: ModbusAddress, quantity: u16) -> ModbusResult<Vec<u8>> {
        self.read(FunctionCode::ReadCoils, address, quantity, MAX_READ_BITS).await
    }

    /// Read discrete inputs (function code 0x02)
    pub async fn read_discrete_inputs(&self, address: ModbusAddress, quantity: u16) -> ModbusResult<Vec<u8>> {
        self.read(FunctionCode::ReadDiscreteInputs, address, quantity, MAX_READ_BITS).await
    }

    /// Read holding registers (function code 0x03)
    pub async fn read_holding_registers(&self, address: ModbusAddress, quantity: u16) -> ModbusResult<Vec<u8>> {
        self.read(FunctionCode::ReadHoldingRegisters, address, quantity, MAX_READ_REGISTERS).await
    }

    /// Read input registers (function code 0x04)
    pub async fn read_input_registers(&self, address: ModbusAddress, quantity: u16) -> ModbusResult<Vec<u8>> {
        self.read(FunctionCode::ReadInputRegisters, address, quantity, MAX_READ_REGISTERS).await
    }

    /// Write single coil (function code 0x05)
    ///
    /// `value` is the wire state, `0xFF00` (ON) or `0x0000` (OFF).
    pub async fn write_single_coil(&self, address: ModbusAddress, value: ModbusValue) -> ModbusResult<Vec<u8>> {
        if value != COIL_ON && value != COIL_OFF {
            return Err(ModbusError::invalid_data(format!(
                "state '0x{:04X}' must be either '0xFF00' (ON) or '0x0000' (OFF)",
                value
            )));
        }

        let request = ProtocolDataUnit::with_words(FunctionCode::WriteSingleCoil, &[address, value]);
        let response = self.send(request).await?;
        check_echo(&response, address, value, "value")
    }

    /// Write single register (function code 0x06)
    pub async fn write_single_register(&self, address: ModbusAddress, value: ModbusValue) -> ModbusResult<Vec<u8>> {
        let request = ProtocolDataUnit::with_words(FunctionCode::WriteSingleRegister, &[address, value]);
        let response = self.send(request).await?;
        check_echo(&response, address, value, "value")
    }

    /// Write multiple coils (function code 0x0F) from bit-packed bytes
    pub async fn write_multiple_coils(
        &self,
        address: ModbusAddress,
        quantity: u16,
        values: &[u8],
    ) -> ModbusResult<Vec<u8>> {
        check_quantity(quantity, 1, MAX_WRITE_COILS)?;

        let request =
            ProtocolDataUnit::with_words_and_payload(FunctionCode::WriteMultipleCoils, &[address, quantity], values);
        let response = self.send(request).await?;
        check_echo(&response, address, quantity, "quantity")
    }

    /// Write multiple registers (function code 0x10) from big-endian bytes
    pub async fn write_multiple_registers(
        &self,
        address: ModbusAddress,
        quantity: u16,
        values: &[u8],
    ) -> ModbusResult<Vec<u8>> {
        check_quantity(quantity, 1, MAX_WRITE_REGISTERS)?;

        let request = ProtocolDataUnit::with_words_and_payload(
            FunctionCode::WriteMultipleRegisters,
            &[address, quantity],
            values,
        );
        let response = self.send(request).await?;
        check_echo(&response, address, quantity, "quantity")
    }

    async fn read(
        &self,
        function: FunctionCode,
        address: ModbusAddress,
        quantity: u16,
        max_quantity: u16,
    ) -> ModbusResult<Vec<u8>> {
        check_quantity(quantity, 1, max_quantity)?;

        let response = self.send(ProtocolDataUnit::with_words(function, &[address, quantity])).await?;
        let count = response.data[0] as usize;
        let length = response.data.len() - 1;
        if count != length {
            return Err(ModbusError::invalid_data(format!(
                "response data size '{}' does not match count '{}'",
                length, count
            )));
        }

        Ok(response.data[1..].to_vec())
    }

    /// Run one transaction and validate the response PDU
    ///
    /// The returned PDU carries the request's function code and at least one
    /// data byte.
    async fn send(&self, request: ProtocolDataUnit) -> ModbusResult<ProtocolDataUnit> {
        let adu = self.packager.encode(&request)?;
        trace!(slave_id = self.slave_id(), function = request.function_code, "modbus request");

        let response_adu = self.transporter.send(&adu).await?;
        self.packager.verify(&adu, &response_adu)?;
        let response = self.packager.decode(&response_adu)?;

        if response.is_exception() && response.function_code & !EXCEPTION_FLAG == request.function_code {
            let code = response.data.first().copied().unwrap_or_default();
            return Err(ModbusError::exception(request.function_code, code));
        }

        if response.function_code != request.function_code {
            return Err(ModbusError::protocol(format!(
                "response function code '0x{:02X}' does not match request '0x{:02X}'",
                response.function_code, request.function_code
            )));
        }

        if response.data.is_empty() {
            return Err(ModbusError::frame("response data is empty"));
        }

        Ok(response)
    }
}

/// Validate a write acknowledgement echoing `address` and `expected`
fn check_echo(
    response: &ProtocolDataUnit,
    address: ModbusAddress,
    expected: u16,
    field: &str,
) -> ModbusResult<Vec<u8>> {
    if response.data.len() != 4 {
        return Err(ModbusError::invalid_data(format!(
            "response data size '{}' does not match expected '4'",
            response.data.len()
        )));
    }

    let echoed_address = u16::from_be_bytes([response.data[0], response.data[1]]);
    if echoed_address != address {
        return Err(ModbusError::invalid_data(format!(
            "response address '{}' does not match request '{}'",
            echoed_address, address
        )));
    }

    let echoed = u16::from_be_bytes([response.data[2], response.data[3]]);
    if echoed != expected {
        return Err(ModbusError::invalid_data(format!(
            "response {} '{}' does not match request '{}'",
            field, echoed, expected
        )));
    }

    Ok(response.data[2..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::Framing;
    use async_trait::async_trait;

    /// Answers every TCP request with a fixed PDU, reusing the request header
    struct FixedReply(Vec<u8>);

    #[async_trait]
    impl Transporter for FixedReply {
        async fn send(&self, adu: &[u8]) -> ModbusResult<Vec<u8>> {
            let mut response = adu[..4].to_vec();
            response.extend_from_slice(&((self.0.len() + 1) as u16).to_be_bytes());
            response.push(adu[6]);
            response.extend_from_slice(&self.0);
            Ok(response)
        }
    }

    fn client_with_reply(pdu: &[u8]) -> ModbusClient {
        let transporter: Arc<dyn Transporter> = Arc::new(FixedReply(pdu.to_vec()));
        build_client(&transporter, &Framing::Tcp.packager_fn(), 1)
    }

    #[tokio::test]
    async fn test_read_returns_data_after_byte_count() {
        let client = client_with_reply(&[0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B]);
        let data = client.read_holding_registers(0, 2).await.unwrap();
        assert_eq!(data, vec![0x00, 0x0A, 0x00, 0x0B]);
    }

    #[tokio::test]
    async fn test_read_byte_count_mismatch() {
        let client = client_with_reply(&[0x01, 0x02, 0x05]);
        let err = client.read_coils(0, 3).await.unwrap_err();
        assert_eq!(
            err,
            ModbusError::invalid_data("response data size '1' does not match count '2'")
        );
    }

    #[tokio::test]
    async fn test_read_quantity_limits() {
        let client = client_with_reply(&[0x03, 0x00]);
        assert!(client.read_holding_registers(0, 0).await.is_err());
        assert!(client.read_holding_registers(0, 126).await.is_err());
        assert!(client.read_coils(0, 2001).await.is_err());
    }

    #[tokio::test]
    async fn test_exception_response() {
        let client = client_with_reply(&[0x83, 0x02]);
        let err = client.read_holding_registers(0, 1).await.unwrap_err();
        assert_eq!(err, ModbusError::exception(0x03, 0x02));
    }

    #[tokio::test]
    async fn test_function_code_mismatch() {
        let client = client_with_reply(&[0x04, 0x02, 0x00, 0x01]);
        let err = client.read_holding_registers(0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));

        // exception for another function
        let client = client_with_reply(&[0x84, 0x02]);
        let err = client.read_holding_registers(0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_write_single_coil_echo() {
        let client = client_with_reply(&[0x05, 0x00, 0x10, 0xFF, 0x00]);
        assert_eq!(client.write_single_coil(0x10, COIL_ON).await.unwrap(), vec![0xFF, 0x00]);

        // echo of a different value
        assert!(client.write_single_coil(0x10, COIL_OFF).await.is_err());
        // not a coil state
        assert!(client.write_single_coil(0x10, 0x0001).await.is_err());
    }

    #[tokio::test]
    async fn test_write_multiple_registers_echo() {
        let client = client_with_reply(&[0x10, 0x00, 0x01, 0x00, 0x02]);
        let data = client
            .write_multiple_registers(0x01, 2, &[0x00, 0x0A, 0x01, 0x02])
            .await
            .unwrap();
        assert_eq!(data, vec![0x00, 0x02]);

        let err = client.write_multiple_registers(0x05, 2, &[0, 0, 0, 0]).await.unwrap_err();
        assert_eq!(err, ModbusError::invalid_data("response address '1' does not match request '5'"));
    }
}
