//! JSON-RPC method dispatch onto Modbus transactions
//!
//! A [`Service`] owns nothing but a shared [`Transporter`] and a
//! [`PackagerFn`]. Every [`Call`] validates its parameters, builds a client
//! for the requested slave, runs exactly one transaction and decodes the
//! response.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use voltage_modbus_rpc::{Call, Framing, Service, TcpTransporter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transporter = Arc::new(TcpTransporter::new("127.0.0.1:502", Duration::from_secs(5)));
//!     let service = Service::new(transporter, Framing::Tcp.packager_fn());
//!
//!     let call: Call = serde_json::from_value(json!({
//!         "method": "modbus-read-holding",
//!         "params": { "address": 0, "quantity": 2, "slave_id": 1 }
//!     }))?;
//!     let result = service.call(&call).await?;
//!     println!("{}", serde_json::to_string(&result)?);
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{build_client, ModbusClient};
use crate::codec::{decode, encode_coil, normalize_coil_ack, DecodedResult};
use crate::config::GatewayConfig;
use crate::error::{CallError, ModbusError, ModbusResult};
use crate::packager::PackagerFn;
use crate::params::{get_address_and_quantity, get_address_and_value, get_bytes, get_slave_id, Params};
use crate::protocol::SlaveId;
use crate::transport::Transporter;

/// One method invocation as handed over by the RPC layer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Call {
    pub method: String,
    #[serde(default)]
    pub params: Params,
}

impl Call {
    pub fn new<S: Into<String>>(method: S, params: Params) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Supported RPC methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    ReadCoil,
    ReadDiscrete,
    WriteCoil,
    WriteMultipleCoils,
    ReadInput,
    ReadHolding,
    WriteRegister,
    WriteMultipleRegisters,
}

const METHODS: [(&str, Method); 8] = [
    ("modbus-read-coil", Method::ReadCoil),
    ("modbus-read-discrete", Method::ReadDiscrete),
    ("modbus-write-coil", Method::WriteCoil),
    ("modbus-write-multiple-coils", Method::WriteMultipleCoils),
    ("modbus-read-input", Method::ReadInput),
    ("modbus-read-holding", Method::ReadHolding),
    ("modbus-write-register", Method::WriteRegister),
    ("modbus-write-multiple-registers", Method::WriteMultipleRegisters),
];

impl Method {
    /// Look up a method by its exact wire name
    pub fn from_name(name: &str) -> Option<Self> {
        METHODS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|&(_, method)| method)
    }

    /// Wire name of the method
    pub fn name(self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, method)| *method == self)
            .map(|&(name, _)| name)
            .unwrap_or_default()
    }

    /// All supported methods in table order
    pub fn all() -> impl Iterator<Item = Method> {
        METHODS.iter().map(|&(_, method)| method)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Translates calls into Modbus transactions
#[derive(Clone)]
pub struct Service {
    transporter: Arc<dyn Transporter>,
    packager_fn: PackagerFn,
}

impl Service {
    pub fn new(transporter: Arc<dyn Transporter>, packager_fn: PackagerFn) -> Self {
        Self {
            transporter,
            packager_fn,
        }
    }

    /// Validate `config`, open its transporter and wire up the matching framing
    pub async fn from_config(config: &GatewayConfig) -> ModbusResult<Self> {
        config.validate()?;
        let transporter = config.connect().await?;
        Ok(Self::new(transporter, config.packager_fn()))
    }

    fn client(&self, slave_id: SlaveId) -> ModbusClient {
        build_client(&self.transporter, &self.packager_fn, slave_id)
    }

    /// Dispatch one call
    ///
    /// # Errors
    ///
    /// - `CallError::MethodNotFound` - unknown method name
    /// - `CallError::InvalidParams` - a parameter is missing, mistyped or out of range
    /// - `CallError::Modbus` - the transaction failed
    pub async fn call(&self, call: &Call) -> Result<DecodedResult, CallError> {
        let method = match Method::from_name(&call.method) {
            Some(method) => method,
            None => {
                warn!(method = %call.method, "rejected call to unknown method");
                return Err(CallError::method_not_found(call.method.as_str()));
            }
        };

        debug!(%method, "dispatching call");
        let result = self.handle(method, &call.params).await;

        if let Err(err) = &result {
            match err {
                CallError::Modbus(e) => warn!(
                    %method,
                    error = %e,
                    transport = e.is_transport_error(),
                    recoverable = e.is_recoverable(),
                    "transaction failed"
                ),
                other => warn!(%method, error = %other, "rejected call"),
            }
        }

        result
    }

    async fn handle(&self, method: Method, params: &Params) -> Result<DecodedResult, CallError> {
        match method {
            Method::ReadCoil => self.read_coils(params).await,
            Method::ReadDiscrete => self.read_discrete_inputs(params).await,
            Method::WriteCoil => self.write_single_coil(params).await,
            Method::WriteMultipleCoils => self.write_multiple_coils(params).await,
            Method::ReadInput => self.read_input_registers(params).await,
            Method::ReadHolding => self.read_holding_registers(params).await,
            Method::WriteRegister => self.write_single_register(params).await,
            Method::WriteMultipleRegisters => self.write_multiple_registers(params).await,
        }
    }

    async fn read_coils(&self, params: &Params) -> Result<DecodedResult, CallError> {
        let (address, quantity) = get_address_and_quantity(params)?;
        let slave_id = get_slave_id(params)?;

        let raw = self.client(slave_id).read_coils(address, quantity).await?;
        Ok(decode(&raw).into())
    }

    async fn read_discrete_inputs(&self, params: &Params) -> Result<DecodedResult, CallError> {
        let (address, quantity) = get_address_and_quantity(params)?;
        let slave_id = get_slave_id(params)?;

        let raw = self.client(slave_id).read_discrete_inputs(address, quantity).await?;
        Ok(decode(&raw).into())
    }

    async fn write_single_coil(&self, params: &Params) -> Result<DecodedResult, CallError> {
        let (address, value) = get_address_and_value(params)?;
        let value = encode_coil(value)?;
        let slave_id = get_slave_id(params)?;

        let raw = self.client(slave_id).write_single_coil(address, value).await?;
        let state = normalize_coil_ack(decode(&raw))
            .first()
            .copied()
            .ok_or_else(|| ModbusError::frame("write coil acknowledgement is empty"))?;

        Ok(DecodedResult::Single(state))
    }

    async fn write_multiple_coils(&self, params: &Params) -> Result<DecodedResult, CallError> {
        let (address, quantity) = get_address_and_quantity(params)?;
        let values = get_bytes(params, "value")?;
        let slave_id = get_slave_id(params)?;

        let raw = self
            .client(slave_id)
            .write_multiple_coils(address, quantity, &values)
            .await?;
        Ok(decode(&raw).into())
    }

    async fn read_input_registers(&self, params: &Params) -> Result<DecodedResult, CallError> {
        let (address, quantity) = get_address_and_quantity(params)?;
        let slave_id = get_slave_id(params)?;

        let raw = self.client(slave_id).read_input_registers(address, quantity).await?;
        Ok(decode(&raw).into())
    }

    async fn read_holding_registers(&self, params: &Params) -> Result<DecodedResult, CallError> {
        let (address, quantity) = get_address_and_quantity(params)?;
        let slave_id = get_slave_id(params)?;

        let raw = self.client(slave_id).read_holding_registers(address, quantity).await?;
        Ok(decode(&raw).into())
    }

    async fn write_single_register(&self, params: &Params) -> Result<DecodedResult, CallError> {
        let (address, value) = get_address_and_value(params)?;
        let slave_id = get_slave_id(params)?;

        let raw = self.client(slave_id).write_single_register(address, value).await?;
        Ok(decode(&raw).into())
    }

    async fn write_multiple_registers(&self, params: &Params) -> Result<DecodedResult, CallError> {
        let (address, quantity) = get_address_and_quantity(params)?;
        let values = get_bytes(params, "value")?;
        let slave_id = get_slave_id(params)?;

        let raw = self
            .client(slave_id)
            .write_multiple_registers(address, quantity, &values)
            .await?;
        Ok(decode(&raw).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::Framing;
    use async_trait::async_trait;
    use serde_json::json;

    struct Unreachable;

    #[async_trait]
    impl Transporter for Unreachable {
        async fn send(&self, _adu: &[u8]) -> ModbusResult<Vec<u8>> {
            Err(ModbusError::connection("device unreachable"))
        }
    }

    fn service() -> Service {
        Service::new(Arc::new(Unreachable), Framing::Rtu.packager_fn())
    }

    #[test]
    fn test_method_table() {
        assert_eq!(Method::from_name("modbus-read-holding"), Some(Method::ReadHolding));
        assert_eq!(Method::from_name("Modbus-Read-Holding"), None);
        assert_eq!(Method::from_name("read-write-multiple-registers"), None);
        assert_eq!(Method::from_name("mask-write-register"), None);
        assert_eq!(Method::from_name("read-fifo-queue"), None);

        for method in Method::all() {
            assert_eq!(Method::from_name(method.name()), Some(method));
        }
        assert_eq!(Method::all().count(), 8);
        assert_eq!(Method::WriteCoil.to_string(), "modbus-write-coil");
    }

    #[test]
    fn test_call_deserialization() {
        let call: Call = serde_json::from_value(json!({ "method": "modbus-read-coil" })).unwrap();
        assert!(call.params.is_empty());

        let call: Call = serde_json::from_value(json!({
            "method": "modbus-write-register",
            "params": { "address": 1, "value": 2 }
        }))
        .unwrap();
        assert_eq!(call.params.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let err = service().call(&Call::new("modbus-bogus", Params::new())).await.unwrap_err();
        assert_eq!(err, CallError::method_not_found("modbus-bogus"));
        assert_eq!(err.data(), Some(json!({ "method": "modbus-bogus" })));
    }

    #[tokio::test]
    async fn test_transaction_errors_propagate_unchanged() {
        let mut params = Params::new();
        params.insert("address".into(), json!(0));
        params.insert("quantity".into(), json!(1));

        let err = service().call(&Call::new("modbus-read-input", params)).await.unwrap_err();
        assert_eq!(err, CallError::Modbus(ModbusError::connection("device unreachable")));
        assert_eq!(err.code(), -32000);
    }

    #[tokio::test]
    async fn test_coil_value_checked_before_slave_id() {
        let mut params = Params::new();
        params.insert("address".into(), json!(0));
        params.insert("value".into(), json!(2));
        params.insert("slave_id".into(), json!(999));

        let err = service().call(&Call::new("modbus-write-coil", params)).await.unwrap_err();
        assert_eq!(err, CallError::invalid_value("bad value. only 0 or 1 allowed", 2));
    }

    #[tokio::test]
    async fn test_payload_checked_before_slave_id() {
        let mut params = Params::new();
        params.insert("address".into(), json!(0));
        params.insert("quantity".into(), json!(8));
        params.insert("slave_id".into(), json!("one"));

        let err = service()
            .call(&Call::new("modbus-write-multiple-coils", params))
            .await
            .unwrap_err();
        assert_eq!(err, CallError::invalid_params("value required and should be base64"));
    }
}
