//! Typed extraction from untyped call parameters
//!
//! Every accessor either returns a value that fits its wire type or an
//! `InvalidParams` error naming the parameter, so handlers can reject a call
//! before any transaction is attempted.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::CallError;
use crate::protocol::{ModbusAddress, SlaveId};

/// Untyped parameter mapping as received from the RPC layer
pub type Params = Map<String, Value>;

/// Standard alphabet with padding, tolerating non-zero trailing bits
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Read an integer parameter
///
/// `null` counts as absent. Absent parameters fall back to `default` when
/// given and are otherwise reported as required.
pub fn get_integer(params: &Params, key: &str, default: Option<i64>) -> Result<i64, CallError> {
    let value = match params.get(key) {
        None | Some(Value::Null) => {
            return default.ok_or_else(|| CallError::invalid_params(format!("{} required", key)));
        }
        Some(value) => value,
    };

    match value {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| CallError::invalid_params(format!("{} should be int", key))),
        _ => Err(CallError::invalid_params(format!("{} should be number", key))),
    }
}

/// Read `slave_id` (0-255, default 0)
pub fn get_slave_id(params: &Params) -> Result<SlaveId, CallError> {
    let value = get_integer(params, "slave_id", Some(0))?;
    SlaveId::try_from(value).map_err(|_| CallError::invalid_params("slave_id should be byte"))
}

/// Read a 16-bit register-sized parameter (0-65535)
pub fn get_register_value(params: &Params, key: &str, default: Option<i64>) -> Result<u16, CallError> {
    let value = get_integer(params, key, default)?;
    u16::try_from(value).map_err(|_| CallError::invalid_params(format!("{} should be uint16", key)))
}

/// Read the required `address` and `quantity` pair
pub fn get_address_and_quantity(params: &Params) -> Result<(ModbusAddress, u16), CallError> {
    let address = get_register_value(params, "address", None)?;
    let quantity = get_register_value(params, "quantity", None)?;
    Ok((address, quantity))
}

/// Read the required `address` and `value` pair
pub fn get_address_and_value(params: &Params) -> Result<(ModbusAddress, u16), CallError> {
    let address = get_register_value(params, "address", None)?;
    let value = get_register_value(params, "value", None)?;
    Ok((address, value))
}

/// Read a base64-encoded byte payload
///
/// Line breaks inside the payload are ignored.
pub fn get_bytes(params: &Params, key: &str) -> Result<Vec<u8>, CallError> {
    let encoded = params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CallError::invalid_params(format!("{} required and should be base64", key)))?;

    let compact: String = encoded.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
    PAYLOAD_ENGINE
        .decode(compact)
        .map_err(|e| CallError::invalid_params(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    fn message(err: CallError) -> String {
        match err {
            CallError::InvalidParams { msg, .. } => msg,
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_get_integer() {
        let p = params(json!({ "a": 7, "b": -3, "n": null }));
        assert_eq!(get_integer(&p, "a", None).unwrap(), 7);
        assert_eq!(get_integer(&p, "b", None).unwrap(), -3);
        assert_eq!(get_integer(&p, "missing", Some(42)).unwrap(), 42);
        assert_eq!(get_integer(&p, "n", Some(1)).unwrap(), 1);
        assert_eq!(message(get_integer(&p, "missing", None).unwrap_err()), "missing required");
        assert_eq!(message(get_integer(&p, "n", None).unwrap_err()), "n required");
    }

    #[test]
    fn test_get_integer_type_errors() {
        let p = params(json!({ "s": "10", "f": 1.5, "b": true, "big": u64::MAX, "arr": [1] }));
        assert_eq!(message(get_integer(&p, "s", None).unwrap_err()), "s should be number");
        assert_eq!(message(get_integer(&p, "b", None).unwrap_err()), "b should be number");
        assert_eq!(message(get_integer(&p, "arr", None).unwrap_err()), "arr should be number");
        assert_eq!(message(get_integer(&p, "f", None).unwrap_err()), "f should be int");
        assert_eq!(message(get_integer(&p, "big", None).unwrap_err()), "big should be int");
    }

    #[test]
    fn test_get_slave_id() {
        assert_eq!(get_slave_id(&params(json!({}))).unwrap(), 0);
        assert_eq!(get_slave_id(&params(json!({ "slave_id": 255 }))).unwrap(), 255);
        assert_eq!(
            message(get_slave_id(&params(json!({ "slave_id": 256 }))).unwrap_err()),
            "slave_id should be byte"
        );
        assert!(get_slave_id(&params(json!({ "slave_id": -1 }))).is_err());
    }

    #[test]
    fn test_get_register_value_bounds() {
        let p = params(json!({ "lo": 0, "hi": 65535, "over": 65536, "neg": -1 }));
        assert_eq!(get_register_value(&p, "lo", None).unwrap(), 0);
        assert_eq!(get_register_value(&p, "hi", None).unwrap(), 65535);
        assert_eq!(message(get_register_value(&p, "over", None).unwrap_err()), "over should be uint16");
        assert_eq!(message(get_register_value(&p, "neg", None).unwrap_err()), "neg should be uint16");
    }

    #[test]
    fn test_pairs_report_first_missing_key() {
        let err = get_address_and_quantity(&params(json!({ "quantity": 1 }))).unwrap_err();
        assert_eq!(message(err), "address required");

        let err = get_address_and_value(&params(json!({ "address": 1 }))).unwrap_err();
        assert_eq!(message(err), "value required");

        assert_eq!(get_address_and_value(&params(json!({ "address": 1, "value": 2 }))).unwrap(), (1, 2));
    }

    #[test]
    fn test_get_bytes() {
        let p = params(json!({ "ok": "AQID", "empty": "", "bad": "not base64!", "num": 5 }));
        assert_eq!(get_bytes(&p, "ok").unwrap(), vec![1, 2, 3]);
        assert!(get_bytes(&p, "empty").unwrap().is_empty());
        assert_eq!(message(get_bytes(&p, "num").unwrap_err()), "num required and should be base64");
        assert_eq!(message(get_bytes(&p, "missing").unwrap_err()), "missing required and should be base64");

        let msg = message(get_bytes(&p, "bad").unwrap_err());
        assert!(!msg.is_empty());
    }

    #[test]
    fn test_get_bytes_skips_line_breaks() {
        let p = params(json!({ "lf": "AQID\nBA==", "crlf": "AQID\r\nBA==" }));
        assert_eq!(get_bytes(&p, "lf").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(get_bytes(&p, "crlf").unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_get_bytes_allows_trailing_bits() {
        // 'R' leaves non-zero bits after the single decoded byte
        let p = params(json!({ "value": "zR==" }));
        assert_eq!(get_bytes(&p, "value").unwrap(), vec![0xCD]);
    }
}
