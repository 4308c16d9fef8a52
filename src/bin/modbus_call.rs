//! Voltage Modbus RPC one-shot caller
//!
//! Usage: modbus_call <config.yaml> <method> [params-json]
//!
//! Loads the gateway configuration, performs a single call and prints either
//! the JSON result or the JSON-RPC error object.

use std::env;
use std::process;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use voltage_modbus_rpc::{init_logging, Call, GatewayConfig, Method, Params, Service, VERSION};

fn usage() -> String {
    let methods = Method::all().map(|m| m.name()).collect::<Vec<_>>().join("\n  ");
    format!(
        "modbus_call {}\nusage: modbus_call <config.yaml> <method> [params-json]\n\nmethods:\n  {}",
        VERSION, methods
    )
}

fn parse_params(text: Option<&str>) -> Result<Params> {
    let text = match text {
        Some(text) => text,
        None => return Ok(Params::new()),
    };

    match serde_json::from_str::<Value>(text).context("params must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("params must be a JSON object, got {}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("{}", usage());
        process::exit(2);
    }

    let config = GatewayConfig::from_file(&args[0])
        .with_context(|| format!("failed to load configuration from {}", args[0]))?;
    init_logging(config.log_level);

    let params = parse_params(args.get(2).map(String::as_str))?;
    let call = Call::new(args[1].as_str(), params);

    let service = Service::from_config(&config)
        .await
        .context("failed to set up Modbus transport")?;

    match service.call(&call).await {
        Ok(result) => {
            println!("{}", serde_json::to_string(&result)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string(&err.to_error_object())?);
            process::exit(1);
        }
    }
}
