use alloy::{dyn_abi::DynSolValue, primitives::Address};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::str::FromStr;

/// Validates and normalizes an Ethereum address
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(anyhow!("Address cannot be empty"));
    }

    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(anyhow!(
            "Invalid address format: '{}'. Ethereum addresses must start with '0x'",
            address
        ));
    }

    if address.len() != 42 {
        return Err(anyhow!(
            "Invalid address length: '{}'. Ethereum addresses must be exactly 42 characters (0x + 40 hex characters)",
            address
        ));
    }

    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "Invalid address format: '{}'. Contains non-hexadecimal characters",
            address
        ));
    }

    Address::from_str(address)
        .map_err(|e| anyhow!("Invalid Ethereum address: '{}'. Error: {}", address, e))
}

/// Creates user-friendly error messages for common RPC errors
pub fn interpret_rpc_error(error: &str) -> String {
    if error.contains("execution reverted") {
        format!(
            "The contract function reverted execution. {}",
            if error.contains("revert") {
                "This usually means the function's requirements were not met or an assertion failed."
            } else {
                "Check your parameters and try again."
            }
        )
    } else if error.contains("insufficient funds") {
        "Insufficient funds to cover gas costs. Make sure the connected account has enough ETH for gas fees.".to_string()
    } else if error.contains("unknown account") {
        "The node does not manage the connected account, so it cannot sign this transaction."
            .to_string()
    } else if error.contains("nonce too low") {
        "Nonce too low. Another transaction was already mined with this nonce.".to_string()
    } else if error.contains("filter not found") {
        "The node dropped the event filter. Unsubscribe and subscribe again.".to_string()
    } else if error.contains("connection refused") || error.contains("network unreachable") {
        "Network error: Cannot connect to RPC endpoint. Check the RPC URL configuration."
            .to_string()
    } else if error.contains("timeout") || error.contains("timed out") {
        "Network error: Request timed out. The RPC endpoint may be overloaded or unreachable."
            .to_string()
    } else if error.contains("method not found") {
        "RPC error: The requested method is not supported by this RPC endpoint.".to_string()
    } else {
        format!("RPC error: {}", error)
    }
}

/// Creates user-friendly error messages for artifact service failures
pub fn interpret_artifact_error(error: &str, contract_name: &str) -> String {
    if error.contains("404") {
        format!(
            "No contract named '{}' is registered with the artifact service.",
            contract_name
        )
    } else if error.contains("connection refused") || error.contains("error sending request") {
        "Cannot connect to the artifact service. Check artifacts.api_url or the API_URL environment variable.".to_string()
    } else if error.contains("timed out") || error.contains("timeout") {
        "Request to the artifact service timed out.".to_string()
    } else if error.contains("decoding") || error.contains("missing field") {
        format!("The artifact service returned an unexpected body: {}", error)
    } else {
        error.to_string()
    }
}

/// Convert a decoded ABI value to JSON. Integers become decimal strings.
pub fn dyn_sol_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Uint(num, _) => Value::String(num.to_string()),
        DynSolValue::Int(num, _) => Value::String(num.to_string()),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word.as_slice()[..*size])))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(dyn_sol_value_to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}

/// Convert a function's decoded outputs; a single output is unwrapped.
pub fn dyn_sol_values_to_json(values: &[DynSolValue]) -> Value {
    match values {
        [] => Value::Null,
        [single] => dyn_sol_value_to_json(single),
        many => Value::Array(many.iter().map(dyn_sol_value_to_json).collect()),
    }
}

/// Render a result the way an operator reads it: bare strings, JSON for everything else.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
