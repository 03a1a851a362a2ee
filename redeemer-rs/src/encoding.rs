use crate::types::UserOperation;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::Value;

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

/// Bundler wire shape of a v0.7 UserOperation. Factory and paymaster fields are omitted
/// entirely when unset; bundlers reject `null` for them.
pub fn user_op_to_json(op: &UserOperation) -> Value {
    let mut v = serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "signature": fmt_bytes(&op.signature),
    });

    if let Some(obj) = v.as_object_mut() {
        if let Some(factory) = op.factory {
            obj.insert("factory".into(), Value::String(fmt_address(factory)));
            obj.insert("factoryData".into(), Value::String(fmt_bytes(&op.factory_data)));
        }
        if let Some(paymaster) = op.paymaster {
            obj.insert("paymaster".into(), Value::String(fmt_address(paymaster)));
            obj.insert(
                "paymasterVerificationGasLimit".into(),
                Value::String(fmt_u256(op.paymaster_verification_gas_limit)),
            );
            obj.insert(
                "paymasterPostOpGasLimit".into(),
                Value::String(fmt_u256(op.paymaster_post_op_gas_limit)),
            );
            obj.insert("paymasterData".into(), Value::String(fmt_bytes(&op.paymaster_data)));
        }
    }

    v
}

pub fn parse_u256_quantity(s: &str) -> Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 20 {
        anyhow::bail!("expected 20-byte hex, got {} bytes", bytes.len());
    }
    Ok(Address::from_slice(&bytes))
}

pub fn parse_bytes(s: &str) -> Result<Bytes> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).context("invalid hex bytes")?;
    Ok(Bytes::from(bytes))
}

/// Quantity fields arrive as hex strings from most bundlers, but some send plain numbers.
pub fn parse_u256_value(v: &Value) -> Result<U256> {
    match v {
        Value::String(s) => parse_u256_quantity(s),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| anyhow!("quantity is not an unsigned integer: {n}")),
        other => Err(anyhow!("expected quantity, got {other}")),
    }
}

pub fn parse_u256_field(v: &Value, key: &str) -> Result<U256> {
    let field = v
        .get(key)
        .filter(|x| !x.is_null())
        .ok_or_else(|| anyhow!("missing or invalid field {key}"))?;
    parse_u256_value(field).with_context(|| format!("invalid field {key}"))
}
