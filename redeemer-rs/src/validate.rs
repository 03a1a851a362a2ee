//! Pure checks on a [`RedemptionRequest`]. No I/O.

use crate::error::RedemptionError;
use crate::types::{RedemptionRequest, TokenAmount};
use ethers::types::Address;
use ethers::utils::to_checksum;

pub const MIN_TOKEN_DECIMALS: u32 = 1;
pub const MAX_TOKEN_DECIMALS: u32 = 18;

/// Run every check in order, stopping at the first violation.
pub fn validate(request: &RedemptionRequest) -> Result<(), RedemptionError> {
    validate_delegation_payload(request.delegation_payload.as_ref())?;
    validate_address("recipient", &request.recipient_address)?;
    validate_address("token contract", &request.token_contract_address)?;
    validate_token_amount(&request.token_amount)?;
    validate_token_decimals(request.token_decimals)?;
    validate_chain_id(request.chain_id)?;
    validate_network_name(&request.network_name)?;
    Ok(())
}

pub fn validate_delegation_payload(payload: &[u8]) -> Result<(), RedemptionError> {
    if payload.is_empty() {
        return Err(RedemptionError::validation("delegation data is required"));
    }
    Ok(())
}

/// A `0x`-prefixed 20-byte hex address, not the zero address. Mixed-case input must carry a
/// valid EIP-55 checksum.
pub fn validate_address(role: &str, value: &str) -> Result<Address, RedemptionError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RedemptionError::validation(format!(
            "valid {role} address is required"
        )));
    }

    let address = parse_strict_address(value).ok_or_else(|| {
        RedemptionError::validation(format!("invalid {role} address format"))
            .with_details(serde_json::json!({ "role": role, "address": value }))
    })?;

    if address.is_zero() {
        return Err(RedemptionError::validation(format!(
            "valid {role} address is required"
        ))
        .with_details(serde_json::json!({ "role": role, "address": value })));
    }
    Ok(address)
}

fn parse_strict_address(value: &str) -> Option<Address> {
    let hex_part = value.strip_prefix("0x")?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let address: Address = value.parse().ok()?;

    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && to_checksum(&address, None) != value {
        return None;
    }
    Some(address)
}

/// The amount, normalized to an unsigned integer, must be at least 1.
pub fn validate_token_amount(amount: &TokenAmount) -> Result<(), RedemptionError> {
    let positive = match *amount {
        TokenAmount::Exact(v) => !v.is_zero(),
        // normalization rounds to the nearest integer
        TokenAmount::Scaled(x) => x.is_finite() && x.round() >= 1.0,
    };
    if !positive {
        return Err(RedemptionError::validation(
            "token amount must be greater than zero",
        ));
    }
    Ok(())
}

pub fn validate_token_decimals(decimals: u32) -> Result<(), RedemptionError> {
    if decimals < MIN_TOKEN_DECIMALS {
        return Err(RedemptionError::validation(format!(
            "token decimals must be at least {MIN_TOKEN_DECIMALS}"
        )));
    }
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(RedemptionError::validation(format!(
            "token decimals must not exceed {MAX_TOKEN_DECIMALS}"
        )));
    }
    Ok(())
}

pub fn validate_chain_id(chain_id: u64) -> Result<(), RedemptionError> {
    if chain_id == 0 {
        return Err(RedemptionError::validation("valid chain ID is required"));
    }
    Ok(())
}

pub fn validate_network_name(name: &str) -> Result<(), RedemptionError> {
    if name.trim().is_empty() {
        return Err(RedemptionError::validation("network name is required"));
    }
    Ok(())
}
