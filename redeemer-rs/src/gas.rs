use crate::encoding::parse_u256_field;
use crate::transport::RpcTransport;
use anyhow::{anyhow, Context, Result};
use ethers::types::U256;
use serde_json::Value;
use std::fmt;

/// Fee tiers reported by `pimlico_getUserOperationGasPrice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasTier {
    Slow,
    Standard,
    Fast,
}

impl GasTier {
    fn key(self) -> &'static str {
        match self {
            GasTier::Slow => "slow",
            GasTier::Standard => "standard",
            GasTier::Fast => "fast",
        }
    }
}

impl fmt::Display for GasTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPrices {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Gas-utility client: recommended UserOperation fees.
#[derive(Debug, Clone)]
pub struct GasPriceClient {
    transport: RpcTransport,
}

impl GasPriceClient {
    pub fn new(transport: RpcTransport) -> Self {
        Self { transport }
    }

    /// Both fee fields must be present; a missing one is an error, never a zero default.
    pub async fn user_operation_gas_price(&self, tier: GasTier) -> Result<GasPrices> {
        let res = self
            .transport
            .call("pimlico_getUserOperationGasPrice", serde_json::json!([]))
            .await
            .context("pimlico_getUserOperationGasPrice failed")?;
        parse_gas_tier(&res, tier)
    }
}

fn parse_gas_tier(res: &Value, tier: GasTier) -> Result<GasPrices> {
    let t = res
        .get(tier.key())
        .filter(|v| v.is_object())
        .ok_or_else(|| anyhow!("gas price response has no '{tier}' tier: {res}"))?;

    Ok(GasPrices {
        max_fee_per_gas: parse_u256_field(t, "maxFeePerGas")
            .with_context(|| format!("'{tier}' tier is missing maxFeePerGas"))?,
        max_priority_fee_per_gas: parse_u256_field(t, "maxPriorityFeePerGas")
            .with_context(|| format!("'{tier}' tier is missing maxPriorityFeePerGas"))?,
    })
}
