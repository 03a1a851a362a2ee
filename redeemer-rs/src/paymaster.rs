use crate::encoding::{self, parse_address, parse_bytes};
use crate::transport::RpcTransport;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, Bytes, U256};
use serde_json::Value;

/// Minimal ERC-7677 paymaster web service client.
///
/// `pm_getPaymasterStubData` is used before gas estimation and `pm_getPaymasterData` after,
/// so the engine stays vendor-portable.
#[derive(Debug, Clone)]
pub struct PaymasterClient {
    transport: RpcTransport,
    context: Value,
}

/// v0.7 paymaster fields to merge into a UserOperation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterFields {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
    /// Stub data flagged final needs no `pm_getPaymasterData` round trip.
    pub is_final: bool,
}

impl PaymasterClient {
    pub fn new(transport: RpcTransport, context: Option<Value>) -> Self {
        Self {
            transport,
            context: context.unwrap_or_else(|| serde_json::json!({})),
        }
    }

    pub async fn get_paymaster_stub_data(
        &self,
        user_op: Value,
        entrypoint: Address,
        chain_id: u64,
    ) -> Result<PaymasterFields> {
        let params = self.build_params(user_op, entrypoint, chain_id);
        let res = self
            .transport
            .call("pm_getPaymasterStubData", params)
            .await
            .context("pm_getPaymasterStubData RPC failed")?;
        parse_v07_paymaster_fields(&res)
    }

    pub async fn get_paymaster_data(
        &self,
        user_op: Value,
        entrypoint: Address,
        chain_id: u64,
    ) -> Result<PaymasterFields> {
        let params = self.build_params(user_op, entrypoint, chain_id);
        let res = self
            .transport
            .call("pm_getPaymasterData", params)
            .await
            .context("pm_getPaymasterData RPC failed")?;
        parse_v07_paymaster_fields(&res)
    }

    fn build_params(&self, user_op: Value, entrypoint: Address, chain_id: u64) -> Value {
        serde_json::json!([
            user_op,
            encoding::fmt_address(entrypoint),
            encoding::fmt_u256(U256::from(chain_id)),
            self.context
        ])
    }
}

fn parse_v07_paymaster_fields(result: &Value) -> Result<PaymasterFields> {
    // ERC-7677 returns v0.7 fields at the top level:
    //   { "paymaster": "0x...", "paymasterData": "0x...", ... }
    // Alchemy wraps per-entrypoint responses:
    //   { "entrypointV07Response": { "paymaster": "0x...", ... }, "entrypointV06Response": { ... } }
    let obj = if result.get("paymaster").is_some() {
        result
    } else {
        result
            .get("entrypointV07Response")
            .or_else(|| result.get("entryPointV07Response"))
            .ok_or_else(|| {
                anyhow!(
                    "missing paymaster (expected top-level paymaster or entrypointV07Response.paymaster)"
                )
            })?
    };

    let paymaster = obj
        .get("paymaster")
        .and_then(|x| x.as_str())
        .ok_or_else(|| anyhow!("missing paymaster field"))
        .and_then(parse_address)
        .context("invalid paymaster address")?;

    let paymaster_data = match obj.get("paymasterData").and_then(|x| x.as_str()) {
        Some(s) => parse_bytes(s).context("invalid hex in paymasterData")?,
        None => Bytes::new(),
    };

    let optional = |key: &str| -> Result<Option<U256>> {
        match obj.get(key) {
            Some(v) if !v.is_null() => encoding::parse_u256_value(v)
                .with_context(|| format!("invalid {key}"))
                .map(Some),
            _ => Ok(None),
        }
    };

    Ok(PaymasterFields {
        paymaster,
        paymaster_data,
        paymaster_verification_gas_limit: optional("paymasterVerificationGasLimit")?,
        paymaster_post_op_gas_limit: optional("paymasterPostOpGasLimit")?,
        is_final: obj.get("isFinal").and_then(|x| x.as_bool()).unwrap_or(false),
    })
}
