use crate::encoding::{fmt_address, fmt_h256, parse_h256, parse_u256_field};
use crate::paymaster::PaymasterClient;
use crate::transport::RpcTransport;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, H256, U256, U64};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// ERC-4337 bundler JSON-RPC client, optionally bound to a paymaster.
#[derive(Debug, Clone)]
pub struct BundlerClient {
    transport: RpcTransport,
    paymaster: Option<PaymasterClient>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// `eth_getUserOperationReceipt` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub success: bool,
    #[serde(default)]
    pub actual_gas_used: Option<U256>,
    #[serde(default)]
    pub reason: Option<String>,
    pub receipt: TransactionReceiptSummary,
    /// The receipt exactly as the bundler returned it, for diagnostics.
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceiptSummary {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_number: U64,
    #[serde(default)]
    pub gas_used: U256,
}

impl BundlerClient {
    pub fn new(transport: RpcTransport) -> Self {
        Self {
            transport,
            paymaster: None,
        }
    }

    pub fn with_paymaster(mut self, paymaster: PaymasterClient) -> Self {
        self.paymaster = Some(paymaster);
        self
    }

    pub fn paymaster(&self) -> Option<&PaymasterClient> {
        self.paymaster.as_ref()
    }

    pub async fn supported_entry_points(&self) -> Result<Vec<Address>> {
        let res = self
            .rpc("eth_supportedEntryPoints", serde_json::json!([]))
            .await
            .context("eth_supportedEntryPoints failed")?;
        serde_json::from_value(res).context("unexpected eth_supportedEntryPoints result")
    }

    pub async fn estimate_user_operation_gas(
        &self,
        user_op: Value,
        entrypoint: Address,
    ) -> Result<GasEstimates> {
        let params = serde_json::json!([user_op, fmt_address(entrypoint)]);
        let res = self
            .rpc("eth_estimateUserOperationGas", params)
            .await
            .context("eth_estimateUserOperationGas failed")?;
        parse_gas_estimates(&res)
    }

    pub async fn send_user_operation(&self, user_op: Value, entrypoint: Address) -> Result<H256> {
        let params = serde_json::json!([user_op, fmt_address(entrypoint)]);
        let res = self
            .rpc("eth_sendUserOperation", params)
            .await
            .context("eth_sendUserOperation failed")?;
        parse_userop_hash(&res)
    }

    /// Single receipt poll; `None` while the operation is not yet included.
    pub async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>> {
        let params = serde_json::json!([fmt_h256(user_op_hash)]);
        let res = self
            .rpc("eth_getUserOperationReceipt", params)
            .await
            .context("eth_getUserOperationReceipt failed")?;
        if res.is_null() {
            return Ok(None);
        }
        parse_receipt(res).map(Some)
    }

    /// Poll for a receipt until `timeout` elapses. The timeout is hard: on expiry this returns
    /// an error even if the operation might still land later.
    pub async fn wait_user_operation_receipt(
        &self,
        user_op_hash: H256,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<UserOperationReceipt> {
        let poll = async {
            loop {
                match self.get_user_operation_receipt(user_op_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => {
                        // transient errors are common on free-tier bundlers; keep polling
                        tracing::warn!(error = %e, user_op_hash = %fmt_h256(user_op_hash), "bundler receipt poll error");
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| anyhow!("timed out waiting for userOp receipt after {:?}", timeout))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        Ok(self.transport.call(method, params).await?)
    }
}

fn parse_gas_estimates(res: &Value) -> Result<GasEstimates> {
    let optional = |key: &str| -> Result<Option<U256>> {
        match res.get(key) {
            Some(v) if !v.is_null() => parse_u256_field(res, key).map(Some),
            _ => Ok(None),
        }
    };

    Ok(GasEstimates {
        call_gas_limit: parse_u256_field(res, "callGasLimit")?,
        verification_gas_limit: parse_u256_field(res, "verificationGasLimit")?,
        pre_verification_gas: parse_u256_field(res, "preVerificationGas")?,
        paymaster_verification_gas_limit: optional("paymasterVerificationGasLimit")?,
        paymaster_post_op_gas_limit: optional("paymasterPostOpGasLimit")?,
    })
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string.
    // Alchemy's docs (and sometimes responses) wrap it in an object: { "result": "0x..." }.
    // Accept both shapes for maximum compatibility.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(anyhow!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {}",
            res
        ));
    };

    parse_h256(hash_str)
}

fn parse_receipt(res: Value) -> Result<UserOperationReceipt> {
    let mut receipt: UserOperationReceipt = serde_json::from_value(res.clone())
        .with_context(|| format!("unexpected eth_getUserOperationReceipt result: {res}"))?;
    receipt.raw = res;
    Ok(receipt)
}
