//! UserOperation submission with retry and confirmation.
//!
//! Each attempt walks `FetchingGasPrice -> Submitting -> AwaitingReceipt`. Retries restart from
//! fresh gas prices. An operation that was accepted but not confirmed before the receipt
//! timeout is re-checked before the next attempt and its nonce is reused, so a resubmission can
//! replace it but never execute the transfer twice.

use crate::account::{encode_execute, stub_signature, RedeemerAccount};
use crate::bundler::UserOperationReceipt;
use crate::clients::NetworkClientSet;
use crate::encoding::{fmt_address, fmt_h256, user_op_to_json};
use crate::error::RedemptionError;
use crate::gas::GasTier;
use crate::paymaster::PaymasterFields;
use crate::public;
use crate::types::{ExecutionCall, SubmissionOutcome, UserOperation};
use ethers::types::{H256, U256};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOptions {
    pub retry_on_failure: bool,
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Hard limit on the receipt wait of one attempt.
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            retry_on_failure: true,
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(1_500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    FetchingGasPrice,
    Submitting,
    AwaitingReceipt,
}

impl AttemptStage {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStage::FetchingGasPrice => "fetching_gas_price",
            AttemptStage::Submitting => "submitting",
            AttemptStage::AwaitingReceipt => "awaiting_receipt",
        }
    }
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted by the bundler, not yet confirmed.
#[derive(Debug, Clone, Copy)]
struct PendingOp {
    hash: H256,
    nonce: U256,
}

#[derive(Debug, Default)]
struct PendingOps {
    nonce: Option<U256>,
    hashes: Vec<H256>,
}

impl PendingOps {
    fn track(&mut self, op: PendingOp) {
        self.nonce = Some(op.nonce);
        if !self.hashes.contains(&op.hash) {
            self.hashes.push(op.hash);
        }
    }

    fn clear(&mut self) {
        self.nonce = None;
        self.hashes.clear();
    }
}

struct AttemptFailure {
    stage: AttemptStage,
    error: RedemptionError,
    user_op_hash: Option<H256>,
    /// Set when the operation may still land (receipt wait timed out).
    pending: Option<PendingOp>,
}

impl AttemptFailure {
    fn at(stage: AttemptStage, error: RedemptionError) -> Self {
        Self {
            stage,
            error,
            user_op_hash: None,
            pending: None,
        }
    }
}

pub struct SubmissionEngine<'a> {
    clients: &'a NetworkClientSet,
    account: &'a RedeemerAccount,
    options: SubmitOptions,
}

impl<'a> SubmissionEngine<'a> {
    pub fn new(
        clients: &'a NetworkClientSet,
        account: &'a RedeemerAccount,
        options: SubmitOptions,
    ) -> Self {
        Self {
            clients,
            account,
            options,
        }
    }

    /// Submit `calls` as one UserOperation from the redeemer account and wait for it to land.
    pub async fn submit(&self, calls: &[ExecutionCall]) -> Result<SubmissionOutcome, RedemptionError> {
        let call_data = match encode_execute(calls) {
            Ok(data) => data,
            Err(e) => {
                let err =
                    RedemptionError::user_operation("failed to encode account execution").with_source(e);
                return Err(self.exhausted(1, None, Some(err)).await);
            }
        };

        let max_attempts = if self.options.retry_on_failure {
            self.options.max_attempts.max(1)
        } else {
            1
        };

        let chain_id = self.clients.chain_id;
        // Every op accepted under the pinned nonce; any one of them may be the one that lands.
        let mut pending = PendingOps::default();
        let mut last_hash: Option<H256> = None;
        let mut last_error: Option<RedemptionError> = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            if attempt > 1 {
                tokio::time::sleep(self.options.retry_delay).await;
            }

            if let Some((receipt, hash)) = self.recheck_pending(&mut pending).await {
                tracing::info!(
                    chain_id,
                    attempt,
                    user_op_hash = %fmt_h256(hash),
                    "previous user operation confirmed late; not resubmitting"
                );
                return Ok(self.confirmed(receipt, hash, attempt - 1).await);
            }

            match self.attempt(attempt, &call_data, pending.nonce).await {
                Ok((receipt, hash)) => return Ok(self.confirmed(receipt, hash, attempt).await),
                Err(failure) => {
                    if let Some(hash) = failure.user_op_hash {
                        last_hash = Some(hash);
                        match failure.pending {
                            Some(op) => pending.track(op),
                            // landed and reverted: the nonce is spent
                            None => pending.clear(),
                        }
                    }

                    tracing::warn!(
                        chain_id,
                        attempt,
                        max_attempts,
                        stage = %failure.stage,
                        error = %failure.error.describe(),
                        "user operation attempt failed"
                    );

                    let retryable = failure.error.is_retryable();
                    last_error = Some(failure.error);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        if let Some((receipt, hash)) = self.recheck_pending(&mut pending).await {
            tracing::info!(
                chain_id,
                user_op_hash = %fmt_h256(hash),
                "earlier user operation confirmed after the last attempt"
            );
            return Ok(self.confirmed(receipt, hash, attempts).await);
        }

        Err(self.exhausted(attempts, last_hash, last_error).await)
    }

    /// The terminal error once no attempt succeeded. Also logs the account's deployment state.
    async fn exhausted(
        &self,
        attempts: u32,
        last_hash: Option<H256>,
        last_error: Option<RedemptionError>,
    ) -> RedemptionError {
        self.diagnostic_deployment_check().await;

        let hash_str = last_hash.map(fmt_h256).unwrap_or_else(|| "N/A".to_string());
        let cause = last_error
            .as_ref()
            .map(|e| e.describe())
            .unwrap_or_else(|| "unknown error".to_string());
        let mut details = serde_json::json!({
            "userOpHash": hash_str,
            "attempts": attempts,
            "account": fmt_address(self.account.address()),
            "chainId": self.clients.chain_id,
        });
        if let Some(inner) = last_error.as_ref().and_then(|e| e.details()) {
            details["cause"] = inner.clone();
        }

        let err = RedemptionError::user_operation(format!(
            "user operation {hash_str} failed after {attempts} attempt(s): {cause}"
        ))
        .with_details(details);
        match last_error {
            Some(source) => err.with_source(source),
            None => err,
        }
    }

    async fn attempt(
        &self,
        attempt: u32,
        call_data: &ethers::types::Bytes,
        pinned_nonce: Option<U256>,
    ) -> Result<(UserOperationReceipt, H256), AttemptFailure> {
        let chain_id = self.clients.chain_id;
        let entry_point = self.account.entry_point();
        let bundler = &self.clients.bundler;

        // FetchingGasPrice
        let stage = AttemptStage::FetchingGasPrice;
        tracing::debug!(chain_id, attempt, %stage, "fetching gas price");
        let gas = self
            .clients
            .utility
            .user_operation_gas_price(GasTier::Fast)
            .await
            .map_err(|e| {
                AttemptFailure::at(
                    stage,
                    RedemptionError::network("failed to fetch gas price").with_source(e),
                )
            })?;

        // Submitting
        let stage = AttemptStage::Submitting;
        let nonce = match pinned_nonce {
            Some(n) => n,
            None => public::fetch_entrypoint_nonce(
                self.clients.general.clone(),
                entry_point,
                self.account.address(),
            )
            .await
            .map_err(|e| {
                AttemptFailure::at(
                    stage,
                    RedemptionError::network("failed to read account nonce").with_source(e),
                )
            })?,
        };
        let deployed = public::is_contract_deployed(self.clients.general.as_ref(), self.account.address())
            .await
            .map_err(|e| {
                AttemptFailure::at(
                    stage,
                    RedemptionError::network("failed to check account deployment").with_source(e),
                )
            })?;

        let mut op = UserOperation {
            sender: self.account.address(),
            nonce,
            call_data: call_data.clone(),
            max_fee_per_gas: gas.max_fee_per_gas,
            max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
            signature: stub_signature(),
            ..Default::default()
        };
        if !deployed {
            op.factory = Some(self.account.factory());
            op.factory_data = self.account.factory_data().clone();
        }

        let op_failure = |message: &str, e: anyhow::Error| {
            AttemptFailure::at(stage, RedemptionError::user_operation(message).with_source(e))
        };

        let mut stub_final = false;
        if let Some(pm) = bundler.paymaster() {
            let stub = pm
                .get_paymaster_stub_data(user_op_to_json(&op), entry_point, chain_id)
                .await
                .map_err(|e| op_failure("paymaster stub data request failed", e))?;
            stub_final = stub.is_final;
            apply_paymaster(&mut op, stub);
        }

        let est = bundler
            .estimate_user_operation_gas(user_op_to_json(&op), entry_point)
            .await
            .map_err(|e| op_failure("gas estimation failed", e))?;
        op.call_gas_limit = est.call_gas_limit;
        op.verification_gas_limit = est.verification_gas_limit;
        op.pre_verification_gas = est.pre_verification_gas;
        if let Some(v) = est.paymaster_verification_gas_limit {
            op.paymaster_verification_gas_limit = v;
        }
        if let Some(v) = est.paymaster_post_op_gas_limit {
            op.paymaster_post_op_gas_limit = v;
        }

        if let Some(pm) = bundler.paymaster().filter(|_| !stub_final) {
            let fin = pm
                .get_paymaster_data(user_op_to_json(&op), entry_point, chain_id)
                .await
                .map_err(|e| op_failure("paymaster data request failed", e))?;
            apply_paymaster(&mut op, fin);
        }

        op.signature = self
            .account
            .sign_user_operation(&op, chain_id)
            .await
            .map_err(|e| op_failure("failed to sign user operation", e))?;

        let user_op_hash = bundler
            .send_user_operation(user_op_to_json(&op), entry_point)
            .await
            .map_err(|e| op_failure("bundler rejected user operation", e))?;

        let local_hash = op.hash(entry_point, chain_id);
        if local_hash != user_op_hash {
            tracing::warn!(
                chain_id,
                bundler_hash = %fmt_h256(user_op_hash),
                local_hash = %fmt_h256(local_hash),
                "bundler returned a different userOpHash than computed locally"
            );
        }
        tracing::info!(
            chain_id,
            attempt,
            user_op_hash = %fmt_h256(user_op_hash),
            nonce = %nonce,
            "user operation submitted"
        );

        // AwaitingReceipt
        let stage = AttemptStage::AwaitingReceipt;
        let receipt = bundler
            .wait_user_operation_receipt(
                user_op_hash,
                self.options.receipt_timeout,
                self.options.poll_interval,
            )
            .await
            .map_err(|e| AttemptFailure {
                stage,
                error: RedemptionError::user_operation("user operation receipt not received in time")
                    .with_details(serde_json::json!({ "userOpHash": fmt_h256(user_op_hash) }))
                    .with_source(e),
                user_op_hash: Some(user_op_hash),
                pending: Some(PendingOp {
                    hash: user_op_hash,
                    nonce,
                }),
            })?;

        if !receipt.success {
            return Err(AttemptFailure {
                stage,
                error: reverted_error(&receipt),
                user_op_hash: Some(user_op_hash),
                pending: None,
            });
        }

        Ok((receipt, user_op_hash))
    }

    /// Look up every pending op. Returns the first confirmed one; a reverted one spends the
    /// nonce, so the set is cleared and the next attempt reads a fresh nonce.
    async fn recheck_pending(&self, pending: &mut PendingOps) -> Option<(UserOperationReceipt, H256)> {
        for hash in pending.hashes.clone() {
            match self.clients.bundler.get_user_operation_receipt(hash).await {
                Ok(Some(receipt)) if receipt.success => return Some((receipt, hash)),
                Ok(Some(receipt)) => {
                    tracing::warn!(
                        chain_id = self.clients.chain_id,
                        user_op_hash = %fmt_h256(hash),
                        error = %reverted_error(&receipt),
                        "previous user operation reverted; resubmitting with a fresh nonce"
                    );
                    pending.clear();
                    return None;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    user_op_hash = %fmt_h256(hash),
                    error = %e,
                    "could not re-check previous user operation; keeping its nonce"
                ),
            }
        }
        None
    }

    async fn confirmed(
        &self,
        receipt: UserOperationReceipt,
        user_op_hash: H256,
        attempts: u32,
    ) -> SubmissionOutcome {
        let outcome = SubmissionOutcome {
            transaction_hash: receipt.receipt.transaction_hash,
            user_op_hash,
            success: true,
            block_number: receipt.receipt.block_number.as_u64(),
            gas_used: receipt.actual_gas_used.unwrap_or(receipt.receipt.gas_used),
            attempts: attempts.max(1),
        };

        tracing::info!(
            chain_id = self.clients.chain_id,
            user_op_hash = %fmt_h256(user_op_hash),
            tx_hash = %fmt_h256(outcome.transaction_hash),
            block = outcome.block_number,
            "user operation confirmed"
        );

        self.post_submission_check().await;
        outcome
    }

    /// Observability only: a lagging deployment flag after a confirmed op is not an error.
    async fn post_submission_check(&self) {
        match self.account.is_deployed(self.clients.general.as_ref()).await {
            Ok(true) => tracing::debug!(
                account = %fmt_address(self.account.address()),
                "account deployed (reconciled with on-chain bytecode)"
            ),
            Ok(false) => tracing::warn!(
                account = %fmt_address(self.account.address()),
                "user operation confirmed but account bytecode is not visible yet"
            ),
            Err(e) => tracing::warn!(error = %e.describe(), "post-submission deployment check failed"),
        }
    }

    async fn diagnostic_deployment_check(&self) {
        match self.account.is_deployed(self.clients.general.as_ref()).await {
            Ok(deployed) => tracing::info!(
                account = %fmt_address(self.account.address()),
                deployed,
                "redeemer account state after failed submission"
            ),
            Err(e) => tracing::debug!(error = %e.describe(), "diagnostic deployment check failed"),
        }
    }
}

fn apply_paymaster(op: &mut UserOperation, fields: PaymasterFields) {
    op.paymaster = Some(fields.paymaster);
    op.paymaster_data = fields.paymaster_data;
    if let Some(v) = fields.paymaster_verification_gas_limit {
        op.paymaster_verification_gas_limit = v;
    }
    if let Some(v) = fields.paymaster_post_op_gas_limit {
        op.paymaster_post_op_gas_limit = v;
    }
}

fn reverted_error(receipt: &UserOperationReceipt) -> RedemptionError {
    RedemptionError::user_operation("user operation reverted on-chain").with_details(
        serde_json::json!({
            "userOpHash": fmt_h256(receipt.user_op_hash),
            "transactionHash": fmt_h256(receipt.receipt.transaction_hash),
            "reason": receipt.reason,
            "receipt": receipt.raw,
        }),
    )
}
