use crate::delegation::{
    encode_permission_context, encode_redeem_delegations, encode_single_execution, Delegation,
    ExecutionMode,
};
use crate::error::RedemptionError;
use crate::types::{ExecutionCall, TokenAmount};
use anyhow::{anyhow, bail, Context};
use ethers::abi::AbiEncode;
use ethers::contract::abigen;
use ethers::types::{Address, Bytes, U256};
use ethers::utils::parse_units;

// Only the transfer call is needed to build the redeemed execution.
abigen!(
    Erc20,
    r#"[
        function transfer(address to, uint256 amount) returns (bool)
    ]"#
);

/// One entry of a batch redemption.
#[derive(Debug, Clone)]
pub struct BatchRedemption {
    pub delegation: Delegation,
    pub recipient: Address,
    pub token_contract: Address,
    pub amount: TokenAmount,
    pub decimals: u32,
}

/// Normalize an amount to an exact integer in the token's smallest unit.
///
/// Exact integers pass through untouched. Scaled numbers are divided by `10^decimals`, printed
/// with `decimals` fractional digits and parsed back, so float noise below the smallest unit is
/// rounded away instead of truncated.
pub fn prepare_token_amount(amount: TokenAmount, decimals: u32) -> Result<U256, RedemptionError> {
    normalize_amount(amount, decimals).map_err(payload_error)
}

fn normalize_amount(amount: TokenAmount, decimals: u32) -> anyhow::Result<U256> {
    match amount {
        TokenAmount::Exact(v) => Ok(v),
        TokenAmount::Scaled(x) => {
            if decimals == 0 {
                bail!("token decimals must be positive");
            }
            if !x.is_finite() || x < 0.0 {
                bail!("token amount {x} is not a non-negative finite number");
            }
            let human = x / 10f64.powi(decimals as i32);
            let fixed = format!("{:.*}", decimals as usize, human);
            let parsed = parse_units(&fixed, decimals)
                .with_context(|| format!("failed to parse token amount {fixed}"))?;
            Ok(parsed.into())
        }
    }
}

/// `transfer(recipient, amount)` calldata.
pub fn encode_transfer(recipient: Address, amount: U256) -> Bytes {
    Bytes::from(
        TransferCall {
            to: recipient,
            amount,
        }
        .encode(),
    )
}

/// Calls that redeem `delegation` to move `amount` of `token_contract` to `recipient`.
///
/// Returns exactly one call, targeting the redeemer account itself: its `redeemDelegations`
/// entry point validates the delegation chain and executes the transfer on the delegator's
/// behalf.
pub fn build_redemption_calls(
    delegation: &Delegation,
    recipient: Address,
    token_contract: Address,
    amount: TokenAmount,
    decimals: u32,
    redeemer: Address,
) -> Result<Vec<ExecutionCall>, RedemptionError> {
    let call = redemption_call(delegation, recipient, token_contract, amount, decimals, redeemer)
        .map_err(payload_error)?;
    Ok(vec![call])
}

/// Batch form of [`build_redemption_calls`], one call per entry.
///
/// Empty input yields a single no-op placeholder call (`to: 0x0, value: 0, data: 0x`) so callers
/// can rely on at least one call.
pub fn build_batch_redemption_calls(
    redemptions: &[BatchRedemption],
    redeemer: Address,
) -> Result<Vec<ExecutionCall>, RedemptionError> {
    if redemptions.is_empty() {
        tracing::warn!("empty batch redemption; returning placeholder call");
        return Ok(vec![ExecutionCall::new(Address::zero(), Bytes::new())]);
    }

    redemptions
        .iter()
        .map(|r| {
            redemption_call(
                &r.delegation,
                r.recipient,
                r.token_contract,
                r.amount,
                r.decimals,
                redeemer,
            )
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(payload_error)
}

fn redemption_call(
    delegation: &Delegation,
    recipient: Address,
    token_contract: Address,
    amount: TokenAmount,
    decimals: u32,
    redeemer: Address,
) -> anyhow::Result<ExecutionCall> {
    if decimals == 0 {
        return Err(anyhow!("token decimals must be positive"));
    }
    let amount = normalize_amount(amount, decimals)?;

    let transfer = ExecutionCall::new(token_contract, encode_transfer(recipient, amount));
    let context = encode_permission_context(std::slice::from_ref(delegation));
    let calldata = encode_redeem_delegations(
        &[context],
        &[ExecutionMode::SingleDefault],
        &[encode_single_execution(&transfer)],
    )?;

    Ok(ExecutionCall::new(redeemer, calldata))
}

fn payload_error(e: anyhow::Error) -> RedemptionError {
    RedemptionError::user_operation("failed to prepare redemption payload").with_source(e)
}
