use crate::account::{assert_delegate_matches, resolve_account};
use crate::clients::build_clients;
use crate::config::ClientConfig;
use crate::delegation::Delegation;
use crate::encoding::{fmt_address, fmt_h256};
use crate::error::RedemptionError;
use crate::network::resolve_network_profile;
use crate::payload::build_redemption_calls;
use crate::submit::SubmissionEngine;
use crate::types::{RedemptionRequest, SubmissionOutcome};
use crate::validate::{validate, validate_address};
use ethers::types::H256;

/// Redeem one delegation and return the transaction hash of the confirmed UserOperation.
///
/// `signing_key` is the redeemer account owner's private key; it is never logged.
pub async fn redeem(
    request: &RedemptionRequest,
    signing_key: &str,
    config: &ClientConfig,
) -> Result<H256, RedemptionError> {
    redeem_with_outcome(request, signing_key, config)
        .await
        .map(|outcome| outcome.transaction_hash)
}

/// Like [`redeem`], returning the full [`SubmissionOutcome`].
pub async fn redeem_with_outcome(
    request: &RedemptionRequest,
    signing_key: &str,
    config: &ClientConfig,
) -> Result<SubmissionOutcome, RedemptionError> {
    validate(request)?;
    let recipient = validate_address("recipient", &request.recipient_address)?;
    let token_contract = validate_address("token contract", &request.token_contract_address)?;
    let delegation = Delegation::from_payload(request.delegation_payload.as_ref())?;

    let profile = resolve_network_profile(request.chain_id);
    tracing::info!(
        chain_id = profile.chain_id,
        network = %request.network_name,
        recipient = %fmt_address(recipient),
        token = %fmt_address(token_contract),
        "starting delegation redemption"
    );

    let clients = build_clients(&profile, config)?;
    clients.verify_chain_id().await?;

    let account = resolve_account(
        clients.general.clone(),
        signing_key,
        Some(config.implementation),
        config.deploy_salt,
        &config.account_config(),
    )
    .await?;

    assert_delegate_matches(
        &fmt_address(account.address()),
        &fmt_address(delegation.delegate),
    )?;

    let calls = build_redemption_calls(
        &delegation,
        recipient,
        token_contract,
        request.token_amount,
        request.token_decimals,
        account.address(),
    )?;

    let outcome = SubmissionEngine::new(&clients, &account, config.submit_options())
        .submit(&calls)
        .await?;

    let tx_hash = fmt_h256(outcome.transaction_hash);
    let explorer = profile.tx_url(&tx_hash).unwrap_or_default();
    tracing::info!(
        chain_id = profile.chain_id,
        %tx_hash,
        %explorer,
        attempts = outcome.attempts,
        "delegation redeemed"
    );
    Ok(outcome)
}
