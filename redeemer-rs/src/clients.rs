use crate::bundler::BundlerClient;
use crate::config::{redact_url, ClientConfig};
use crate::error::RedemptionError;
use crate::gas::GasPriceClient;
use crate::network::NetworkProfile;
use crate::paymaster::PaymasterClient;
use crate::public::{self, PublicClient};
use crate::transport::RpcTransport;
use anyhow::Context;
use std::sync::Arc;

/// The three cooperating clients for one chain. Owned by whoever built it; not shared across
/// chains.
#[derive(Debug, Clone)]
pub struct NetworkClientSet {
    pub chain_id: u64,
    /// Reads chain state; also backs the post-submission deployment checks.
    pub general: Arc<PublicClient>,
    /// Submits and polls UserOperations; carries the paymaster client when sponsoring gas.
    pub bundler: BundlerClient,
    /// Recommended UserOperation gas prices.
    pub utility: GasPriceClient,
}

impl NetworkClientSet {
    /// Fails with a Network error when the RPC endpoint serves a different chain.
    pub async fn verify_chain_id(&self) -> Result<(), RedemptionError> {
        let remote = public::fetch_chain_id(self.general.as_ref())
            .await
            .map_err(|e| {
                RedemptionError::network("failed to read chain id from RPC endpoint")
                    .with_details(serde_json::json!({ "chainId": self.chain_id }))
                    .with_source(e)
            })?;
        if remote != self.chain_id {
            return Err(RedemptionError::network(format!(
                "RPC endpoint serves chain {remote}, expected {}",
                self.chain_id
            ))
            .with_details(serde_json::json!({ "chainId": self.chain_id, "remoteChainId": remote })));
        }
        Ok(())
    }
}

/// Build general, paymaster, bundler and gas-utility clients, in that order.
///
/// Any failure is reported as a single Network error; a partially built set is never returned.
pub fn build_clients(
    profile: &NetworkProfile,
    config: &ClientConfig,
) -> Result<NetworkClientSet, RedemptionError> {
    let endpoints = config.endpoints_for(profile);

    let built = (|| -> anyhow::Result<NetworkClientSet> {
        let general = RpcTransport::new(&endpoints.rpc_url).context("general RPC client")?;
        let general = Arc::new(public::public_client(general));

        let paymaster = if config.sponsor_gas {
            let transport =
                RpcTransport::new(&endpoints.paymaster_url).context("paymaster client")?;
            Some(PaymasterClient::new(
                transport,
                config.paymaster_context.clone(),
            ))
        } else {
            None
        };

        let mut bundler =
            BundlerClient::new(RpcTransport::new(&endpoints.bundler_url).context("bundler client")?);
        if let Some(pm) = paymaster {
            bundler = bundler.with_paymaster(pm);
        }

        let utility = GasPriceClient::new(
            RpcTransport::new(&endpoints.gas_price_url).context("gas price client")?,
        );

        Ok(NetworkClientSet {
            chain_id: profile.chain_id,
            general,
            bundler,
            utility,
        })
    })();

    match built {
        Ok(set) => {
            tracing::debug!(
                chain_id = profile.chain_id,
                network = %profile.display_name,
                rpc = %redact_url(&endpoints.rpc_url),
                bundler = %redact_url(&endpoints.bundler_url),
                sponsored = config.sponsor_gas,
                "blockchain clients ready"
            );
            Ok(set)
        }
        Err(e) => Err(RedemptionError::network("failed to initialize blockchain clients")
            .with_details(serde_json::json!({
                "chainId": profile.chain_id,
                "network": profile.display_name,
            }))
            .with_source(e)),
    }
}
