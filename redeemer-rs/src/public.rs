use crate::transport::RpcTransport;
use anyhow::{anyhow, Context, Result};
use ethers::abi::AbiParser;
use ethers::contract::Contract;
use ethers::providers::{Middleware, Provider};
use ethers::types::{Address, U256};
use std::sync::Arc;

/// General-purpose chain client (eth_call, eth_getCode, eth_chainId) over the shared transport.
pub type PublicClient = Provider<RpcTransport>;

pub fn public_client(transport: RpcTransport) -> PublicClient {
    Provider::new(transport)
}

/// Non-empty bytecode at `address`. Read-only; safe to call repeatedly.
pub async fn is_contract_deployed<M: Middleware + 'static>(
    client: &M,
    address: Address,
) -> Result<bool> {
    let code = client
        .get_code(address, None)
        .await
        .context("eth_getCode failed")?;
    Ok(!code.as_ref().is_empty())
}

pub async fn fetch_chain_id<M: Middleware + 'static>(client: &M) -> Result<u64> {
    let id = client
        .get_chainid()
        .await
        .context("eth_chainId failed")?;
    u64::try_from(id).map_err(|_| anyhow!("eth_chainId returned {id}, which does not fit in u64"))
}

/// EntryPoint `getNonce(sender, 0)`.
pub async fn fetch_entrypoint_nonce<M: Middleware + 'static>(
    client: Arc<M>,
    entrypoint: Address,
    account: Address,
) -> Result<U256> {
    let entrypoint_abi = AbiParser::default()
        .parse(&["function getNonce(address sender, uint192 key) view returns (uint256)"])?;
    let entrypoint_c = Contract::new(entrypoint, entrypoint_abi, client);

    let nonce: U256 = entrypoint_c
        .method("getNonce", (account, U256::zero()))?
        .call()
        .await
        .context("entryPoint.getNonce failed")?;
    Ok(nonce)
}
