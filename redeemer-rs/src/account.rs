//! Redeemer smart account: key handling, counterfactual address derivation, ERC-7579 call
//! wrapping and UserOperation signing.

use crate::delegation::{encode_execution, ExecutionMode};
use crate::encoding::{fmt_address, parse_address};
use crate::error::RedemptionError;
use crate::public;
use crate::types::{ExecutionCall, UserOperation};
use anyhow::{anyhow, Context};
use ethers::abi::{self, AbiParser, Token};
use ethers::contract::Contract;
use ethers::providers::Middleware;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Smart account implementation variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Implementation {
    /// Owner key plus optional passkeys.
    #[default]
    #[serde(alias = "hybrid")]
    Hybrid,
    /// Threshold multisig, used here with a single signer and threshold 1.
    #[serde(alias = "multisig", alias = "multiSig")]
    MultiSig,
}

impl FromStr for Implementation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Implementation::Hybrid),
            "multisig" | "multi-sig" | "multi_sig" => Ok(Implementation::MultiSig),
            other => Err(anyhow!(
                "unknown implementation '{other}' (expected hybrid or multisig)"
            )),
        }
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Implementation::Hybrid => f.write_str("Hybrid"),
            Implementation::MultiSig => f.write_str("MultiSig"),
        }
    }
}

/// Addresses needed to derive and drive redeemer accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub entry_point: Address,
    pub hybrid_factory: Option<Address>,
    pub multisig_factory: Option<Address>,
}

impl AccountConfig {
    fn factory_for(&self, implementation: Implementation) -> Option<Address> {
        match implementation {
            Implementation::Hybrid => self.hybrid_factory,
            Implementation::MultiSig => self.multisig_factory,
        }
    }
}

/// A smart account bound to one signing key and one implementation variant.
#[derive(Clone)]
pub struct RedeemerAccount {
    wallet: LocalWallet,
    address: Address,
    implementation: Implementation,
    entry_point: Address,
    factory: Address,
    factory_data: Bytes,
}

// The wallet holds key material; only print what is public.
impl fmt::Debug for RedeemerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedeemerAccount")
            .field("address", &self.address)
            .field("owner", &self.wallet.address())
            .field("implementation", &self.implementation)
            .field("factory", &self.factory)
            .finish()
    }
}

impl RedeemerAccount {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.wallet.address()
    }

    pub fn implementation(&self) -> Implementation {
        self.implementation
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    /// `createAccount(..)` calldata for the factory, sent as `factoryData` until deployed.
    pub fn factory_data(&self) -> &Bytes {
        &self.factory_data
    }

    pub async fn is_deployed<M: Middleware + 'static>(
        &self,
        client: &M,
    ) -> Result<bool, RedemptionError> {
        public::is_contract_deployed(client, self.address)
            .await
            .map_err(|e| {
                RedemptionError::smart_account("failed to check account deployment")
                    .with_details(serde_json::json!({ "account": fmt_address(self.address) }))
                    .with_source(e)
            })
    }

    /// EIP-191 signature over the v0.7 userOpHash.
    pub async fn sign_user_operation(
        &self,
        op: &UserOperation,
        chain_id: u64,
    ) -> anyhow::Result<Bytes> {
        let user_op_hash = op.hash(self.entry_point, chain_id);
        let sig = self
            .wallet
            .sign_message(user_op_hash.as_bytes())
            .await
            .context("failed to sign userOpHash")?;
        Ok(Bytes::from(sig.to_vec()))
    }
}

/// Placeholder ECDSA signature used for gas estimation: right length, recoverable shape,
/// never valid.
pub fn stub_signature() -> Bytes {
    let mut sig = Vec::with_capacity(65);
    sig.extend_from_slice(&[0xff; 15]);
    sig.push(0xf0);
    sig.extend_from_slice(&[0u8; 16]);
    sig.push(0x7a);
    sig.extend_from_slice(&[0xaa; 31]);
    sig.push(0x1c);
    Bytes::from(sig)
}

/// Accepts 64 hex characters with or without a `0x` prefix. The key itself never appears in
/// the error.
pub fn normalize_private_key(signing_key: &str) -> Result<String, RedemptionError> {
    let trimmed = signing_key.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RedemptionError::validation("invalid private key format"));
    }
    Ok(hex_part.to_ascii_lowercase())
}

/// Derive the redeemer account for `signing_key`.
///
/// The address comes from the variant's factory (`getAddress`), so it matches what the factory
/// will deploy. `implementation` defaults to Hybrid and `deploy_salt` to zero.
pub async fn resolve_account<M: Middleware + 'static>(
    client: Arc<M>,
    signing_key: &str,
    implementation: Option<Implementation>,
    deploy_salt: Option<U256>,
    config: &AccountConfig,
) -> Result<RedeemerAccount, RedemptionError> {
    let key = normalize_private_key(signing_key)?;
    let wallet = LocalWallet::from_str(&key)
        .map_err(|_| RedemptionError::validation("invalid private key format"))?;

    let implementation = implementation.unwrap_or_default();
    let salt = deploy_salt.unwrap_or_default();
    let owner = wallet.address();

    let factory = config.factory_for(implementation).ok_or_else(|| {
        RedemptionError::smart_account(format!(
            "no factory configured for {implementation} accounts"
        ))
    })?;

    let (address, factory_data) = derive_counterfactual(client, implementation, factory, owner, salt)
        .await
        .map_err(|e| {
            RedemptionError::smart_account("failed to derive redeemer account address")
                .with_details(serde_json::json!({
                    "implementation": implementation.to_string(),
                    "factory": fmt_address(factory),
                    "owner": fmt_address(owner),
                }))
                .with_source(e)
        })?;

    tracing::debug!(
        account = %fmt_address(address),
        owner = %fmt_address(owner),
        %implementation,
        "resolved redeemer account"
    );

    Ok(RedeemerAccount {
        wallet,
        address,
        implementation,
        entry_point: config.entry_point,
        factory,
        factory_data,
    })
}

async fn derive_counterfactual<M: Middleware + 'static>(
    client: Arc<M>,
    implementation: Implementation,
    factory: Address,
    owner: Address,
    salt: U256,
) -> anyhow::Result<(Address, Bytes)> {
    match implementation {
        Implementation::Hybrid => {
            let factory_abi = AbiParser::default().parse(&[
                "function getAddress(address owner, uint256 salt) view returns (address)",
                "function createAccount(address owner, uint256 salt) returns (address)",
            ])?;
            let factory_c = Contract::new(factory, factory_abi, client);
            let account: Address = factory_c
                .method("getAddress", (owner, salt))?
                .call()
                .await
                .context("factory.getAddress failed")?;
            let create = factory_c
                .method::<_, Address>("createAccount", (owner, salt))?
                .calldata()
                .ok_or_else(|| anyhow!("failed to build createAccount calldata"))?;
            Ok((account, create))
        }
        Implementation::MultiSig => {
            let factory_abi = AbiParser::default().parse(&[
                "function getAddress(address[] signers, uint256 threshold, uint256 salt) view returns (address)",
                "function createAccount(address[] signers, uint256 threshold, uint256 salt) returns (address)",
            ])?;
            let factory_c = Contract::new(factory, factory_abi, client);
            let args = (vec![owner], U256::one(), salt);
            let account: Address = factory_c
                .method("getAddress", args.clone())?
                .call()
                .await
                .context("factory.getAddress failed")?;
            let create = factory_c
                .method::<_, Address>("createAccount", args)?
                .calldata()
                .ok_or_else(|| anyhow!("failed to build createAccount calldata"))?;
            Ok((account, create))
        }
    }
}

/// Hard precondition before submission: the redeemer must be the delegation's delegate.
/// Comparison is case-insensitive.
pub fn assert_delegate_matches(
    account_address: &str,
    delegate_address: &str,
) -> Result<(), RedemptionError> {
    let account = parse_address(account_address.trim()).map_err(|e| {
        RedemptionError::validation("invalid redeemer account address format")
            .with_details(serde_json::json!({ "address": account_address }))
            .with_source(e)
    })?;
    let delegate = parse_address(delegate_address.trim()).map_err(|e| {
        RedemptionError::validation("invalid delegate address format")
            .with_details(serde_json::json!({ "address": delegate_address }))
            .with_source(e)
    })?;

    if account != delegate {
        return Err(RedemptionError::delegation(format!(
            "redeemer account {} is not the delegation's delegate {}",
            fmt_address(account),
            fmt_address(delegate)
        ))
        .with_details(serde_json::json!({
            "redeemer": fmt_address(account),
            "delegate": fmt_address(delegate),
        })));
    }
    Ok(())
}

/// UserOperation callData: the account's ERC-7579 `execute(bytes32 mode, bytes executionCalldata)`.
pub fn encode_execute(calls: &[ExecutionCall]) -> anyhow::Result<Bytes> {
    let mode = ExecutionMode::for_calls(calls);
    let execution = encode_execution(mode, calls)?;

    let mut out = id("execute(bytes32,bytes)").to_vec();
    out.extend_from_slice(&abi::encode(&[
        Token::FixedBytes(mode.to_bytes32().to_vec()),
        Token::Bytes(execution.to_vec()),
    ]));
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::public::public_client;
    use crate::transport::RpcTransport;
    use ethers::abi::ParamType;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Well-known anvil/hardhat dev key #0.
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_OWNER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn account_config() -> AccountConfig {
        AccountConfig {
            entry_point: Address::from_str(crate::config::ENTRY_POINT_V07).unwrap(),
            hybrid_factory: Some(Address::repeat_byte(0xfa)),
            multisig_factory: None,
        }
    }

    #[test]
    fn private_key_normalization() {
        assert_eq!(normalize_private_key(DEV_KEY).unwrap(), DEV_KEY);
        assert_eq!(normalize_private_key(&format!("0x{DEV_KEY}")).unwrap(), DEV_KEY);
        assert_eq!(
            normalize_private_key(&DEV_KEY.to_uppercase()).unwrap(),
            DEV_KEY
        );

        let bad_keys = vec![
            String::new(),
            "0x".to_string(),
            DEV_KEY[..63].to_string(),
            format!("{DEV_KEY}00"),
            DEV_KEY.replace('a', "g"),
        ];
        for bad in &bad_keys {
            let err = normalize_private_key(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(err.message(), "invalid private key format");
        }
    }

    #[test]
    fn delegate_match_is_case_insensitive() {
        let lower = "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd";
        let upper = "0xABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD";
        assert!(assert_delegate_matches(lower, upper).is_ok());
        assert!(assert_delegate_matches(lower, lower).is_ok());
    }

    #[test]
    fn delegate_mismatch_names_both_addresses() {
        let a = "0x1111111111111111111111111111111111111111";
        let b = "0x2222222222222222222222222222222222222222";
        let err = assert_delegate_matches(a, b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Delegation);
        assert!(err.message().contains(a));
        assert!(err.message().contains(b));
        assert!(!err.is_retryable());
    }

    #[test]
    fn malformed_delegate_is_validation() {
        let err =
            assert_delegate_matches("0x1111111111111111111111111111111111111111", "0x12").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn execute_wraps_single_call_in_default_mode() {
        let call = ExecutionCall::new(Address::repeat_byte(0x11), Bytes::from(vec![0xde, 0xad]));
        let data = encode_execute(&[call.clone()]).unwrap();
        assert_eq!(&data[..4], &[0xe9, 0xae, 0x5c, 0x53]);

        let decoded =
            abi::decode(&[ParamType::FixedBytes(32), ParamType::Bytes], &data[4..]).unwrap();
        assert_eq!(decoded[0], Token::FixedBytes(vec![0u8; 32]));
        assert_eq!(
            decoded[1],
            Token::Bytes(crate::delegation::encode_single_execution(&call).to_vec())
        );
    }

    #[test]
    fn execute_uses_batch_mode_for_several_calls() {
        let calls = vec![
            ExecutionCall::new(Address::repeat_byte(0x11), Bytes::new()),
            ExecutionCall::new(Address::repeat_byte(0x22), Bytes::new()),
        ];
        let data = encode_execute(&calls).unwrap();
        assert_eq!(data[4], 0x01);
        assert!(encode_execute(&[]).is_err());
    }

    #[test]
    fn stub_signature_is_65_bytes() {
        let sig = stub_signature();
        assert_eq!(sig.len(), 65);
        assert_eq!(sig[64], 0x1c);
    }

    #[tokio::test]
    async fn resolve_derives_address_from_factory() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_call",
                "params": [{ "to": "0xfafafafafafafafafafafafafafafafafafafafa" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0x000000000000000000000000cccccccccccccccccccccccccccccccccccccccc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Arc::new(public_client(RpcTransport::new(&server.uri()).unwrap()));
        let account = resolve_account(client, DEV_KEY, None, None, &account_config())
            .await
            .unwrap();

        assert_eq!(account.address(), Address::repeat_byte(0xcc));
        assert_eq!(account.owner(), parse_address(DEV_OWNER).unwrap());
        assert_eq!(account.implementation(), Implementation::Hybrid);
        assert_eq!(account.factory(), Address::repeat_byte(0xfa));
        // createAccount(owner, 0)
        assert_eq!(account.factory_data().len(), 4 + 64);
        assert!(!format!("{account:?}").contains(DEV_KEY));
    }

    #[tokio::test]
    async fn missing_factory_is_smart_account_error() {
        let client = Arc::new(public_client(RpcTransport::new("http://127.0.0.1:9").unwrap()));
        let err = resolve_account(
            client,
            DEV_KEY,
            Some(Implementation::MultiSig),
            None,
            &account_config(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SmartAccount);
    }

    #[tokio::test]
    async fn signature_recovers_to_owner() {
        let wallet = LocalWallet::from_str(DEV_KEY).unwrap();
        let account = RedeemerAccount {
            wallet,
            address: Address::repeat_byte(0xcc),
            implementation: Implementation::Hybrid,
            entry_point: account_config().entry_point,
            factory: Address::repeat_byte(0xfa),
            factory_data: Bytes::new(),
        };
        let op = UserOperation {
            sender: account.address(),
            ..Default::default()
        };
        let sig = account.sign_user_operation(&op, 84532).await.unwrap();
        assert_eq!(sig.len(), 65);

        let signature = ethers::types::Signature::try_from(sig.as_ref()).unwrap();
        let hash = op.hash(account.entry_point(), 84532);
        let recovered = signature.recover(hash.as_bytes()).unwrap();
        assert_eq!(recovered, account.owner());
    }

    #[test]
    fn implementation_parsing() {
        assert_eq!("hybrid".parse::<Implementation>().unwrap(), Implementation::Hybrid);
        assert_eq!("MultiSig".parse::<Implementation>().unwrap(), Implementation::MultiSig);
        assert!("eoa".parse::<Implementation>().is_err());
        let v: Implementation = serde_json::from_value(json!("MultiSig")).unwrap();
        assert_eq!(v, Implementation::MultiSig);
    }
}
