use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One redemption as requested by the billing backend. Immutable once built.
///
/// Addresses stay as strings here: the validator owns the "well-formed, non-zero" decision and
/// reports it per role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRequest {
    /// Signed delegation, either the ABI-encoded tuple or its JSON form.
    pub delegation_payload: Bytes,
    pub recipient_address: String,
    pub token_contract_address: String,
    pub token_amount: TokenAmount,
    pub token_decimals: u32,
    pub chain_id: u64,
    /// Display only.
    pub network_name: String,
}

/// A token amount in the token's smallest unit.
///
/// Upstream systems sometimes hand over a floating-point number instead of an exact integer;
/// `Scaled` keeps that form until it is normalized by [`crate::payload::prepare_token_amount`].
///
/// On input, JSON integers and integer strings (decimal or `0x` hex) are `Exact`; only numbers
/// with a fractional part or exponent become `Scaled`. Integers above `u64::MAX` must be sent
/// as strings, since JSON numbers that large arrive as floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TokenAmount {
    Exact(U256),
    Scaled(f64),
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TokenAmountVisitor)
    }
}

struct TokenAmountVisitor;

impl<'de> Visitor<'de> for TokenAmountVisitor {
    type Value = TokenAmount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a token amount as a number, a decimal string or a 0x-prefixed hex string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<TokenAmount, E> {
        Ok(TokenAmount::Exact(U256::from(v)))
    }

    // negative amounts are kept so validation can reject them by value
    fn visit_i64<E: de::Error>(self, v: i64) -> Result<TokenAmount, E> {
        match u64::try_from(v) {
            Ok(v) => self.visit_u64(v),
            Err(_) => Ok(TokenAmount::Scaled(v as f64)),
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<TokenAmount, E> {
        Ok(TokenAmount::Scaled(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TokenAmount, E> {
        let s = v.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return U256::from_str_radix(hex, 16)
                .map(TokenAmount::Exact)
                .map_err(|e| E::custom(format!("invalid hex token amount '{s}': {e}")));
        }
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return U256::from_dec_str(s)
                .map(TokenAmount::Exact)
                .map_err(|e| E::custom(format!("invalid token amount '{s}': {e}")));
        }
        s.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(TokenAmount::Scaled)
            .ok_or_else(|| E::custom(format!("invalid token amount '{s}'")))
    }
}

impl From<U256> for TokenAmount {
    fn from(v: U256) -> Self {
        TokenAmount::Exact(v)
    }
}

impl From<u64> for TokenAmount {
    fn from(v: u64) -> Self {
        TokenAmount::Exact(U256::from(v))
    }
}

impl From<f64> for TokenAmount {
    fn from(v: f64) -> Self {
        TokenAmount::Scaled(v)
    }
}

/// A single call executed by the redeemer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCall {
    #[serde(rename = "to")]
    pub target: Address,
    #[serde(default)]
    pub value: U256,
    #[serde(rename = "data")]
    pub call_data: Bytes,
}

impl ExecutionCall {
    pub fn new(target: Address, call_data: Bytes) -> Self {
        Self {
            target,
            value: U256::zero(),
            call_data,
        }
    }

    pub(crate) fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.target),
            Token::Uint(self.value),
            Token::Bytes(self.call_data.to_vec()),
        ])
    }
}

/// Terminal state of a confirmed submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub transaction_hash: H256,
    pub user_op_hash: H256,
    pub success: bool,
    pub block_number: u64,
    pub gas_used: U256,
    pub attempts: u32,
}

/// ERC-4337 UserOperation (EntryPoint v0.7 layout).
///
/// Kept unpacked, the way bundlers exchange it over JSON-RPC. The packed form only exists for
/// hashing; see [`UserOperation::hash`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub factory: Option<Address>,
    pub factory_data: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster: Option<Address>,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    pub paymaster_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// `factory ++ factoryData`, empty for deployed accounts.
    pub fn init_code(&self) -> Bytes {
        match self.factory {
            Some(factory) => {
                let mut v = Vec::with_capacity(20 + self.factory_data.len());
                v.extend_from_slice(factory.as_bytes());
                v.extend_from_slice(self.factory_data.as_ref());
                Bytes::from(v)
            }
            None => Bytes::new(),
        }
    }

    /// `paymaster ++ uint128(verificationGas) ++ uint128(postOpGas) ++ paymasterData`.
    pub fn paymaster_and_data(&self) -> Bytes {
        match self.paymaster {
            Some(paymaster) => {
                let mut v = Vec::with_capacity(52 + self.paymaster_data.len());
                v.extend_from_slice(paymaster.as_bytes());
                v.extend_from_slice(&self.paymaster_verification_gas_limit.low_u128().to_be_bytes());
                v.extend_from_slice(&self.paymaster_post_op_gas_limit.low_u128().to_be_bytes());
                v.extend_from_slice(self.paymaster_data.as_ref());
                Bytes::from(v)
            }
            None => Bytes::new(),
        }
    }

    pub fn account_gas_limits(&self) -> [u8; 32] {
        pack_u128_pair(self.verification_gas_limit, self.call_gas_limit)
    }

    pub fn gas_fees(&self) -> [u8; 32] {
        pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }

    /// userOpHash as computed by EntryPoint v0.7 `getUserOpHash`.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let packed = abi::encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(self.init_code()).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::FixedBytes(self.account_gas_limits().to_vec()),
            Token::Uint(self.pre_verification_gas),
            Token::FixedBytes(self.gas_fees().to_vec()),
            Token::FixedBytes(keccak256(self.paymaster_and_data()).to_vec()),
        ]);

        let encoded = abi::encode(&[
            Token::FixedBytes(keccak256(packed).to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ]);

        H256(keccak256(encoded))
    }
}

fn pack_u128_pair(high: U256, low: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&high.low_u128().to_be_bytes());
    out[16..].copy_from_slice(&low.low_u128().to_be_bytes());
    out
}
