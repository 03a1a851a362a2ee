//! Delegation framework wire formats.
//!
//! Everything that has to match the on-chain `DelegationManager` byte-for-byte lives here as pure
//! functions: the delegation tuple, permission contexts, ERC-7579 execution encodings, and the
//! `redeemDelegations(bytes[],bytes32[],bytes[])` calldata.

use crate::error::RedemptionError;
use crate::types::ExecutionCall;
use anyhow::{anyhow, bail, Result};
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;
use serde::{Deserialize, Serialize};

/// Authority of a root delegation (one not derived from a parent delegation).
pub const ROOT_AUTHORITY: H256 = H256([0xff; 32]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caveat {
    pub enforcer: Address,
    pub terms: Bytes,
    #[serde(default)]
    pub args: Bytes,
}

/// A signed delegation as produced by the delegation toolkit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub delegate: Address,
    pub delegator: Address,
    pub authority: H256,
    #[serde(default)]
    pub caveats: Vec<Caveat>,
    #[serde(default)]
    pub salt: U256,
    pub signature: Bytes,
}

impl Delegation {
    /// Decode a delegation payload.
    ///
    /// Accepts either the ABI-encoded `Delegation` tuple or the toolkit's JSON document (UTF-8).
    pub fn from_payload(payload: &[u8]) -> Result<Self, RedemptionError> {
        if payload.is_empty() {
            return Err(RedemptionError::delegation("delegation payload is empty"));
        }

        let first = payload.iter().find(|b| !b.is_ascii_whitespace()).copied();
        let parsed = if first == Some(b'{') {
            serde_json::from_slice::<Delegation>(payload)
                .map_err(|e| anyhow!("invalid delegation JSON: {e}"))
        } else {
            decode_delegation(payload)
        };

        parsed.map_err(|e| {
            RedemptionError::delegation("failed to decode delegation payload")
                .with_details(serde_json::json!({ "payloadLength": payload.len() }))
                .with_source(e)
        })
    }

    /// `abi.encode(delegation)`.
    pub fn to_payload(&self) -> Bytes {
        Bytes::from(abi::encode(&[self.to_token()]))
    }

    pub fn is_root(&self) -> bool {
        self.authority == ROOT_AUTHORITY
    }

    pub(crate) fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.delegate),
            Token::Address(self.delegator),
            Token::FixedBytes(self.authority.as_bytes().to_vec()),
            Token::Array(
                self.caveats
                    .iter()
                    .map(|c| {
                        Token::Tuple(vec![
                            Token::Address(c.enforcer),
                            Token::Bytes(c.terms.to_vec()),
                            Token::Bytes(c.args.to_vec()),
                        ])
                    })
                    .collect(),
            ),
            Token::Uint(self.salt),
            Token::Bytes(self.signature.to_vec()),
        ])
    }

    fn from_token(token: Token) -> Result<Self> {
        let Token::Tuple(fields) = token else {
            bail!("delegation is not a tuple");
        };
        let [delegate, delegator, authority, caveats, salt, signature]: [Token; 6] = fields
            .try_into()
            .map_err(|f: Vec<Token>| anyhow!("delegation tuple has {} fields, expected 6", f.len()))?;

        let caveats = caveats
            .into_array()
            .ok_or_else(|| anyhow!("caveats is not an array"))?
            .into_iter()
            .map(caveat_from_token)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            delegate: delegate.into_address().ok_or_else(|| anyhow!("bad delegate"))?,
            delegator: delegator
                .into_address()
                .ok_or_else(|| anyhow!("bad delegator"))?,
            authority: authority
                .into_fixed_bytes()
                .filter(|b| b.len() == 32)
                .map(|b| H256::from_slice(&b))
                .ok_or_else(|| anyhow!("bad authority"))?,
            caveats,
            salt: salt.into_uint().ok_or_else(|| anyhow!("bad salt"))?,
            signature: signature
                .into_bytes()
                .map(Bytes::from)
                .ok_or_else(|| anyhow!("bad signature"))?,
        })
    }
}

fn caveat_from_token(token: Token) -> Result<Caveat> {
    let Token::Tuple(fields) = token else {
        bail!("caveat is not a tuple");
    };
    let [enforcer, terms, args]: [Token; 3] = fields
        .try_into()
        .map_err(|f: Vec<Token>| anyhow!("caveat tuple has {} fields, expected 3", f.len()))?;
    Ok(Caveat {
        enforcer: enforcer.into_address().ok_or_else(|| anyhow!("bad enforcer"))?,
        terms: terms.into_bytes().map(Bytes::from).ok_or_else(|| anyhow!("bad terms"))?,
        args: args.into_bytes().map(Bytes::from).ok_or_else(|| anyhow!("bad args"))?,
    })
}

fn delegation_param_type() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Address,
        ParamType::FixedBytes(32),
        ParamType::Array(Box::new(ParamType::Tuple(vec![
            ParamType::Address,
            ParamType::Bytes,
            ParamType::Bytes,
        ]))),
        ParamType::Uint(256),
        ParamType::Bytes,
    ])
}

fn decode_delegation(payload: &[u8]) -> Result<Delegation> {
    let mut tokens = abi::decode(&[delegation_param_type()], payload)
        .map_err(|e| anyhow!("invalid ABI-encoded delegation: {e}"))?;
    let token = tokens.pop().ok_or_else(|| anyhow!("empty delegation decode"))?;
    Delegation::from_token(token)
}

/// ERC-7579 execution mode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// callType 0x00, execType 0x00.
    SingleDefault,
    /// callType 0x01, execType 0x00.
    BatchDefault,
}

impl ExecutionMode {
    pub fn to_bytes32(self) -> [u8; 32] {
        let mut word = [0u8; 32];
        if self == ExecutionMode::BatchDefault {
            word[0] = 0x01;
        }
        word
    }

    pub fn for_calls(calls: &[ExecutionCall]) -> Self {
        if calls.len() == 1 {
            ExecutionMode::SingleDefault
        } else {
            ExecutionMode::BatchDefault
        }
    }
}

/// `abi.encode(Delegation[])`, leaf delegation first.
pub fn encode_permission_context(chain: &[Delegation]) -> Bytes {
    let tokens = chain.iter().map(Delegation::to_token).collect();
    Bytes::from(abi::encode(&[Token::Array(tokens)]))
}

/// `abi.encodePacked(target, value, callData)`.
pub fn encode_single_execution(call: &ExecutionCall) -> Bytes {
    let mut out = Vec::with_capacity(52 + call.call_data.len());
    out.extend_from_slice(call.target.as_bytes());
    let mut value = [0u8; 32];
    call.value.to_big_endian(&mut value);
    out.extend_from_slice(&value);
    out.extend_from_slice(call.call_data.as_ref());
    Bytes::from(out)
}

/// `abi.encode(Execution[])` with `Execution = (address target, uint256 value, bytes callData)`.
pub fn encode_batch_execution(calls: &[ExecutionCall]) -> Bytes {
    let tokens = calls.iter().map(ExecutionCall::to_token).collect();
    Bytes::from(abi::encode(&[Token::Array(tokens)]))
}

/// Execution calldata for `mode`. Single mode takes exactly one call.
pub fn encode_execution(mode: ExecutionMode, calls: &[ExecutionCall]) -> Result<Bytes> {
    match (mode, calls) {
        (ExecutionMode::SingleDefault, [call]) => Ok(encode_single_execution(call)),
        (ExecutionMode::SingleDefault, _) => bail!(
            "single execution mode takes exactly one call, got {}",
            calls.len()
        ),
        (ExecutionMode::BatchDefault, []) => bail!("batch execution needs at least one call"),
        (ExecutionMode::BatchDefault, _) => Ok(encode_batch_execution(calls)),
    }
}

/// Calldata for `redeemDelegations(bytes[] permissionContexts, bytes32[] modes, bytes[] executionCallDatas)`.
///
/// The three slices are parallel: entry `i` redeems `permission_contexts[i]` to run
/// `execution_call_datas[i]` under `modes[i]`.
pub fn encode_redeem_delegations(
    permission_contexts: &[Bytes],
    modes: &[ExecutionMode],
    execution_call_datas: &[Bytes],
) -> Result<Bytes> {
    if permission_contexts.is_empty() {
        bail!("redeemDelegations needs at least one permission context");
    }
    if permission_contexts.len() != modes.len() || modes.len() != execution_call_datas.len() {
        bail!(
            "redeemDelegations arrays differ in length (contexts={}, modes={}, executions={})",
            permission_contexts.len(),
            modes.len(),
            execution_call_datas.len()
        );
    }

    let args = abi::encode(&[
        Token::Array(
            permission_contexts
                .iter()
                .map(|c| Token::Bytes(c.to_vec()))
                .collect(),
        ),
        Token::Array(
            modes
                .iter()
                .map(|m| Token::FixedBytes(m.to_bytes32().to_vec()))
                .collect(),
        ),
        Token::Array(
            execution_call_datas
                .iter()
                .map(|e| Token::Bytes(e.to_vec()))
                .collect(),
        ),
    ]);

    let mut out = id("redeemDelegations(bytes[],bytes32[],bytes[])").to_vec();
    out.extend_from_slice(&args);
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root_delegation() -> Delegation {
        Delegation {
            delegate: Address::repeat_byte(0x22),
            delegator: Address::repeat_byte(0x33),
            authority: ROOT_AUTHORITY,
            caveats: vec![],
            salt: U256::zero(),
            signature: Bytes::new(),
        }
    }

    fn transfer_call() -> ExecutionCall {
        // transfer(0xaaaa..., 1_000_000) on token 0xbbbb...
        let data = hex::decode(concat!(
            "a9059cbb",
            "000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "00000000000000000000000000000000000000000000000000000000000f4240",
        ))
        .unwrap();
        ExecutionCall::new(Address::repeat_byte(0xbb), Bytes::from(data))
    }

    // Known-good redeemDelegations calldata for one root delegation and one single-mode transfer.
    const REDEEM_FIXTURE: &str = concat!(
        "cef6d209",
        "0000000000000000000000000000000000000000000000000000000000000060",
        "0000000000000000000000000000000000000000000000000000000000000220",
        "0000000000000000000000000000000000000000000000000000000000000260",
        "0000000000000000000000000000000000000000000000000000000000000001",
        "0000000000000000000000000000000000000000000000000000000000000020",
        "0000000000000000000000000000000000000000000000000000000000000160",
        "0000000000000000000000000000000000000000000000000000000000000020",
        "0000000000000000000000000000000000000000000000000000000000000001",
        "0000000000000000000000000000000000000000000000000000000000000020",
        "0000000000000000000000002222222222222222222222222222222222222222",
        "0000000000000000000000003333333333333333333333333333333333333333",
        "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        "00000000000000000000000000000000000000000000000000000000000000c0",
        "0000000000000000000000000000000000000000000000000000000000000000",
        "00000000000000000000000000000000000000000000000000000000000000e0",
        "0000000000000000000000000000000000000000000000000000000000000000",
        "0000000000000000000000000000000000000000000000000000000000000000",
        "0000000000000000000000000000000000000000000000000000000000000001",
        "0000000000000000000000000000000000000000000000000000000000000000",
        "0000000000000000000000000000000000000000000000000000000000000001",
        "0000000000000000000000000000000000000000000000000000000000000020",
        "0000000000000000000000000000000000000000000000000000000000000078",
        "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb000000000000000000000000",
        "0000000000000000000000000000000000000000a9059cbb0000000000000000",
        "00000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa0000000000000000",
        "0000000000000000000000000000000000000000000f42400000000000000000",
    );

    #[test]
    fn redeem_delegations_matches_fixture() {
        let context = encode_permission_context(&[root_delegation()]);
        let execution = encode_single_execution(&transfer_call());
        let calldata =
            encode_redeem_delegations(&[context], &[ExecutionMode::SingleDefault], &[execution])
                .unwrap();
        assert_eq!(hex::encode(calldata.as_ref()), REDEEM_FIXTURE);
    }

    #[test]
    fn permission_context_layout() {
        let ctx = encode_permission_context(&[root_delegation()]);
        // offset, length, element offset, then 6 head words + empty caveats + empty signature
        assert_eq!(ctx.len(), 352);
        assert_eq!(ctx[31], 0x20);
        assert_eq!(ctx[63], 0x01);
    }

    #[test]
    fn single_execution_is_packed() {
        let call = transfer_call();
        let packed = encode_single_execution(&call);
        assert_eq!(packed.len(), 20 + 32 + call.call_data.len());
        assert_eq!(&packed[..20], call.target.as_bytes());
        assert!(packed[20..52].iter().all(|b| *b == 0));
        assert_eq!(&packed[52..56], &[0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn batch_execution_decodes_as_execution_array() {
        let calls = vec![transfer_call(), ExecutionCall::new(Address::repeat_byte(0x01), Bytes::new())];
        let encoded = encode_execution(ExecutionMode::BatchDefault, &calls).unwrap();
        let decoded = abi::decode(
            &[ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Bytes,
            ])))],
            encoded.as_ref(),
        )
        .unwrap();
        let Token::Array(items) = &decoded[0] else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1], calls[1].to_token());
    }

    #[test]
    fn execution_mode_words() {
        assert_eq!(ExecutionMode::SingleDefault.to_bytes32(), [0u8; 32]);
        let batch = ExecutionMode::BatchDefault.to_bytes32();
        assert_eq!(batch[0], 0x01);
        assert!(batch[1..].iter().all(|b| *b == 0));
        assert!(encode_execution(ExecutionMode::SingleDefault, &[]).is_err());
    }

    #[test]
    fn redeem_rejects_mismatched_lengths() {
        let ctx = encode_permission_context(&[root_delegation()]);
        let err = encode_redeem_delegations(&[ctx], &[], &[]).unwrap_err();
        assert!(err.to_string().contains("differ in length"));
        assert!(encode_redeem_delegations(&[], &[], &[]).is_err());
    }

    #[test]
    fn payload_accepts_abi_and_json() {
        let mut d = root_delegation();
        d.caveats.push(Caveat {
            enforcer: Address::repeat_byte(0x44),
            terms: Bytes::from(vec![1, 2, 3]),
            args: Bytes::new(),
        });
        d.salt = U256::from(7u64);
        d.signature = Bytes::from(vec![0x11; 65]);

        let from_abi = Delegation::from_payload(d.to_payload().as_ref()).unwrap();
        assert_eq!(from_abi, d);

        let doc = json!({
            "delegate": "0x2222222222222222222222222222222222222222",
            "delegator": "0x3333333333333333333333333333333333333333",
            "authority": "0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            "caveats": [],
            "salt": "0x0",
            "signature": "0x"
        });
        let from_json = Delegation::from_payload(doc.to_string().as_bytes()).unwrap();
        assert_eq!(from_json, root_delegation());
        assert!(from_json.is_root());
    }

    #[test]
    fn malformed_payload_is_a_delegation_error() {
        let err = Delegation::from_payload(&[0xde, 0xad]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Delegation);

        let err = Delegation::from_payload(b"{\"delegate\": 1}").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Delegation);

        assert!(Delegation::from_payload(&[]).is_err());
    }
}
