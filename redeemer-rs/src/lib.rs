//! Delegation redemption engine.
//!
//! A merchant-controlled smart account redeems a customer's signed delegation by submitting an
//! ERC-4337 UserOperation that transfers a fixed token amount to a recipient. [`redeem`] is the
//! single entry point; the lower-level pieces are public for callers that need partial control.

pub mod account;
pub mod bundler;
pub mod clients;
pub mod config;
pub mod delegation;
pub mod encoding;
pub mod error;
pub mod gas;
pub mod logging;
pub mod network;
pub mod paymaster;
pub mod payload;
pub mod public;
pub mod redeem;
pub mod submit;
pub mod transport;
pub mod types;
pub mod validate;

pub use account::{
    assert_delegate_matches, normalize_private_key, resolve_account, AccountConfig,
    Implementation, RedeemerAccount,
};
pub use clients::{build_clients, NetworkClientSet};
pub use config::{ChainEndpoints, ClientConfig, ENTRY_POINT_V07};
pub use delegation::{encode_redeem_delegations, Caveat, Delegation, ExecutionMode, ROOT_AUTHORITY};
pub use error::{ErrorKind, RedemptionError};
pub use network::{
    register_network_profile, registered_chain_ids, resolve_network_profile, NativeCurrency,
    NetworkProfile,
};
pub use payload::{
    build_batch_redemption_calls, build_redemption_calls, encode_transfer, prepare_token_amount,
    BatchRedemption,
};
pub use redeem::{redeem, redeem_with_outcome};
pub use submit::{AttemptStage, SubmissionEngine, SubmitOptions};
pub use types::{ExecutionCall, RedemptionRequest, SubmissionOutcome, TokenAmount, UserOperation};
pub use validate::validate;
