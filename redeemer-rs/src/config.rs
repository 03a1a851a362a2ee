use crate::account::{AccountConfig, Implementation};
use crate::network::NetworkProfile;
use crate::submit::SubmitOptions;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt};

/// ERC-4337 EntryPoint v0.7, same address on every chain.
pub const ENTRY_POINT_V07: &str = "0x0000000071727De22E5E9d8BAf0edAc6f37da032";

/// Per-chain endpoint overrides. Anything left unset falls back to env vars, then to the
/// network profile.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEndpoints {
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub bundler_url: Option<String>,
    /// Defaults to the bundler URL.
    #[serde(default)]
    pub paymaster_url: Option<String>,
    /// Defaults to the bundler URL.
    #[serde(default)]
    pub gas_price_url: Option<String>,
}

// URLs routinely embed provider API keys; keep them out of Debug output.
impl fmt::Debug for ChainEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainEndpoints")
            .field("rpc_url", &self.rpc_url.as_deref().map(redact_url))
            .field("bundler_url", &self.bundler_url.as_deref().map(redact_url))
            .field("paymaster_url", &self.paymaster_url.as_deref().map(redact_url))
            .field("gas_price_url", &self.gas_price_url.as_deref().map(redact_url))
            .finish()
    }
}

/// Fully resolved endpoints for one chain.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub rpc_url: String,
    pub bundler_url: String,
    pub paymaster_url: String,
    pub gas_price_url: String,
}

impl fmt::Debug for ResolvedEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedEndpoints")
            .field("rpc_url", &redact_url(&self.rpc_url))
            .field("bundler_url", &redact_url(&self.bundler_url))
            .field("paymaster_url", &redact_url(&self.paymaster_url))
            .field("gas_price_url", &redact_url(&self.gas_price_url))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub endpoints: HashMap<u64, ChainEndpoints>,

    #[serde(default = "default_entry_point")]
    pub entry_point: Address,

    /// Factory for `Implementation::Hybrid` accounts.
    #[serde(default)]
    pub hybrid_factory: Option<Address>,

    /// Factory for `Implementation::MultiSig` accounts.
    #[serde(default)]
    pub multisig_factory: Option<Address>,

    #[serde(default)]
    pub implementation: Implementation,

    /// CREATE2 salt for the redeemer account. Zero when omitted.
    #[serde(default)]
    pub deploy_salt: Option<U256>,

    /// Route UserOperations through the ERC-7677 paymaster.
    #[serde(default = "default_true")]
    pub sponsor_gas: bool,

    /// Free-form paymaster context, e.g. `{ "policyId": "..." }`.
    #[serde(default)]
    pub paymaster_context: Option<Value>,

    #[serde(default = "default_true")]
    pub retry_on_failure: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Max seconds to wait for a UserOperation receipt.
    #[serde(default = "default_receipt_timeout_seconds")]
    pub receipt_timeout_seconds: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_entry_point() -> Address {
    Address::from_str(ENTRY_POINT_V07).unwrap_or_default()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_receipt_timeout_seconds() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    1_500
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            entry_point: default_entry_point(),
            hybrid_factory: None,
            multisig_factory: None,
            implementation: Implementation::default(),
            deploy_salt: None,
            sponsor_gas: true,
            paymaster_context: None,
            retry_on_failure: true,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            receipt_timeout_seconds: default_receipt_timeout_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ClientConfig {
    /// Builds a config from `REDEEMER_*` environment variables (after loading `.env`).
    ///
    /// Per-chain endpoints are not read here; [`ClientConfig::endpoints_for`] looks them up
    /// lazily so any chain id can be configured without listing it up front.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut cfg = Self::default();

        if let Some(v) = env_var("REDEEMER_ENTRY_POINT") {
            cfg.entry_point = parse_addr(&v).context("invalid REDEEMER_ENTRY_POINT")?;
        }
        if let Some(v) = env_var("REDEEMER_HYBRID_FACTORY") {
            cfg.hybrid_factory = Some(parse_addr(&v).context("invalid REDEEMER_HYBRID_FACTORY")?);
        }
        if let Some(v) = env_var("REDEEMER_MULTISIG_FACTORY") {
            cfg.multisig_factory =
                Some(parse_addr(&v).context("invalid REDEEMER_MULTISIG_FACTORY")?);
        }
        if let Some(v) = env_var("REDEEMER_IMPLEMENTATION") {
            cfg.implementation = v.parse().context("invalid REDEEMER_IMPLEMENTATION")?;
        }
        if let Some(v) = env_var("REDEEMER_DEPLOY_SALT") {
            cfg.deploy_salt = Some(parse_salt(&v).context("invalid REDEEMER_DEPLOY_SALT")?);
        }
        if let Some(v) = env_var("REDEEMER_SPONSOR_GAS") {
            cfg.sponsor_gas = parse_bool(&v).context("invalid REDEEMER_SPONSOR_GAS")?;
        }
        if let Some(v) = env_var("REDEEMER_PAYMASTER_POLICY_ID") {
            cfg.paymaster_context = Some(serde_json::json!({ "policyId": v }));
        }
        if let Some(v) = env_var("REDEEMER_RETRY_ON_FAILURE") {
            cfg.retry_on_failure = parse_bool(&v).context("invalid REDEEMER_RETRY_ON_FAILURE")?;
        }
        if let Some(v) = env_var("REDEEMER_MAX_ATTEMPTS") {
            cfg.max_attempts = v.parse().context("invalid REDEEMER_MAX_ATTEMPTS")?;
        }
        if let Some(v) = env_var("REDEEMER_RETRY_DELAY_MS") {
            cfg.retry_delay_ms = v.parse().context("invalid REDEEMER_RETRY_DELAY_MS")?;
        }
        if let Some(v) = env_var("REDEEMER_RECEIPT_TIMEOUT_SECONDS") {
            cfg.receipt_timeout_seconds = v
                .parse()
                .context("invalid REDEEMER_RECEIPT_TIMEOUT_SECONDS")?;
        }
        if let Some(v) = env_var("REDEEMER_POLL_INTERVAL_MS") {
            cfg.poll_interval_ms = v.parse().context("invalid REDEEMER_POLL_INTERVAL_MS")?;
        }

        if cfg.max_attempts == 0 {
            return Err(anyhow!("max attempts must be > 0"));
        }

        Ok(cfg)
    }

    /// Resolve endpoints for a chain: explicit config, then `REDEEMER_*_URL_<chainId>` env vars,
    /// then the profile defaults. Paymaster and gas-price URLs fall back to the bundler URL.
    ///
    /// Empty strings are returned as-is; the transport rejects them when clients are built.
    pub fn endpoints_for(&self, profile: &NetworkProfile) -> ResolvedEndpoints {
        let chain_id = profile.chain_id;
        let explicit = self.endpoints.get(&chain_id).cloned().unwrap_or_default();

        let rpc_url = explicit
            .rpc_url
            .or_else(|| env_var(&format!("REDEEMER_RPC_URL_{chain_id}")))
            .unwrap_or_else(|| profile.rpc_url.clone());
        let bundler_url = explicit
            .bundler_url
            .or_else(|| env_var(&format!("REDEEMER_BUNDLER_URL_{chain_id}")))
            .unwrap_or_else(|| profile.bundler_url.clone());
        let paymaster_url = explicit
            .paymaster_url
            .or_else(|| env_var(&format!("REDEEMER_PAYMASTER_URL_{chain_id}")))
            .unwrap_or_else(|| bundler_url.clone());
        let gas_price_url = explicit
            .gas_price_url
            .or_else(|| env_var(&format!("REDEEMER_GAS_PRICE_URL_{chain_id}")))
            .unwrap_or_else(|| bundler_url.clone());

        for url in [&rpc_url, &bundler_url] {
            if looks_keyed(url) {
                tracing::warn!(
                    chain_id,
                    url = %redact_url(url),
                    "endpoint URL appears to embed an API key; keep it in env, not in committed config"
                );
            }
        }

        ResolvedEndpoints {
            rpc_url,
            bundler_url,
            paymaster_url,
            gas_price_url,
        }
    }

    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            retry_on_failure: self.retry_on_failure,
            max_attempts: self.max_attempts.max(1),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            receipt_timeout: Duration::from_secs(self.receipt_timeout_seconds),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }

    pub fn account_config(&self) -> AccountConfig {
        AccountConfig {
            entry_point: self.entry_point,
            hybrid_factory: self.hybrid_factory,
            multisig_factory: self.multisig_factory,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_addr(s: &str) -> Result<Address> {
    s.trim().parse::<Address>().map_err(|e| anyhow!("{e}"))
}

/// Decimal, or hex with a `0x` prefix.
fn parse_salt(s: &str) -> Result<U256> {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| anyhow!("bad hex salt '{s}': {e}")),
        None => U256::from_dec_str(s).map_err(|e| anyhow!("bad decimal salt '{s}': {e}")),
    }
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{other}'")),
    }
}

fn looks_keyed(url: &str) -> bool {
    url.contains("alchemy.com/v2/")
        || url.contains("infura.io/v3/")
        || url.contains("apikey=")
        || url.contains("api_key=")
}

/// Strip path and query so keyed URLs can be logged.
pub(crate) fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(u) => match u.host_str() {
            Some(host) => format!("{}://{}/…", u.scheme(), host),
            None => "<redacted>".to_string(),
        },
        Err(_) if url.is_empty() => String::new(),
        Err(_) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_submission_contract() {
        let cfg = ClientConfig::default();
        let opts = cfg.submit_options();
        assert!(opts.retry_on_failure);
        assert_eq!(opts.max_attempts, 3);
        assert_eq!(opts.retry_delay, Duration::from_secs(2));
        assert_eq!(opts.receipt_timeout, Duration::from_secs(120));
        assert_eq!(cfg.entry_point, Address::from_str(ENTRY_POINT_V07).unwrap());
        assert_eq!(cfg.implementation, Implementation::Hybrid);
        assert!(cfg.deploy_salt.is_none());
    }

    #[test]
    fn deserializes_camel_case_with_defaults() {
        let cfg: ClientConfig = serde_json::from_value(json!({
            "endpoints": {
                "84532": { "rpcUrl": "https://rpc.example", "bundlerUrl": "https://bundler.example" }
            },
            "hybridFactory": "0x1111111111111111111111111111111111111111",
            "paymasterContext": { "policyId": "abc" },
            "maxAttempts": 5
        }))
        .unwrap();

        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.retry_delay_ms, 2_000);
        assert!(cfg.sponsor_gas);
        assert_eq!(cfg.hybrid_factory, Some(Address::repeat_byte(0x11)));
        assert_eq!(cfg.paymaster_context.unwrap()["policyId"], "abc");
        assert!(cfg.endpoints.contains_key(&84532));
    }

    #[test]
    fn explicit_endpoints_win_and_bundler_backs_paymaster_and_gas() {
        let mut cfg = ClientConfig::default();
        cfg.endpoints.insert(
            4242,
            ChainEndpoints {
                rpc_url: Some("https://rpc.example".into()),
                bundler_url: Some("https://bundler.example".into()),
                ..Default::default()
            },
        );
        let resolved = cfg.endpoints_for(&NetworkProfile::synthesized(4242));
        assert_eq!(resolved.rpc_url, "https://rpc.example");
        assert_eq!(resolved.bundler_url, "https://bundler.example");
        assert_eq!(resolved.paymaster_url, "https://bundler.example");
        assert_eq!(resolved.gas_price_url, "https://bundler.example");
    }

    #[test]
    fn profile_defaults_fill_gaps() {
        let cfg = ClientConfig::default();
        let mut profile = NetworkProfile::synthesized(4243);
        profile.rpc_url = "https://public.example".into();
        let resolved = cfg.endpoints_for(&profile);
        assert_eq!(resolved.rpc_url, "https://public.example");
        assert!(resolved.bundler_url.is_empty());
    }

    #[test]
    fn redacted_urls_drop_keys() {
        assert_eq!(
            redact_url("https://base-sepolia.g.alchemy.com/v2/secret"),
            "https://base-sepolia.g.alchemy.com/…"
        );
        assert!(!format!(
            "{:?}",
            ChainEndpoints {
                bundler_url: Some("https://api.pimlico.io/v2/1/rpc?apikey=secret".into()),
                ..Default::default()
            }
        )
        .contains("secret"));
    }

    #[test]
    fn parse_salt_accepts_decimal_and_hex() {
        assert_eq!(parse_salt("42").unwrap(), U256::from(42u64));
        assert_eq!(parse_salt("0x2a").unwrap(), U256::from(42u64));
        assert_eq!(parse_salt(" 0 ").unwrap(), U256::zero());
        assert!(parse_salt("0xzz").is_err());
        assert!(parse_salt("forty-two").is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
