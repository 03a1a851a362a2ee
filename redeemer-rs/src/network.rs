//! Chain metadata and the process-wide network registry.
//!
//! Well-known chains are seeded from a static table. Any other chain id resolves to a minimal
//! synthesized profile, so nothing downstream has to special-case an unknown chain.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    pub chain_id: u64,
    pub display_name: String,
    /// Default public RPC endpoint; empty when none is known.
    #[serde(default)]
    pub rpc_url: String,
    /// Default bundler endpoint; empty when none is known (bundlers are usually keyed).
    #[serde(default)]
    pub bundler_url: String,
    pub native_currency: NativeCurrency,
    #[serde(default)]
    pub block_explorer_url: Option<String>,
}

impl NetworkProfile {
    /// Minimal profile for chains missing from the registry.
    pub fn synthesized(chain_id: u64) -> Self {
        Self {
            chain_id,
            display_name: format!("Chain {chain_id}"),
            rpc_url: String::new(),
            bundler_url: String::new(),
            native_currency: NativeCurrency {
                name: "Ether".to_string(),
                symbol: "ETH".to_string(),
                decimals: 18,
            },
            block_explorer_url: None,
        }
    }

    pub fn tx_url(&self, tx_hash: &str) -> Option<String> {
        self.block_explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }
}

struct KnownChain {
    chain_id: u64,
    name: &'static str,
    rpc: &'static str,
    currency: (&'static str, &'static str),
    explorer: &'static str,
}

const KNOWN_CHAINS: &[KnownChain] = &[
    KnownChain {
        chain_id: 1,
        name: "Ethereum",
        rpc: "https://eth.merkle.io",
        currency: ("Ether", "ETH"),
        explorer: "https://etherscan.io",
    },
    KnownChain {
        chain_id: 11155111,
        name: "Sepolia",
        rpc: "https://sepolia.drpc.org",
        currency: ("Sepolia Ether", "ETH"),
        explorer: "https://sepolia.etherscan.io",
    },
    KnownChain {
        chain_id: 8453,
        name: "Base",
        rpc: "https://mainnet.base.org",
        currency: ("Ether", "ETH"),
        explorer: "https://basescan.org",
    },
    KnownChain {
        chain_id: 84532,
        name: "Base Sepolia",
        rpc: "https://sepolia.base.org",
        currency: ("Sepolia Ether", "ETH"),
        explorer: "https://sepolia.basescan.org",
    },
    KnownChain {
        chain_id: 10,
        name: "OP Mainnet",
        rpc: "https://mainnet.optimism.io",
        currency: ("Ether", "ETH"),
        explorer: "https://optimistic.etherscan.io",
    },
    KnownChain {
        chain_id: 11155420,
        name: "OP Sepolia",
        rpc: "https://sepolia.optimism.io",
        currency: ("Sepolia Ether", "ETH"),
        explorer: "https://sepolia-optimism.etherscan.io",
    },
    KnownChain {
        chain_id: 42161,
        name: "Arbitrum One",
        rpc: "https://arb1.arbitrum.io/rpc",
        currency: ("Ether", "ETH"),
        explorer: "https://arbiscan.io",
    },
    KnownChain {
        chain_id: 421614,
        name: "Arbitrum Sepolia",
        rpc: "https://sepolia-rollup.arbitrum.io/rpc",
        currency: ("Arbitrum Sepolia Ether", "ETH"),
        explorer: "https://sepolia.arbiscan.io",
    },
    KnownChain {
        chain_id: 137,
        name: "Polygon",
        rpc: "https://polygon-rpc.com",
        currency: ("POL", "POL"),
        explorer: "https://polygonscan.com",
    },
    KnownChain {
        chain_id: 80002,
        name: "Polygon Amoy",
        rpc: "https://rpc-amoy.polygon.technology",
        currency: ("POL", "POL"),
        explorer: "https://amoy.polygonscan.com",
    },
    KnownChain {
        chain_id: 59144,
        name: "Linea Mainnet",
        rpc: "https://rpc.linea.build",
        currency: ("Linea Ether", "ETH"),
        explorer: "https://lineascan.build",
    },
    KnownChain {
        chain_id: 100,
        name: "Gnosis",
        rpc: "https://rpc.gnosischain.com",
        currency: ("xDAI", "XDAI"),
        explorer: "https://gnosisscan.io",
    },
];

impl From<&KnownChain> for NetworkProfile {
    fn from(k: &KnownChain) -> Self {
        Self {
            chain_id: k.chain_id,
            display_name: k.name.to_string(),
            rpc_url: k.rpc.to_string(),
            bundler_url: String::new(),
            native_currency: NativeCurrency {
                name: k.currency.0.to_string(),
                symbol: k.currency.1.to_string(),
                decimals: 18,
            },
            block_explorer_url: Some(k.explorer.to_string()),
        }
    }
}

/// Chain-indexed profile lookup, safe under concurrent access. The map itself is never exposed.
pub struct NetworkRegistry {
    profiles: DashMap<u64, Arc<NetworkProfile>>,
}

impl NetworkRegistry {
    pub fn empty() -> Self {
        Self {
            profiles: DashMap::new(),
        }
    }

    pub fn with_known_chains() -> Self {
        let registry = Self::empty();
        for k in KNOWN_CHAINS {
            registry.register(NetworkProfile::from(k));
        }
        registry
    }

    /// Replaces any existing profile for the same chain id.
    pub fn register(&self, profile: NetworkProfile) -> Arc<NetworkProfile> {
        let profile = Arc::new(profile);
        self.profiles.insert(profile.chain_id, profile.clone());
        profile
    }

    pub fn get(&self, chain_id: u64) -> Option<Arc<NetworkProfile>> {
        self.profiles.get(&chain_id).map(|p| p.value().clone())
    }

    /// Looks the chain up, registering a synthesized profile the first time an unknown id is seen.
    pub fn resolve(&self, chain_id: u64) -> Arc<NetworkProfile> {
        self.profiles
            .entry(chain_id)
            .or_insert_with(|| {
                tracing::debug!(chain_id, "unknown chain; synthesizing minimal network profile");
                Arc::new(NetworkProfile::synthesized(chain_id))
            })
            .value()
            .clone()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.profiles.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

static REGISTRY: Lazy<NetworkRegistry> = Lazy::new(NetworkRegistry::with_known_chains);

/// Never fails: unknown chains get a synthesized profile.
pub fn resolve_network_profile(chain_id: u64) -> Arc<NetworkProfile> {
    REGISTRY.resolve(chain_id)
}

pub fn register_network_profile(profile: NetworkProfile) -> Arc<NetworkProfile> {
    REGISTRY.register(profile)
}

pub fn registered_chain_ids() -> Vec<u64> {
    REGISTRY.chain_ids()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chain_resolves_from_table() {
        let p = resolve_network_profile(8453);
        assert_eq!(p.display_name, "Base");
        assert_eq!(p.native_currency.symbol, "ETH");
        assert_eq!(
            p.tx_url("0xabc").as_deref(),
            Some("https://basescan.org/tx/0xabc")
        );
    }

    #[test]
    fn unknown_chain_gets_synthesized_profile() {
        let p = resolve_network_profile(999_999);
        assert_eq!(p.chain_id, 999_999);
        assert_eq!(p.display_name, "Chain 999999");
        assert_eq!(p.native_currency.symbol, "ETH");
        assert_eq!(p.native_currency.decimals, 18);
        assert!(p.rpc_url.is_empty());
        assert!(p.bundler_url.is_empty());
        assert!(p.block_explorer_url.is_none());
        assert!(p.tx_url("0xabc").is_none());
    }

    #[test]
    fn register_overrides_profile() {
        let registry = NetworkRegistry::with_known_chains();
        let mut custom = NetworkProfile::synthesized(31337);
        custom.display_name = "Anvil".to_string();
        custom.rpc_url = "http://127.0.0.1:8545".to_string();
        registry.register(custom);

        assert_eq!(registry.resolve(31337).display_name, "Anvil");
        assert!(registry.chain_ids().contains(&31337));
    }

    #[test]
    fn resolve_registers_unknown_chain_once() {
        let registry = NetworkRegistry::empty();
        let a = registry.resolve(7);
        let b = registry.resolve(7);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.chain_ids(), vec![7]);
    }

    #[test]
    fn concurrent_resolution_is_consistent() {
        let registry = Arc::new(NetworkRegistry::empty());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for id in 0..50u64 {
                        registry.resolve(id + (i % 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.chain_ids().len(), 51);
    }
}
