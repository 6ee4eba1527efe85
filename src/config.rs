use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{address, Address};

use crate::prelude::*;

/// Chain-wide constants of the network the oracle attests for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,

    /// Blocks a block must be buried under to count as finalized.
    pub confirmation_blocks: u64,

    /// Seconds between two reward updates.
    pub sync_period: u64,

    pub slots_per_epoch: u64,
    pub seconds_per_slot: u64,

    pub deposit_token_symbol: String,

    /// Wrapped units per deposit token. Only set on networks where the
    /// beacon balance is denominated in a wrapped token (mGNO on Gnosis).
    #[serde(default)]
    pub deposit_token_rate: Option<u64>,
}

impl NetworkConfig {
    pub fn seconds_per_epoch(&self) -> u64 {
        self.slots_per_epoch * self.seconds_per_slot
    }
}

/// A set of replicated subgraph endpoints queried under majority consensus.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct GraphConfig {
    pub endpoints: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeaconConfig {
    pub endpoint: String,

    #[serde(default = "default_validators_chunk_size")]
    pub validators_chunk_size: usize,
}

fn default_validators_chunk_size() -> usize {
    100
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct IpfsConfig {
    pub fetch_endpoints: Vec<String>,
    pub pin_endpoints: Vec<String>,
}

/// Object store the signed votes are published to.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    pub endpoint: String,
    pub bucket: String,

    /// Opaque `Authorization` header value, if the store requires one.
    #[serde(default)]
    pub authorization: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct OracleConfig {
    /// Hex-encoded secp256k1 signing key. Usually injected through the
    /// environment rather than the config file.
    #[serde(default)]
    pub private_key: Option<String>,

    #[serde(default = "default_process_interval")]
    pub process_interval: u64,
}

fn default_process_interval() -> u64 {
    30
}

/// The recognized pool set plus the sink for undeliverable rewards.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct PoolsConfig {
    #[serde(default)]
    pub recognized: Vec<PoolKind>,

    pub fallback_address: Address,
}

impl PoolsConfig {
    /// Looks up the reading strategy for a recognized contract. Anything
    /// not found here is terminal for the allocator.
    pub fn recognize(&self, contract: &Address) -> Option<&PoolKind> {
        self.recognized.iter().find(|p| p.contract() == *contract)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub backoff_unit_sec: u64,
    pub backoff_factor: u32,
    pub max_backoff_sec: u64,
    pub max_elapsed_sec: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_unit_sec: 1,
            backoff_factor: 2,
            max_backoff_sec: 900,
            max_elapsed_sec: 300,
        }
    }
}

impl RetryConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_secs(self.backoff_unit_sec)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_sec)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_sec)
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub max_level: tracing::Level,

    #[serde(default)]
    pub include_tokio: bool,

    #[serde(default)]
    pub include_reqwest: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_level: tracing::Level::INFO,
            include_tokio: Default::default(),
            include_reqwest: Default::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RootConfig {
    pub network: NetworkConfig,

    /// Protocol subgraph replicas (voting parameters, distributions,
    /// claims, operators, registrations).
    pub protocol_graph: GraphConfig,

    /// AMM subgraph replicas (pool ticks and LP positions).
    pub pools_graph: GraphConfig,

    pub beacon: BeaconConfig,
    pub ipfs: IpfsConfig,
    pub store: StoreConfig,
    pub oracle: OracleConfig,
    pub pools: PoolsConfig,

    #[serde(default)]
    pub retries: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RootConfig {
    pub fn load(explicit_file: &Option<std::path::PathBuf>) -> Result<Self, Error> {
        let mut s = config::Config::builder();

        s = s.add_source(config::File::with_name("vigil.toml").required(false));

        if let Some(explicit) = explicit_file.as_deref().and_then(Path::to_str) {
            s = s.add_source(config::File::with_name(explicit).required(true));
        }

        s = s.add_source(config::Environment::with_prefix("VIGIL").separator("__"));

        s.build()
            .map_err(Error::config)?
            .try_deserialize()
            .map_err(Error::config)
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum KnownNetwork {
    Mainnet,
    Goerli,
    Gnosis,
}

impl KnownNetwork {
    pub const VARIANTS: &'static [KnownNetwork] = &[
        KnownNetwork::Mainnet,
        KnownNetwork::Goerli,
        KnownNetwork::Gnosis,
    ];
}

impl FromStr for KnownNetwork {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(KnownNetwork::Mainnet),
            "goerli" => Ok(KnownNetwork::Goerli),
            "gnosis" => Ok(KnownNetwork::Gnosis),
            x => Err(Error::config(format!("unknown network {x}"))),
        }
    }
}

impl Display for KnownNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KnownNetwork::Mainnet => f.write_str("mainnet"),
            KnownNetwork::Goerli => f.write_str("goerli"),
            KnownNetwork::Gnosis => f.write_str("gnosis"),
        }
    }
}

impl From<&KnownNetwork> for NetworkConfig {
    fn from(value: &KnownNetwork) -> Self {
        match value {
            KnownNetwork::Mainnet => NetworkConfig {
                chain_id: 1,
                confirmation_blocks: 15,
                sync_period: 86_400,
                slots_per_epoch: 32,
                seconds_per_slot: 12,
                deposit_token_symbol: "ETH".into(),
                deposit_token_rate: None,
            },
            KnownNetwork::Goerli => NetworkConfig {
                chain_id: 5,
                confirmation_blocks: 15,
                sync_period: 3_600,
                slots_per_epoch: 32,
                seconds_per_slot: 12,
                deposit_token_symbol: "ETH".into(),
                deposit_token_rate: None,
            },
            KnownNetwork::Gnosis => NetworkConfig {
                chain_id: 100,
                confirmation_blocks: 24,
                sync_period: 86_400,
                slots_per_epoch: 16,
                seconds_per_slot: 5,
                deposit_token_symbol: "GNO".into(),
                // 1 GNO deposits as 32 mGNO
                deposit_token_rate: Some(32),
            },
        }
    }
}

impl From<&KnownNetwork> for GraphConfig {
    fn from(value: &KnownNetwork) -> Self {
        match value {
            KnownNetwork::Mainnet => GraphConfig {
                endpoints: vec![
                    "https://graph.vigil.zone/subgraphs/name/oracle/mainnet".into(),
                    "https://graph-fallback.vigil.zone/subgraphs/name/oracle/mainnet".into(),
                ],
            },
            KnownNetwork::Goerli => GraphConfig {
                endpoints: vec![
                    "https://graph.vigil.zone/subgraphs/name/oracle/goerli".into(),
                    "https://graph-fallback.vigil.zone/subgraphs/name/oracle/goerli".into(),
                ],
            },
            KnownNetwork::Gnosis => GraphConfig {
                endpoints: vec![
                    "https://graph.vigil.zone/subgraphs/name/oracle/gnosis".into(),
                    "https://graph-fallback.vigil.zone/subgraphs/name/oracle/gnosis".into(),
                ],
            },
        }
    }
}

impl From<&KnownNetwork> for IpfsConfig {
    fn from(_: &KnownNetwork) -> Self {
        IpfsConfig {
            fetch_endpoints: vec![
                "https://gateway.pinata.cloud".into(),
                "https://cloudflare-ipfs.com".into(),
                "https://ipfs.io".into(),
            ],
            pin_endpoints: vec!["http://127.0.0.1:5001".into()],
        }
    }
}

impl From<&KnownNetwork> for PoolsConfig {
    fn from(value: &KnownNetwork) -> Self {
        let fallback_address = match value {
            KnownNetwork::Mainnet => address!("144a98cb1cdbb23610501fe6108858d9b7d24934"),
            KnownNetwork::Goerli => address!("1867c96601bc5fe24f685d112314b8f3fe228d5a"),
            KnownNetwork::Gnosis => address!("8737f638e9af54e89ed9e1234dbc68b115cd0318"),
        };

        PoolsConfig {
            recognized: Vec::new(),
            fallback_address,
        }
    }
}

impl From<&KnownNetwork> for RootConfig {
    fn from(value: &KnownNetwork) -> Self {
        RootConfig {
            network: value.into(),
            protocol_graph: value.into(),
            pools_graph: GraphConfig {
                endpoints: vec![format!(
                    "https://graph.vigil.zone/subgraphs/name/uniswap-v3/{value}"
                )],
            },
            beacon: BeaconConfig {
                endpoint: "http://127.0.0.1:5052".into(),
                validators_chunk_size: default_validators_chunk_size(),
            },
            ipfs: value.into(),
            store: StoreConfig {
                endpoint: "https://votes.vigil.zone".into(),
                bucket: format!("oracle-votes-{value}"),
                authorization: None,
            },
            oracle: OracleConfig::default(),
            pools: value.into(),
            retries: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognize_matches_on_contract_address() {
        let pool = address!("00000000000000000000000000000000000000c1");
        let token = address!("00000000000000000000000000000000000000f1");

        let pools = PoolsConfig {
            recognized: vec![PoolKind::SingleToken { pool, token }],
            fallback_address: Address::ZERO,
        };

        assert!(pools.recognize(&pool).is_some());
        assert!(pools.recognize(&token).is_none());
    }

    #[test]
    fn preset_round_trips_through_toml() {
        let preset = RootConfig::from(&KnownNetwork::Gnosis);
        let rendered = toml::to_string_pretty(&preset).unwrap();
        let parsed: RootConfig = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed.network.chain_id, 100);
        assert_eq!(parsed.network.deposit_token_rate, Some(32));
    }
}
