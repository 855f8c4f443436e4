// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relay configuration, loaded once at startup from YAML files in a config
//! directory, with environment variable overrides.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use ethers_core::types::H160;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use url::Url;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Http,
    Ws,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub port: u16,
    #[serde(rename = "type")]
    pub kind: ServerKind,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Previewnet,
    Local,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKeyFormat {
    #[serde(rename = "HEX_ECDSA")]
    HexEcdsa,
    #[serde(rename = "HEX_ED25519")]
    HexEd25519,
    #[serde(rename = "DER")]
    Der,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HederaSettings {
    pub network: Network,
    /// Operator account in `shard.realm.num` form.
    pub operator_id: String,
    /// EVM alias of the operator account, used as the default `from` of
    /// value-bearing simulated calls.
    pub operator_evm_address: H160,
    /// Private key of the operator. Never logged.
    pub operator_key: String,
    pub operator_key_format: OperatorKeyFormat,
    /// Consensus node endpoints, only used with [Network::Local].
    pub network_config: Option<String>,
    pub chain_id: u64,
    /// Total hbar the operator is willing to spend on behalf of users,
    /// in tinybars.
    pub hbar_budget: u64,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct MirrorNodeSettings {
    pub base_url: Url,
    /// Endpoint serving the `contracts/call` simulation API.
    pub web3_url: Url,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "timeout_seconds")]
    pub timeout: Duration,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeatureSettings {
    pub enforce_api_key: bool,
    pub enable_batch_requests: bool,
    pub filter_api_enabled: bool,
    pub debug_api_enabled: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            enforce_api_key: false,
            enable_batch_requests: true,
            filter_api_enabled: true,
            debug_api_enabled: false,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "default_expiration_seconds")]
    pub default_expiration: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "cleanup_interval_seconds")]
    pub cleanup_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_expiration: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GasSettings {
    /// Repeat the current gas price for every block of `eth_feeHistory`
    /// instead of fetching per-block network fees.
    pub fee_history_fixed: bool,
    /// Upper bound on the `eth_feeHistory` block count.
    pub fee_history_max_results: u64,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            fee_history_fixed: true,
            fee_history_max_results: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TierSettings {
    pub requests_per_minute: u32,
    /// Tinybars a key may spend per minute.
    pub hbar_limit: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiKeySettings {
    pub key: String,
    pub tier: String,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SubscriptionSettings {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_millis")]
    pub poll_interval: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub version: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    /// A `tracing_subscriber::EnvFilter` directive, e.g. `info` or
    /// `hedera_eth_relay=debug`.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub hedera: HederaSettings,
    pub mirror_node: MirrorNodeSettings,
    #[serde(default)]
    pub features: FeatureSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub gas: GasSettings,
    #[serde(default)]
    pub limiter: HashMap<String, TierSettings>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeySettings>,
    #[serde(default)]
    pub subscriptions: SubscriptionSettings,
    pub application: ApplicationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load the default configuration from a directory, then potential
    /// overrides specific to the run mode, then overrides from the local
    /// environment, finally parse it into the [Settings] type.
    pub fn new(config_dir: &Path, run_mode: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(config_dir.join("default")))
            // Optional mode specific overrides, checked into git.
            .add_source(File::from(config_dir.join(run_mode)).required(false))
            // Optional local overrides, not checked into git.
            .add_source(File::from(config_dir.join("local")).required(false))
            // e.g. `RELAY_SERVER__PORT=7546` overrides `server.port`.
            .add_source(
                Environment::with_prefix("relay")
                    .prefix_separator("_")
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::{Network, ServerKind, Settings};
    use config::{Config, File, FileFormat};

    const EXAMPLE: &str = r#"
server:
  port: 7546
  type: http
hedera:
  network: testnet
  operator_id: 0.0.902
  operator_evm_address: "0x05fba803be258049a27b820088bab1cad2058871"
  operator_key: "302e0201..."
  operator_key_format: HEX_ECDSA
  chain_id: 296
  hbar_budget: 100000000000
mirror_node:
  base_url: "https://testnet.mirrornode.hedera.com/"
  web3_url: "https://testnet.mirrornode.hedera.com/"
  timeout_seconds: 10
limiter:
  basic:
    requests_per_minute: 100
    hbar_limit: 1000000000
api_keys:
  - key: abc123
    tier: basic
application:
  version: 0.1.0
logging:
  level: debug
"#;

    #[test]
    fn parse_example() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(EXAMPLE, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.server.port, 7546);
        assert_eq!(settings.server.kind, ServerKind::Http);
        assert_eq!(settings.hedera.network, Network::Testnet);
        assert_eq!(settings.hedera.chain_id, 296);
        assert_eq!(settings.mirror_node.timeout.as_secs(), 10);
        assert_eq!(settings.limiter["basic"].requests_per_minute, 100);
        // Defaults kick in for the omitted sections.
        assert!(settings.features.enable_batch_requests);
        assert!(!settings.features.enforce_api_key);
        assert_eq!(settings.cache.default_expiration.as_secs(), 3600);
        assert_eq!(settings.subscriptions.poll_interval.as_millis(), 500);
        assert_eq!(settings.logging.level, "debug");
    }
}
