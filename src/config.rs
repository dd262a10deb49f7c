// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Orchestrator configuration: recognized options, defaults, and loading.
//!
//! Configuration is loaded from a directory of TOML/JSON files merged with
//! environment variables prefixed with `WEBB`. All durations are expressed in
//! seconds in the files; accessor methods return [`std::time::Duration`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use config::{Config, File};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One minute between loop iterations keeps every duty comfortably within
/// one app chain unbonding period while staying light on the RPC nodes.
const fn loop_duration_default() -> u64 {
    60
}
/// The oracle re-reads its cursor from the app chain every 48 hours.
const fn resync_interval_default() -> u64 {
    48 * 60 * 60
}
/// The maximum retry attempts is set to `10` by default.
const fn max_retry_attempts_default() -> u32 {
    10
}
/// Blocks an Ethereum event must be buried under before the oracle attests it.
const fn eth_confirmation_depth_default() -> u64 {
    12
}
/// With a loop duration of one minute, a claim carries events of at most 20
/// blocks so a single broadcast never outgrows the app chain's tx size cap.
const fn default_blocks_to_search_default() -> u64 {
    20
}
/// Window width for the relayer's backward scan over ValsetUpdated events.
const fn eth_blocks_to_search_default() -> u64 {
    5_000
}
/// Requesting a batch below this fee value burns more in gas than it earns.
const fn min_batch_fee_usd_default() -> f64 {
    23.3
}
/// Ethereum reads are given 30 seconds by default.
const fn eth_read_timeout_default() -> u64 {
    30
}
/// App chain reads are given 10 seconds by default.
const fn app_chain_read_timeout_default() -> u64 {
    10
}
/// Transaction broadcasts (either side) are given 60 seconds by default.
const fn broadcast_timeout_default() -> u64 {
    60
}
const fn enabled_default() -> bool {
    true
}

/// OrchestratorConfig is the configuration for the bridge orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrchestratorConfig {
    /// How long a duty waits between two iterations, in seconds.
    #[serde(default = "loop_duration_default")]
    pub loop_duration: u64,
    /// How often the oracle re-reads its scan cursor from the app chain, in
    /// seconds. Recovers from indexing delays, unbonding validators and
    /// dropped RPC responses.
    #[serde(default = "resync_interval_default")]
    pub resync_interval: u64,
    /// How many times a failing wire call is attempted before the loop gives
    /// up and gets restarted.
    #[serde(default = "max_retry_attempts_default")]
    pub max_retry_attempts: u32,
    /// How many blocks below the Ethereum head an event must be before the
    /// oracle treats it as final.
    #[serde(default = "eth_confirmation_depth_default")]
    pub eth_confirmation_depth: u64,
    /// The widest block window one oracle iteration may scan.
    #[serde(default = "default_blocks_to_search_default")]
    pub default_blocks_to_search: u64,
    /// Seconds a newly created valset must age on the app chain before this
    /// orchestrator relays it. Overrides the chain-supplied value when set.
    pub relay_valset_offset: Option<u64>,
    /// Seconds a newly created batch must age on the app chain before this
    /// orchestrator relays it. Overrides the chain-supplied value when set.
    pub relay_batch_offset: Option<u64>,
    /// Minimum accumulated fee value (in USD) before a batch is requested.
    #[serde(default = "min_batch_fee_usd_default")]
    pub min_batch_fee_usd: f64,
    /// Which duties this orchestrator runs.
    #[serde(default)]
    pub features: FeaturesConfig,
    /// Relayer duty sub-toggles and scan width.
    #[serde(default)]
    pub relayer: RelayerDutyConfig,
    /// The Ethereum side of the bridge.
    pub ethereum: EthereumConfig,
    /// The app chain side of the bridge.
    pub app_chain: AppChainConfig,
    /// Known assets, keyed by their app chain denom. Used by the batch
    /// requester to price accumulated fees.
    #[serde(default)]
    pub assets: HashMap<String, AssetConfig>,
}

impl OrchestratorConfig {
    /// Duration between two iterations of each duty loop.
    pub fn loop_duration(&self) -> Duration {
        Duration::from_secs(self.loop_duration)
    }

    /// Duration between two oracle cursor resyncs.
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval)
    }

    /// Makes sure that the config is valid, by going through the whole config
    /// and doing some basic checks.
    pub fn verify(&self) -> Result<()> {
        // The relayer and signer duties submit signed artifacts, so they
        // cannot run without an Ethereum key.
        let needs_key = self.features.relayer || self.features.signer;
        if needs_key && self.ethereum.private_key.is_none() {
            return Err(Error::MissingSecrets);
        }
        if self.eth_confirmation_depth == 0 {
            return Err(Error::Generic(
                "eth-confirmation-depth must be at least 1 block",
            ));
        }
        if self.default_blocks_to_search == 0 {
            return Err(Error::Generic(
                "default-blocks-to-search must be at least 1 block",
            ));
        }
        if self.features.batch_requester && self.assets.is_empty() {
            tracing::warn!(
                "batch requester is enabled but no assets are configured; \
                 every unbatched token will be skipped"
            );
        }
        Ok(())
    }
}

/// FeaturesConfig selects which duties this orchestrator performs. All four
/// are on by default; a dedicated relayer box would disable everything but
/// `relayer`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FeaturesConfig {
    /// Observe finalized Ethereum events and attest them on the app chain.
    pub oracle: bool,
    /// Submit signed valsets and batches to the bridge contract.
    pub relayer: bool,
    /// Sign pending valsets and batches on the app chain.
    pub signer: bool,
    /// Request new outgoing batches when fees warrant it.
    pub batch_requester: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            oracle: true,
            relayer: true,
            signer: true,
            batch_requester: true,
        }
    }
}

/// RelayerDutyConfig carries the relayer duty's sub-toggles.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerDutyConfig {
    /// Relay valset updates to the bridge contract.
    #[serde(default = "enabled_default")]
    pub valset_relaying: bool,
    /// Relay transaction batches to the bridge contract.
    #[serde(default = "enabled_default")]
    pub batch_relaying: bool,
    /// Window width (in blocks) for the backward scan that locates the most
    /// recent ValsetUpdated event on Ethereum.
    #[serde(default = "eth_blocks_to_search_default")]
    pub eth_blocks_to_search: u64,
}

impl Default for RelayerDutyConfig {
    fn default() -> Self {
        Self {
            valset_relaying: true,
            batch_relaying: true,
            eth_blocks_to_search: eth_blocks_to_search_default(),
        }
    }
}

/// EthereumConfig is the configuration for the Ethereum side of the bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthereumConfig {
    /// Http(s) Endpoint for quick Req/Res.
    #[serde(skip_serializing)]
    pub http_endpoint: url::Url,
    /// The address of the bridge contract on this chain.
    pub bridge_address: Address,
    /// The block number where the bridge contract got deployed at. Bounds
    /// the relayer's backward event scan.
    pub bridge_deployment_height: u64,
    /// chain specific id (output of chainId opcode on EVM networks).
    pub chain_id: u64,
    /// The Private Key of the orchestrator on this network. The format is
    /// more dynamic here:
    /// 1. if it starts with '0x' then this would be a raw (32 bytes) hex
    ///    encoded private key.
    ///    Example: 0x8917174396171783496173419137618235192359106130478137647163400318
    ///
    /// 2. if it starts with '$' then it would be considered as an Enviroment
    ///    variable of a hex-encoded private key.
    ///    Example: $ORCHESTRATOR_PRIVATE_KEY
    #[serde(skip_serializing, default)]
    pub private_key: Option<PrivateKey>,
    /// Read timeout in seconds for Ethereum view calls and event queries.
    #[serde(default = "eth_read_timeout_default")]
    pub read_timeout: u64,
    /// Broadcast timeout in seconds for contract submissions.
    #[serde(default = "broadcast_timeout_default")]
    pub broadcast_timeout: u64,
}

impl EthereumConfig {
    /// Read deadline for Ethereum view calls and event queries.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    /// Broadcast deadline for contract submissions.
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.broadcast_timeout)
    }
}

/// AppChainConfig is the configuration for the app chain side of the bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppChainConfig {
    /// Http(s) Endpoint of the app chain RPC node.
    #[serde(skip_serializing)]
    pub rpc_endpoint: url::Url,
    /// This orchestrator's account address on the app chain. Claims and
    /// confirms are attributed to it.
    pub orchestrator_address: String,
    /// Read timeout in seconds for app chain queries.
    #[serde(default = "app_chain_read_timeout_default")]
    pub read_timeout: u64,
    /// Broadcast timeout in seconds for app chain transactions.
    #[serde(default = "broadcast_timeout_default")]
    pub broadcast_timeout: u64,
}

impl AppChainConfig {
    /// Read deadline for app chain queries.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    /// Broadcast deadline for app chain transactions.
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.broadcast_timeout)
    }
}

/// AssetConfig describes one bridged token known to this orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssetConfig {
    /// The token's display symbol, e.g. `ETH`.
    pub symbol: String,
    /// CoinGecko coin id used by the live price backend, e.g. `ethereum`.
    /// When absent the asset is only priced through the static price below.
    pub coingecko_id: Option<String>,
    /// On-chain decimals of the ERC20 representation.
    pub decimals: u8,
    /// Static USD price used when no live price is available.
    pub price: Option<f64>,
}

/// PrivateKey represents a private key.
#[derive(Clone)]
pub struct PrivateKey(H256);

impl PrivateKey {
    /// The raw 32 bytes of the key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_fixed_bytes()
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl From<H256> for PrivateKey {
    fn from(secret: H256) -> Self {
        PrivateKey(secret)
    }
}

impl Serialize for PrivateKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("<redacted>")
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVistor;
        impl<'de> serde::de::Visitor<'de> for PrivateKeyVistor {
            type Value = H256;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "hex string or an env var containing a hex string in it",
                )
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if value.starts_with("0x") {
                    // hex value
                    H256::from_str(value).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{e}\n got {} chars but expected a 66 chars string \
                             (including the 0x prefix)",
                            value.len()
                        ))
                    })
                } else if value.starts_with('$') {
                    // env
                    let var = value.strip_prefix('$').unwrap_or(value);
                    tracing::trace!("Reading {} from env", var);
                    let val = std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {}: {}",
                            var, e,
                        ))
                    })?;
                    H256::from_str(&val).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{e}\n expected a 66 chars string (including the \
                             0x prefix) but found {} chars",
                            val.len()
                        ))
                    })
                } else {
                    Err(serde::de::Error::custom(
                        "expected a hex string or an env var ($VAR) holding one",
                    ))
                }
            }
        }

        deserializer
            .deserialize_str(PrivateKeyVistor)
            .map(PrivateKey)
    }
}

/// A helper function that will search for all config files in the given
/// directory and return them as a vec of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(base_dir: P) -> Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory
    // and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(Error::from))
        .collect()
}

/// Try to parse the [`OrchestratorConfig`] from the given config file(s).
pub fn parse_from_files(files: &[PathBuf]) -> Result<OrchestratorConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of WEBB).
    let builder = builder
        .add_source(config::Environment::with_prefix("WEBB").separator("_"));
    let cfg = builder.build()?;
    // and finally deserialize the config and verify it.
    let config: std::result::Result<
        OrchestratorConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => {
            c.verify()?;
            Ok(c)
        }
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files from the given directory.
///
/// It is the same as using the [`search_config_files`] and
/// [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(path: P) -> Result<OrchestratorConfig> {
    parse_from_files(&search_config_files(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [ethereum]
        http-endpoint = "http://localhost:8545"
        bridge-address = "0x3f4e0668c20e100d7c2a27d4b177ac65b2875d26"
        bridge-deployment-height = 100
        chain-id = 5
        private-key = "0x000000000000000000000000000000000000000000000000000000000000dead"

        [app-chain]
        rpc-endpoint = "http://localhost:1317"
        orchestrator-address = "app1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu"
    "#;

    fn parse(toml: &str) -> OrchestratorConfig {
        let cfg = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        serde_path_to_error::deserialize(cfg).unwrap()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(MINIMAL);
        assert_eq!(config.loop_duration, 60);
        assert_eq!(config.resync_interval, 48 * 60 * 60);
        assert_eq!(config.eth_confirmation_depth, 12);
        assert_eq!(config.default_blocks_to_search, 20);
        assert!(config.features.oracle);
        assert!(config.features.relayer);
        assert!(config.relayer.valset_relaying);
        assert!(config.relayer.batch_relaying);
        assert_eq!(config.ethereum.read_timeout(), Duration::from_secs(30));
        assert_eq!(config.app_chain.read_timeout(), Duration::from_secs(10));
        assert!(config.verify().is_ok());
    }

    #[test]
    fn duties_needing_a_key_fail_verification_without_one() {
        let mut config = parse(MINIMAL);
        config.ethereum.private_key = None;
        assert!(matches!(config.verify(), Err(Error::MissingSecrets)));

        // A pure oracle box is fine without a key.
        config.features.relayer = false;
        config.features.signer = false;
        assert!(config.verify().is_ok());
    }

    #[test]
    fn zero_confirmation_depth_is_rejected() {
        let mut config = parse(MINIMAL);
        config.eth_confirmation_depth = 0;
        assert!(config.verify().is_err());
    }

    #[test]
    fn sub_toggles_parse() {
        let toml = format!(
            "{MINIMAL}\n[relayer]\nvalset-relaying = false\nbatch-relaying = true\n"
        );
        let config = parse(&toml);
        assert!(!config.relayer.valset_relaying);
        assert!(config.relayer.batch_relaying);
    }
}
