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

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;

/// The Ethereum client type used for bridge contract calls.
pub type EthSignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// An enum of all possible errors that could be encountered during the
/// execution of the bridge orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Elliptic Curve error.
    #[error(transparent)]
    EllipticCurve(#[from] ethers::core::k256::elliptic_curve::Error),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Smart contract error.
    #[error(transparent)]
    EthersContractCall(
        #[from] ethers::contract::ContractError<Provider<Http>>,
    ),
    /// Smart contract error.
    #[error(transparent)]
    EthersContractCallWithSigner(
        #[from] ethers::contract::ContractError<EthSignerClient>,
    ),
    /// Ethereum wallet error.
    #[error(transparent)]
    EthersWallet(#[from] ethers::signers::WalletError),
    /// Error while decoding an ABI blob.
    #[error(transparent)]
    EthersAbi(#[from] ethers::abi::Error),
    /// HTTP error while talking to the app chain RPC.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// A wire call exceeded its configured deadline.
    #[error(transparent)]
    Timeout(#[from] tokio::time::error::Elapsed),
    /// The app chain RPC returned a server-side failure.
    #[error("App chain rpc error: {}", message)]
    Rpc {
        /// Error body returned by the node.
        message: String,
    },
    /// A transaction broadcast was rejected by the app chain or the bridge
    /// contract (stale nonce, unbonding validator, ...).
    #[error("Submission rejected: {}", reason)]
    SubmissionRejected {
        /// Rejection reason as reported by the receiving side.
        reason: String,
    },
    /// A retryable operation gave up after exhausting its attempt budget.
    #[error("Retries exhausted: {}", _0)]
    RetryExhausted(#[source] Box<Error>),
    /// The shutdown signal fired while an operation was in flight.
    #[error("Operation cancelled by shutdown")]
    Cancelled,
    /// Missing required private key in the config.
    #[error("Missing required private-key in the config")]
    MissingSecrets,
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

impl Error {
    /// Whether this error is worth another attempt. This backs the default
    /// retryable predicate of the retry primitive; callers can still supply
    /// their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::EthersProvider(_)
                | Error::Reqwest(_)
                | Error::Timeout(_)
                | Error::Rpc { .. }
        )
    }

    /// Whether this error should end the surrounding loop instead of being
    /// swallowed by the tick driver. Exhausted retries mean the node we talk
    /// to is gone; a fresh start (with a fresh cursor fetch) is the recovery.
    pub fn is_loop_fatal(&self) -> bool {
        matches!(self, Error::RetryExhausted(_) | Error::Cancelled)
    }
}

/// A type alias for the result used all over the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
