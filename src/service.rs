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

//! # Orchestrator Service Module
//!
//! Wires the production clients into the four duty loops and keeps them
//! running. Each enabled duty runs as its own background task under a small
//! supervisor: a loop that exits with a fatal error is restarted after a
//! jittered delay, and only a duty that keeps dying right after startup
//! brings the whole process down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::app_chain::{AppChain, AppChainRpcClient};
use crate::batch_requester::{BatchRequester, BatchRequesterOptions};
use crate::config::OrchestratorConfig;
use crate::context::OrchestratorContext;
use crate::error::{Error, Result};
use crate::ethereum::{EthereumBridge, EthereumBridgeClient};
use crate::loops::run_loop;
use crate::oracle::{Oracle, OracleOptions};
use crate::price::{
    CoinGeckoBackend, PriceBackend, PriceOracleMerger, StaticPriceBackend,
};
use crate::probe;
use crate::relayer::{Relayer, RelayerOptions};
use crate::retry::{retry, ExponentialWithMaxRetryCount};
use crate::signer::{EthSigner, SignerOptions};
use crate::types::BridgeParams;

/// Base delay before a crashed duty is restarted.
const RESTART_DELAY: Duration = Duration::from_secs(15);
/// Random extra delay on top of [`RESTART_DELAY`], so restarted relayers do
/// not stampede a recovering node in lockstep.
const RESTART_JITTER_MAX: Duration = Duration::from_secs(10);
/// A duty alive for this long is considered to have recovered.
const HEALTHY_RUN: Duration = Duration::from_secs(300);
/// Consecutive early crashes after which a duty is declared dead and the
/// process exits.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Starts every enabled duty as a supervised background task.
///
/// Performs the initial parameter fetch first; a failure there is fatal for
/// the whole process (exit code 1). Returns a channel that yields an error
/// once some duty is persistently failing (exit code 2).
pub async fn ignite(
    ctx: &OrchestratorContext,
) -> Result<mpsc::Receiver<Error>> {
    let config = &ctx.config;
    let wallet = match config.ethereum.private_key {
        Some(_) => Some(ctx.evm_wallet()?),
        None => None,
    };
    let ethereum: Arc<dyn EthereumBridge> = Arc::new(EthereumBridgeClient::new(
        &config.ethereum,
        ctx.evm_provider()?,
        wallet.clone(),
    ));
    let app_chain: Arc<dyn AppChain> =
        Arc::new(AppChainRpcClient::new(&config.app_chain)?);

    // Without the bridge parameters nothing below can even compute its
    // options, so this fetch failing after retries ends the process.
    let params = {
        let app_chain = app_chain.clone();
        let mut shutdown = ctx.shutdown_signal();
        retry(
            "initial bridge params fetch",
            ExponentialWithMaxRetryCount::with_attempts(
                config.max_retry_attempts,
            ),
            &mut shutdown,
            || app_chain.bridge_params(),
        )
        .await?
    };
    tracing::debug!(?params, "fetched bridge params");

    let (fatal_tx, fatal_rx) = mpsc::channel(4);

    if config.features.oracle {
        spawn_oracle(ctx, ethereum.clone(), app_chain.clone(), &params, &fatal_tx);
    }
    if config.features.relayer {
        spawn_relayer(ctx, ethereum.clone(), app_chain.clone(), &params, &fatal_tx);
    }
    if config.features.signer {
        spawn_signer(ctx, wallet, app_chain.clone(), &params, &fatal_tx)?;
    }
    if config.features.batch_requester {
        spawn_batch_requester(ctx, app_chain, &fatal_tx);
    }
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        started = true,
    );
    Ok(fatal_rx)
}

fn spawn_oracle(
    ctx: &OrchestratorContext,
    ethereum: Arc<dyn EthereumBridge>,
    app_chain: Arc<dyn AppChain>,
    params: &BridgeParams,
    fatal_tx: &mpsc::Sender<Error>,
) {
    let config = ctx.config.clone();
    let start_height_fallback = params.bridge_contract_start_height;
    supervise(ctx, "Oracle", fatal_tx.clone(), move |ctx| {
        let ethereum = ethereum.clone();
        let app_chain = app_chain.clone();
        let config = config.clone();
        async move {
            // every (re)start recovers the cursor from the app chain
            let start_height = {
                let app_chain = app_chain.clone();
                let mut shutdown = ctx.shutdown_signal();
                let last_claim = retry(
                    "initial last claim fetch",
                    ExponentialWithMaxRetryCount::with_attempts(
                        config.max_retry_attempts,
                    ),
                    &mut shutdown,
                    || app_chain.last_claim_event(),
                )
                .await?;
                if last_claim.eth_height == 0 {
                    start_height_fallback
                } else {
                    last_claim.eth_height
                }
            };
            let oracle = Oracle::new(
                ethereum,
                app_chain,
                ctx.shutdown_signal(),
                OracleOptions {
                    interval: config.loop_duration(),
                    resync_interval: config.resync_interval(),
                    confirmation_depth: config.eth_confirmation_depth,
                    blocks_to_search: config.default_blocks_to_search,
                    max_retry_attempts: config.max_retry_attempts,
                    start_height,
                },
            );
            run_loop(oracle, ctx.shutdown_signal()).await
        }
    });
}

fn spawn_relayer(
    ctx: &OrchestratorContext,
    ethereum: Arc<dyn EthereumBridge>,
    app_chain: Arc<dyn AppChain>,
    params: &BridgeParams,
    fatal_tx: &mpsc::Sender<Error>,
) {
    let config = ctx.config.clone();
    let opts = RelayerOptions {
        interval: config.loop_duration(),
        valset_relaying: config.relayer.valset_relaying,
        batch_relaying: config.relayer.batch_relaying,
        // the chain-wide offsets order the validators; a local override is
        // an operator's escape hatch
        relay_valset_offset: config
            .relay_valset_offset
            .map_or(Duration::from_secs(params.relay_valset_offset), Duration::from_secs),
        relay_batch_offset: config
            .relay_batch_offset
            .map_or(Duration::from_secs(params.relay_batch_offset), Duration::from_secs),
        eth_blocks_to_search: config.relayer.eth_blocks_to_search,
        bridge_deployment_height: config.ethereum.bridge_deployment_height,
        max_retry_attempts: config.max_retry_attempts,
    };
    supervise(ctx, "Relayer", fatal_tx.clone(), move |ctx| {
        let relayer = Relayer::new(
            ethereum.clone(),
            app_chain.clone(),
            ctx.shutdown_signal(),
            opts.clone(),
        );
        run_loop(relayer, ctx.shutdown_signal())
    });
}

fn spawn_signer(
    ctx: &OrchestratorContext,
    wallet: Option<ethers::signers::LocalWallet>,
    app_chain: Arc<dyn AppChain>,
    params: &BridgeParams,
    fatal_tx: &mpsc::Sender<Error>,
) -> Result<()> {
    let wallet = wallet.ok_or(Error::MissingSecrets)?;
    let config = ctx.config.clone();
    let bridge_id = params.bridge_id;
    let orchestrator = config.app_chain.orchestrator_address.clone();
    supervise(ctx, "EthSigner", fatal_tx.clone(), move |ctx| {
        let signer = EthSigner::new(
            app_chain.clone(),
            wallet.clone(),
            bridge_id,
            orchestrator.clone(),
            ctx.shutdown_signal(),
            SignerOptions {
                interval: config.loop_duration(),
                max_retry_attempts: config.max_retry_attempts,
            },
        );
        run_loop(signer, ctx.shutdown_signal())
    });
    Ok(())
}

fn spawn_batch_requester(
    ctx: &OrchestratorContext,
    app_chain: Arc<dyn AppChain>,
    fatal_tx: &mpsc::Sender<Error>,
) {
    let config = ctx.config.clone();
    let prices: Arc<dyn PriceBackend> = Arc::new(build_price_oracle(&config));
    supervise(ctx, "BatchRequester", fatal_tx.clone(), move |ctx| {
        let requester = BatchRequester::new(
            app_chain.clone(),
            prices.clone(),
            config.assets.clone(),
            ctx.shutdown_signal(),
            BatchRequesterOptions {
                interval: config.loop_duration(),
                max_retry_attempts: config.max_retry_attempts,
                min_batch_fee_usd: config.min_batch_fee_usd,
            },
        );
        run_loop(requester, ctx.shutdown_signal())
    });
}

/// Live CoinGecko prices first, static config prices as the fallback.
fn build_price_oracle(config: &OrchestratorConfig) -> PriceOracleMerger {
    let coin_ids = config
        .assets
        .values()
        .filter_map(|asset| {
            asset
                .coingecko_id
                .clone()
                .map(|id| (asset.symbol.clone(), id))
        })
        .collect();
    let coingecko = CoinGeckoBackend::builder().coin_ids(coin_ids).build();
    let static_prices = config
        .assets
        .values()
        .filter_map(|asset| asset.price.map(|p| (asset.symbol.clone(), p)))
        .collect();
    PriceOracleMerger::builder()
        .merge(Box::new(coingecko))
        .merge(Box::new(StaticPriceBackend::new(static_prices)))
}

/// Runs `factory`'s future until clean shutdown, restarting it on failure.
/// A duty that keeps crashing within [`HEALTHY_RUN`] of its start is
/// declared dead after [`MAX_CONSECUTIVE_FAILURES`] attempts.
fn supervise<F, Fut>(
    ctx: &OrchestratorContext,
    tag: &'static str,
    fatal_tx: mpsc::Sender<Error>,
    factory: F,
) where
    F: Fn(OrchestratorContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    let ctx = ctx.clone();
    tokio::task::spawn(async move {
        let mut consecutive_failures = 0u32;
        loop {
            let started = Instant::now();
            let run = factory(ctx.clone());
            let mut shutdown = ctx.shutdown_signal();
            let res = tokio::select! {
                res = run => res,
                _ = shutdown.recv() => break,
            };
            match res {
                Ok(()) => break,
                Err(e) => {
                    if started.elapsed() >= HEALTHY_RUN {
                        consecutive_failures = 0;
                    }
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        tracing::error!(
                            "{tag} failed {consecutive_failures} times in a \
                             row, giving up: {e}"
                        );
                        let _ = fatal_tx.send(e).await;
                        break;
                    }
                    let jitter = rand::thread_rng()
                        .gen_range(Duration::ZERO..RESTART_JITTER_MAX);
                    let delay = RESTART_DELAY + jitter;
                    tracing::warn!(
                        "{tag} exited with an error, restarting in {delay:?}: {e}"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }
        tracing::debug!("{tag} supervisor finished");
    });
}
