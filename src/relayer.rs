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

//! The relayer duty: propagate signed app chain artifacts (valsets and
//! transaction batches) to the bridge contract.
//!
//! Several orchestrators can relay the same artifact; the contract rejects
//! all but the first. The offset gates stagger the attempts so that the
//! nominated leader usually relays alone and the rest observe the result on
//! their next tick.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::app_chain::AppChain;
use crate::context::Shutdown;
use crate::error::{Error, Result};
use crate::ethereum::EthereumBridge;
use crate::loops::Loop;
use crate::probe;
use crate::retry::{retry, ExponentialWithMaxRetryCount};
use crate::types::ValsetUpdatedEvent;

/// Relayer scheduling, gating, and scan parameters.
#[derive(Debug, Clone)]
pub struct RelayerOptions {
    /// Time between two relay iterations.
    pub interval: Duration,
    /// Relay valset updates.
    pub valset_relaying: bool,
    /// Relay transaction batches.
    pub batch_relaying: bool,
    /// How long a valset must age on the app chain before this orchestrator
    /// relays it.
    pub relay_valset_offset: Duration,
    /// How long a batch must age on the app chain before this orchestrator
    /// relays it.
    pub relay_batch_offset: Duration,
    /// Window width for the backward ValsetUpdated scan.
    pub eth_blocks_to_search: u64,
    /// The bridge contract deployment height: the backward scan never looks
    /// below it.
    pub bridge_deployment_height: u64,
    /// Attempt budget for each retried sub-duty.
    pub max_retry_attempts: u32,
}

/// The relayer duty loop.
pub struct Relayer {
    ethereum: Arc<dyn EthereumBridge>,
    app_chain: Arc<dyn AppChain>,
    shutdown: Shutdown,
    retry_policy: ExponentialWithMaxRetryCount,
    opts: RelayerOptions,
}

impl Relayer {
    /// Creates the relayer duty.
    pub fn new(
        ethereum: Arc<dyn EthereumBridge>,
        app_chain: Arc<dyn AppChain>,
        shutdown: Shutdown,
        opts: RelayerOptions,
    ) -> Self {
        Self {
            ethereum,
            app_chain,
            shutdown,
            retry_policy: ExponentialWithMaxRetryCount::with_attempts(
                opts.max_retry_attempts,
            ),
            opts,
        }
    }
}

#[async_trait::async_trait]
impl Loop for Relayer {
    const TAG: &'static str = "Relayer";

    fn interval(&self) -> Duration {
        self.opts.interval
    }

    async fn tick(&mut self) -> Result<()> {
        let ethereum = self.ethereum.clone();
        let app_chain = self.app_chain.clone();
        let opts = self.opts.clone();
        if opts.valset_relaying {
            retry(
                "valset relay",
                self.retry_policy.clone(),
                &mut self.shutdown,
                || relay_valsets(&*app_chain, &*ethereum, &opts),
            )
            .await?;
        }
        if opts.batch_relaying {
            retry(
                "batch relay",
                self.retry_policy.clone(),
                &mut self.shutdown,
                || relay_batches(&*app_chain, &*ethereum, &opts),
            )
            .await?;
        }
        Ok(())
    }
}

/// Relays the newest fully signed valset that the contract has not seen yet.
///
/// Walks the latest valsets newest to oldest and arbitrates the first one
/// carrying confirms. The signatures presented to the contract are produced
/// by the valset it currently trusts, so the *previous* valset is fetched
/// and passed along as the signing valset.
pub(crate) async fn relay_valsets(
    app_chain: &dyn AppChain,
    ethereum: &dyn EthereumBridge,
    opts: &RelayerOptions,
) -> Result<()> {
    let latest_valsets = app_chain.latest_valsets().await?;

    // TODO(bridge): when the newest valset has no confirms yet we fall back
    // to an older signed one and never revisit the newer entries until the
    // next tick; revisit once signer latency in production is known.
    let mut candidate = None;
    for valset in &latest_valsets {
        let confirms = app_chain.all_valset_confirms(valset.nonce).await?;
        if !confirms.is_empty() {
            candidate = Some((valset.clone(), confirms));
            break;
        }
    }
    let Some((candidate, confirms)) = candidate else {
        tracing::debug!("no signed valset to relay");
        return Ok(());
    };

    let head = ethereum.header_by_number(None).await?;
    let contract_nonce = ethereum.get_valset_nonce().await?.as_u64();
    // the contract validates signatures against its current members, so the
    // confirms must be presented through the valset it trusts today
    let signing_valset = app_chain.valset_at(contract_nonce).await?;
    let latest_eth_valset = find_latest_eth_valset(
        ethereum,
        head.number,
        opts.eth_blocks_to_search,
        opts.bridge_deployment_height,
    )
    .await?;
    if signing_valset.nonce != latest_eth_valset.valset_nonce {
        return Err(Error::Generic(
            "valset nonce on the contract does not match the app chain copy",
        ));
    }

    if candidate.nonce <= latest_eth_valset.valset_nonce {
        tracing::debug!(
            candidate = candidate.nonce,
            on_chain = latest_eth_valset.valset_nonce,
            "valset already relayed"
        );
        return Ok(());
    }

    let block = app_chain.get_block(candidate.height).await?;
    if !offset_elapsed(block.time, opts.relay_valset_offset) {
        tracing::debug!(
            candidate = candidate.nonce,
            "deferring valset relay until the offset elapses"
        );
        return Ok(());
    }

    let tx_hash = ethereum
        .send_eth_valset_update(&candidate, &signing_valset, &confirms)
        .await?;
    tracing::info!(
        candidate = candidate.nonce,
        signing = signing_valset.nonce,
        ?tx_hash,
        "sent valset update to Ethereum"
    );
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Relayer,
        valset_nonce = candidate.nonce,
        ?tx_hash,
    );
    Ok(())
}

/// Relays the newest fully signed batch whose nonce the contract has not
/// executed yet.
pub(crate) async fn relay_batches(
    app_chain: &dyn AppChain,
    ethereum: &dyn EthereumBridge,
    opts: &RelayerOptions,
) -> Result<()> {
    let latest_batches = app_chain.latest_transaction_batches().await?;

    let mut candidate = None;
    for batch in &latest_batches {
        let confirms = app_chain
            .transaction_batch_signatures(
                batch.batch_nonce,
                batch.token_contract,
            )
            .await?;
        if !confirms.is_empty() {
            candidate = Some((batch.clone(), confirms));
            break;
        }
    }
    let Some((batch, confirms)) = candidate else {
        tracing::debug!("no signed batch to relay");
        return Ok(());
    };

    let on_chain_nonce = ethereum
        .get_tx_batch_nonce(batch.token_contract)
        .await?
        .as_u64();
    if batch.batch_nonce <= on_chain_nonce {
        tracing::debug!(
            candidate = batch.batch_nonce,
            on_chain = on_chain_nonce,
            "batch already executed"
        );
        return Ok(());
    }

    let head = ethereum.header_by_number(None).await?;
    let contract_nonce = ethereum.get_valset_nonce().await?.as_u64();
    let signing_valset = app_chain.valset_at(contract_nonce).await?;
    // sanity anchor: the valset we sign with must be the one the contract
    // last announced, otherwise someone moved the contract under us
    let latest_eth_valset = find_latest_eth_valset(
        ethereum,
        head.number,
        opts.eth_blocks_to_search,
        opts.bridge_deployment_height,
    )
    .await?;
    if signing_valset.nonce != latest_eth_valset.valset_nonce {
        return Err(Error::Generic(
            "valset nonce on the contract does not match the app chain copy",
        ));
    }

    let block = app_chain.get_block(batch.block_created_at).await?;
    if !offset_elapsed(block.time, opts.relay_batch_offset) {
        tracing::debug!(
            candidate = batch.batch_nonce,
            "deferring batch relay until the offset elapses"
        );
        return Ok(());
    }

    let tx_hash = ethereum
        .send_transaction_batch(&signing_valset, &batch, &confirms)
        .await?;
    tracing::info!(
        batch_nonce = batch.batch_nonce,
        token = ?batch.token_contract,
        ?tx_hash,
        "sent transaction batch to Ethereum"
    );
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Relayer,
        batch_nonce = batch.batch_nonce,
        ?tx_hash,
    );
    Ok(())
}

/// Finds the most recent ValsetUpdated event by walking fixed windows
/// backwards from `head` until one yields events or the contract deployment
/// height is reached. The deployment transaction emits the genesis valset,
/// so an empty full scan means the node is badly out of sync.
async fn find_latest_eth_valset(
    ethereum: &dyn EthereumBridge,
    head: u64,
    step: u64,
    deployment_height: u64,
) -> Result<ValsetUpdatedEvent> {
    let mut end = head;
    loop {
        let start = end.saturating_sub(step).max(deployment_height);
        let events = ethereum.get_valset_updated_events(start, end).await?;
        if let Some(latest) =
            events.into_iter().max_by_key(|ev| ev.valset_nonce)
        {
            return Ok(latest);
        }
        if start <= deployment_height {
            return Err(Error::Generic(
                "no ValsetUpdated events since the contract deployment",
            ));
        }
        end = start - 1;
    }
}

/// Whether `created` is at least `offset` in the past. A creation time in
/// the future (clock skew between us and the app chain) defers the relay.
fn offset_elapsed(created: SystemTime, offset: Duration) -> bool {
    match SystemTime::now().duration_since(created) {
        Ok(age) => age >= offset,
        Err(_) => false,
    }
}
