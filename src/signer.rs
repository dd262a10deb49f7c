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

//! The signer duty: sign pending valsets and batches on the app chain on
//! behalf of the local validator. No Ethereum interaction.

use std::sync::Arc;
use std::time::Duration;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::H256;

use crate::app_chain::AppChain;
use crate::context::Shutdown;
use crate::error::Result;
use crate::loops::Loop;
use crate::probe;
use crate::retry::{retry, ExponentialWithMaxRetryCount};
use crate::types::{BatchConfirm, ValsetConfirm};

/// Signer scheduling parameters.
#[derive(Debug, Clone)]
pub struct SignerOptions {
    /// Time between two signing iterations.
    pub interval: Duration,
    /// Attempt budget for each retried wire read.
    pub max_retry_attempts: u32,
}

/// The signer duty loop.
pub struct EthSigner {
    app_chain: Arc<dyn AppChain>,
    wallet: LocalWallet,
    bridge_id: H256,
    orchestrator: String,
    shutdown: Shutdown,
    retry_policy: ExponentialWithMaxRetryCount,
    interval: Duration,
}

impl EthSigner {
    /// Creates the signer duty for the given orchestrator identity.
    pub fn new(
        app_chain: Arc<dyn AppChain>,
        wallet: LocalWallet,
        bridge_id: H256,
        orchestrator: String,
        shutdown: Shutdown,
        opts: SignerOptions,
    ) -> Self {
        Self {
            app_chain,
            wallet,
            bridge_id,
            orchestrator,
            shutdown,
            retry_policy: ExponentialWithMaxRetryCount::with_attempts(
                opts.max_retry_attempts,
            ),
            interval: opts.interval,
        }
    }

    async fn sign_valsets(&mut self) -> Result<()> {
        let app_chain = self.app_chain.clone();
        let orchestrator = self.orchestrator.clone();
        let unsigned = retry(
            "unsigned valsets query",
            self.retry_policy.clone(),
            &mut self.shutdown,
            || app_chain.oldest_unsigned_valsets(&orchestrator),
        )
        .await?;

        for valset in unsigned {
            let digest = valset.checkpoint_hash(self.bridge_id);
            let signature = self.wallet.sign_hash(digest)?;
            let confirm = ValsetConfirm {
                nonce: valset.nonce,
                orchestrator: self.orchestrator.clone(),
                eth_address: self.wallet.address(),
                signature: format!("0x{signature}"),
            };
            // The app chain rejects duplicates, which makes a replayed tick
            // harmless; a rejection still surfaces as the tick's error so
            // the operator sees it.
            self.app_chain.send_valset_confirm(&confirm).await?;
            tracing::info!(nonce = valset.nonce, "confirmed valset");
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Signer,
                valset_nonce = valset.nonce,
            );
        }
        Ok(())
    }

    async fn sign_batches(&mut self) -> Result<()> {
        let app_chain = self.app_chain.clone();
        let orchestrator = self.orchestrator.clone();
        let unsigned = retry(
            "unsigned batch query",
            self.retry_policy.clone(),
            &mut self.shutdown,
            || app_chain.oldest_unsigned_batch(&orchestrator),
        )
        .await?;

        let Some(batch) = unsigned else {
            return Ok(());
        };
        let digest = batch.checkpoint_hash(self.bridge_id);
        let signature = self.wallet.sign_hash(digest)?;
        let confirm = BatchConfirm {
            nonce: batch.batch_nonce,
            token_contract: batch.token_contract,
            orchestrator: self.orchestrator.clone(),
            eth_address: self.wallet.address(),
            signature: format!("0x{signature}"),
        };
        self.app_chain.send_batch_confirm(&confirm).await?;
        tracing::info!(
            nonce = batch.batch_nonce,
            token = ?batch.token_contract,
            "confirmed batch"
        );
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Signer,
            batch_nonce = batch.batch_nonce,
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Loop for EthSigner {
    const TAG: &'static str = "EthSigner";

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&mut self) -> Result<()> {
        self.sign_valsets().await?;
        self.sign_batches().await?;
        Ok(())
    }
}
