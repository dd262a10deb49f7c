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

use std::sync::Arc;
use std::time::Duration;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, BlockNumber, H256, U256};

use super::contract::BridgeContract;
use super::EthereumBridge;
use crate::config::EthereumConfig;
use crate::error::{Error, EthSignerClient, Result};
use crate::types::{
    BatchConfirm, BatchExecutedEvent, Erc20DeployedEvent, Header,
    OutgoingBatch, SendToAppEvent, SendToOtherEvent, Valset, ValsetConfirm,
    ValsetUpdatedEvent,
};

/// Production [`EthereumBridge`] over an HTTP provider.
///
/// Reads go through a plain provider; submissions go through a signer
/// middleware, which only exists when the orchestrator was configured with an
/// Ethereum key. A read-only (oracle) deployment simply never constructs the
/// signing half.
#[derive(Clone)]
pub struct EthereumBridgeClient {
    provider: Arc<Provider<Http>>,
    contract: BridgeContract<Provider<Http>>,
    signing_contract: Option<BridgeContract<EthSignerClient>>,
    read_timeout: Duration,
    broadcast_timeout: Duration,
}

impl EthereumBridgeClient {
    /// Creates a new client against the configured bridge contract.
    pub fn new(
        config: &EthereumConfig,
        provider: Provider<Http>,
        wallet: Option<LocalWallet>,
    ) -> Self {
        let provider = Arc::new(provider);
        let contract =
            BridgeContract::new(config.bridge_address, provider.clone());
        let signing_contract = wallet.map(|wallet| {
            let client = Arc::new(SignerMiddleware::new(
                provider.as_ref().clone(),
                wallet,
            ));
            BridgeContract::new(config.bridge_address, client)
        });
        Self {
            provider,
            contract,
            signing_contract,
            read_timeout: config.read_timeout(),
            broadcast_timeout: config.broadcast_timeout(),
        }
    }

    fn signing_contract(&self) -> Result<&BridgeContract<EthSignerClient>> {
        self.signing_contract
            .as_ref()
            .ok_or(Error::MissingSecrets)
    }
}

macro_rules! query_events {
    ($self:ident, $filter:ty, $domain:ty, $from:ident, $to:ident) => {{
        let events = $self
            .contract
            .event::<$filter>()
            .from_block($from)
            .to_block($to);
        let query = events.query_with_meta();
        let logs = tokio::time::timeout($self.read_timeout, query).await??;
        Ok(logs
            .into_iter()
            .map(|(raw, meta)| <$domain>::from_log(raw, &meta))
            .collect())
    }};
}

#[async_trait::async_trait]
impl EthereumBridge for EthereumBridgeClient {
    async fn header_by_number(&self, number: Option<u64>) -> Result<Header> {
        let id = match number {
            Some(n) => BlockNumber::Number(n.into()),
            None => BlockNumber::Latest,
        };
        let block =
            tokio::time::timeout(self.read_timeout, self.provider.get_block(id))
                .await??
                .ok_or(Error::Generic("requested block is not available"))?;
        Ok(Header {
            number: block
                .number
                .ok_or(Error::Generic("requested block is still pending"))?
                .as_u64(),
            timestamp: block.timestamp.as_u64(),
        })
    }

    async fn get_send_to_other_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<SendToOtherEvent>> {
        query_events!(
            self,
            super::contract::SendToOtherEventFilter,
            SendToOtherEvent,
            from,
            to
        )
    }

    async fn get_send_to_app_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<SendToAppEvent>> {
        query_events!(
            self,
            super::contract::SendToAppEventFilter,
            SendToAppEvent,
            from,
            to
        )
    }

    async fn get_batch_executed_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<BatchExecutedEvent>> {
        query_events!(
            self,
            super::contract::TransactionBatchExecutedEventFilter,
            BatchExecutedEvent,
            from,
            to
        )
    }

    async fn get_erc20_deployed_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<Erc20DeployedEvent>> {
        query_events!(
            self,
            super::contract::Erc20DeployedEventFilter,
            Erc20DeployedEvent,
            from,
            to
        )
    }

    async fn get_valset_updated_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ValsetUpdatedEvent>> {
        query_events!(
            self,
            super::contract::ValsetUpdatedEventFilter,
            ValsetUpdatedEvent,
            from,
            to
        )
    }

    async fn get_valset_nonce(&self) -> Result<U256> {
        let call_builder = self.contract.state_last_valset_nonce();
        let call = call_builder.call();
        let nonce = tokio::time::timeout(self.read_timeout, call).await??;
        Ok(nonce)
    }

    async fn get_tx_batch_nonce(&self, token: Address) -> Result<U256> {
        let call_builder = self.contract.last_batch_nonce(token);
        let call = call_builder.call();
        let nonce = tokio::time::timeout(self.read_timeout, call).await??;
        Ok(nonce)
    }

    async fn send_eth_valset_update(
        &self,
        new_valset: &Valset,
        signing_valset: &Valset,
        confirms: &[ValsetConfirm],
    ) -> Result<H256> {
        let contract = self.signing_contract()?;
        let sigs = signing_valset.order_signatures(confirms)?;
        let (new_validators, new_powers) = split_members(new_valset);
        let (current_validators, current_powers) =
            split_members(signing_valset);
        let call = contract.update_valset(
            new_validators,
            new_powers,
            new_valset.nonce.into(),
            new_valset.reward_amount,
            new_valset.reward_token,
            current_validators,
            current_powers,
            signing_valset.nonce.into(),
            sigs.iter().map(|s| s.v).collect(),
            sigs.iter().map(|s| s.r.to_fixed_bytes()).collect(),
            sigs.iter().map(|s| s.s.to_fixed_bytes()).collect(),
        );
        let pending =
            tokio::time::timeout(self.broadcast_timeout, call.send()).await??;
        Ok(pending.tx_hash())
    }

    async fn send_transaction_batch(
        &self,
        signing_valset: &Valset,
        batch: &OutgoingBatch,
        confirms: &[BatchConfirm],
    ) -> Result<H256> {
        let contract = self.signing_contract()?;
        let sigs = signing_valset.order_signatures(confirms)?;
        let (current_validators, current_powers) =
            split_members(signing_valset);
        let mut amounts = Vec::with_capacity(batch.transactions.len());
        let mut destinations = Vec::with_capacity(batch.transactions.len());
        let mut fees = Vec::with_capacity(batch.transactions.len());
        for tx in &batch.transactions {
            amounts.push(tx.amount);
            destinations.push(tx.destination);
            fees.push(tx.fee);
        }
        let call = contract.submit_batch(
            current_validators,
            current_powers,
            signing_valset.nonce.into(),
            sigs.iter().map(|s| s.v).collect(),
            sigs.iter().map(|s| s.r.to_fixed_bytes()).collect(),
            sigs.iter().map(|s| s.s.to_fixed_bytes()).collect(),
            amounts,
            destinations,
            fees,
            batch.batch_nonce.into(),
            batch.token_contract,
            batch.batch_timeout.into(),
        );
        let pending =
            tokio::time::timeout(self.broadcast_timeout, call.send()).await??;
        Ok(pending.tx_hash())
    }
}

fn split_members(valset: &Valset) -> (Vec<Address>, Vec<U256>) {
    valset
        .members
        .iter()
        .map(|m| (m.eth_address, U256::from(m.power)))
        .unzip()
}
