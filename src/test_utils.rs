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

//! Scripted wire clients for duty tests.
//!
//! Each mock holds one optional closure per operation; a test scripts only
//! the calls its scenario reaches and anything else panics with the
//! operation name. Closures capture `Arc<Mutex<_>>` recorders when a test
//! wants to assert on submissions.

use ethers::types::{Address, H256, U256};
use tokio::sync::broadcast;

use crate::app_chain::AppChain;
use crate::context::Shutdown;
use crate::error::Result;
use crate::ethereum::EthereumBridge;
use crate::types::{
    AppBlock, BatchConfirm, BatchExecutedEvent, BridgeParams,
    Erc20DeployedEvent, EventBatch, Header, LastClaim, OutgoingBatch,
    SendToAppEvent, SendToOtherEvent, TokenFees, Valset, ValsetConfirm,
    ValsetUpdatedEvent,
};

type Thunk<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;
type Func<A, T> = Box<dyn Fn(A) -> Result<T> + Send + Sync>;
type Func2<A, B, T> = Box<dyn Fn(A, B) -> Result<T> + Send + Sync>;
type Func3<A, B, C, T> = Box<dyn Fn(A, B, C) -> Result<T> + Send + Sync>;

/// A broadcast sender and a subscribed [`Shutdown`], for driving
/// cancellation in tests.
pub fn shutdown_pair() -> (broadcast::Sender<()>, Shutdown) {
    let (tx, rx) = broadcast::channel(2);
    (tx, Shutdown::new(rx))
}

/// A [`Shutdown`] that never fires.
pub fn never_shutdown() -> Shutdown {
    let (tx, rx) = broadcast::channel(2);
    // keep the channel open for the lifetime of the test
    std::mem::forget(tx);
    Shutdown::new(rx)
}

macro_rules! scripted {
    ($self:ident.$field:ident($($arg:expr),*)) => {
        $self
            .$field
            .as_ref()
            .unwrap_or_else(|| panic!("{} not scripted", stringify!($field)))(
            $($arg),*
        )
    };
}

/// Scripted [`AppChain`].
#[derive(Default)]
pub struct MockAppChain {
    pub bridge_params_fn: Option<Thunk<BridgeParams>>,
    pub last_claim_event_fn: Option<Thunk<LastClaim>>,
    pub latest_valsets_fn: Option<Thunk<Vec<Valset>>>,
    pub valset_at_fn: Option<Func<u64, Valset>>,
    pub all_valset_confirms_fn: Option<Func<u64, Vec<ValsetConfirm>>>,
    pub latest_transaction_batches_fn: Option<Thunk<Vec<OutgoingBatch>>>,
    pub transaction_batch_signatures_fn:
        Option<Func2<u64, Address, Vec<BatchConfirm>>>,
    pub get_block_fn: Option<Func<u64, AppBlock>>,
    pub oldest_unsigned_valsets_fn: Option<Func<String, Vec<Valset>>>,
    pub oldest_unsigned_batch_fn: Option<Func<String, Option<OutgoingBatch>>>,
    pub unbatched_fees_by_token_fn: Option<Thunk<Vec<TokenFees>>>,
    pub send_ethereum_claims_fn: Option<Func2<u64, EventBatch, ()>>,
    pub send_valset_confirm_fn: Option<Func<ValsetConfirm, ()>>,
    pub send_batch_confirm_fn: Option<Func<BatchConfirm, ()>>,
    pub send_request_batch_fn: Option<Func<String, ()>>,
}

#[async_trait::async_trait]
impl AppChain for MockAppChain {
    async fn bridge_params(&self) -> Result<BridgeParams> {
        scripted!(self.bridge_params_fn())
    }

    async fn last_claim_event(&self) -> Result<LastClaim> {
        scripted!(self.last_claim_event_fn())
    }

    async fn latest_valsets(&self) -> Result<Vec<Valset>> {
        scripted!(self.latest_valsets_fn())
    }

    async fn valset_at(&self, nonce: u64) -> Result<Valset> {
        scripted!(self.valset_at_fn(nonce))
    }

    async fn all_valset_confirms(
        &self,
        nonce: u64,
    ) -> Result<Vec<ValsetConfirm>> {
        scripted!(self.all_valset_confirms_fn(nonce))
    }

    async fn latest_transaction_batches(&self) -> Result<Vec<OutgoingBatch>> {
        scripted!(self.latest_transaction_batches_fn())
    }

    async fn transaction_batch_signatures(
        &self,
        nonce: u64,
        token: Address,
    ) -> Result<Vec<BatchConfirm>> {
        scripted!(self.transaction_batch_signatures_fn(nonce, token))
    }

    async fn get_block(&self, height: u64) -> Result<AppBlock> {
        scripted!(self.get_block_fn(height))
    }

    async fn oldest_unsigned_valsets(
        &self,
        orchestrator: &str,
    ) -> Result<Vec<Valset>> {
        scripted!(self.oldest_unsigned_valsets_fn(orchestrator.to_string()))
    }

    async fn oldest_unsigned_batch(
        &self,
        orchestrator: &str,
    ) -> Result<Option<OutgoingBatch>> {
        scripted!(self.oldest_unsigned_batch_fn(orchestrator.to_string()))
    }

    async fn unbatched_fees_by_token(&self) -> Result<Vec<TokenFees>> {
        scripted!(self.unbatched_fees_by_token_fn())
    }

    async fn send_ethereum_claims(
        &self,
        expected_nonce: u64,
        claims: &EventBatch,
    ) -> Result<()> {
        scripted!(self.send_ethereum_claims_fn(expected_nonce, claims.clone()))
    }

    async fn send_valset_confirm(
        &self,
        confirm: &ValsetConfirm,
    ) -> Result<()> {
        scripted!(self.send_valset_confirm_fn(confirm.clone()))
    }

    async fn send_batch_confirm(&self, confirm: &BatchConfirm) -> Result<()> {
        scripted!(self.send_batch_confirm_fn(confirm.clone()))
    }

    async fn send_request_batch(&self, denom: &str) -> Result<()> {
        scripted!(self.send_request_batch_fn(denom.to_string()))
    }
}

/// Scripted [`EthereumBridge`].
#[derive(Default)]
pub struct MockEthereum {
    pub header_by_number_fn: Option<Func<Option<u64>, Header>>,
    pub get_send_to_other_events_fn:
        Option<Func2<u64, u64, Vec<SendToOtherEvent>>>,
    pub get_send_to_app_events_fn:
        Option<Func2<u64, u64, Vec<SendToAppEvent>>>,
    pub get_batch_executed_events_fn:
        Option<Func2<u64, u64, Vec<BatchExecutedEvent>>>,
    pub get_erc20_deployed_events_fn:
        Option<Func2<u64, u64, Vec<Erc20DeployedEvent>>>,
    pub get_valset_updated_events_fn:
        Option<Func2<u64, u64, Vec<ValsetUpdatedEvent>>>,
    pub get_valset_nonce_fn: Option<Thunk<U256>>,
    pub get_tx_batch_nonce_fn: Option<Func<Address, U256>>,
    pub send_eth_valset_update_fn:
        Option<Func3<Valset, Valset, Vec<ValsetConfirm>, H256>>,
    pub send_transaction_batch_fn:
        Option<Func3<Valset, OutgoingBatch, Vec<BatchConfirm>, H256>>,
}

impl MockEthereum {
    /// Scripts every event stream not yet scripted to return no events, for
    /// scenarios where only one stream matters.
    pub fn with_empty_event_streams(mut self) -> Self {
        self.get_send_to_other_events_fn = self
            .get_send_to_other_events_fn
            .or_else(|| Some(Box::new(|_, _| Ok(vec![]))));
        self.get_send_to_app_events_fn = self
            .get_send_to_app_events_fn
            .or_else(|| Some(Box::new(|_, _| Ok(vec![]))));
        self.get_batch_executed_events_fn = self
            .get_batch_executed_events_fn
            .or_else(|| Some(Box::new(|_, _| Ok(vec![]))));
        self.get_erc20_deployed_events_fn = self
            .get_erc20_deployed_events_fn
            .or_else(|| Some(Box::new(|_, _| Ok(vec![]))));
        self.get_valset_updated_events_fn = self
            .get_valset_updated_events_fn
            .or_else(|| Some(Box::new(|_, _| Ok(vec![]))));
        self
    }
}

#[async_trait::async_trait]
impl EthereumBridge for MockEthereum {
    async fn header_by_number(&self, number: Option<u64>) -> Result<Header> {
        scripted!(self.header_by_number_fn(number))
    }

    async fn get_send_to_other_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<SendToOtherEvent>> {
        scripted!(self.get_send_to_other_events_fn(from, to))
    }

    async fn get_send_to_app_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<SendToAppEvent>> {
        scripted!(self.get_send_to_app_events_fn(from, to))
    }

    async fn get_batch_executed_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<BatchExecutedEvent>> {
        scripted!(self.get_batch_executed_events_fn(from, to))
    }

    async fn get_erc20_deployed_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<Erc20DeployedEvent>> {
        scripted!(self.get_erc20_deployed_events_fn(from, to))
    }

    async fn get_valset_updated_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ValsetUpdatedEvent>> {
        scripted!(self.get_valset_updated_events_fn(from, to))
    }

    async fn get_valset_nonce(&self) -> Result<U256> {
        scripted!(self.get_valset_nonce_fn())
    }

    async fn get_tx_batch_nonce(&self, token: Address) -> Result<U256> {
        scripted!(self.get_tx_batch_nonce_fn(token))
    }

    async fn send_eth_valset_update(
        &self,
        new_valset: &Valset,
        signing_valset: &Valset,
        confirms: &[ValsetConfirm],
    ) -> Result<H256> {
        scripted!(self.send_eth_valset_update_fn(
            new_valset.clone(),
            signing_valset.clone(),
            confirms.to_vec()
        ))
    }

    async fn send_transaction_batch(
        &self,
        signing_valset: &Valset,
        batch: &OutgoingBatch,
        confirms: &[BatchConfirm],
    ) -> Result<H256> {
        scripted!(self.send_transaction_batch_fn(
            signing_valset.clone(),
            batch.clone(),
            confirms.to_vec()
        ))
    }
}
