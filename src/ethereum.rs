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

//! The Ethereum side of the bridge: the wire surface the duties consume and
//! its production implementation over the bridge contract.

use ethers::types::{Address, H256, U256};

use crate::error::Result;
use crate::types::{
    BatchConfirm, BatchExecutedEvent, Erc20DeployedEvent, Header,
    OutgoingBatch, SendToAppEvent, SendToOtherEvent, Valset, ValsetConfirm,
    ValsetUpdatedEvent,
};

mod client;
mod contract;

pub use client::EthereumBridgeClient;

/// Everything the orchestrator reads from, or submits to, the bridge
/// contract. The duties depend only on this capability so tests can inject
/// scripted implementations; production wires in [`EthereumBridgeClient`].
///
/// Event queries return events in ascending block/log order for the
/// inclusive block range.
#[async_trait::async_trait]
pub trait EthereumBridge: Send + Sync {
    /// Header of the given block, or the latest when `None`.
    async fn header_by_number(&self, number: Option<u64>) -> Result<Header>;

    /// Legacy deposits in `[from, to]`.
    async fn get_send_to_other_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<SendToOtherEvent>>;

    /// Deposits addressed to app chain accounts in `[from, to]`.
    async fn get_send_to_app_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<SendToAppEvent>>;

    /// Executed batches in `[from, to]`.
    async fn get_batch_executed_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<BatchExecutedEvent>>;

    /// ERC20 deployments in `[from, to]`.
    async fn get_erc20_deployed_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<Erc20DeployedEvent>>;

    /// Valset updates in `[from, to]`.
    async fn get_valset_updated_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ValsetUpdatedEvent>>;

    /// The valset nonce the contract currently trusts.
    async fn get_valset_nonce(&self) -> Result<U256>;

    /// The last executed batch nonce for the given token.
    async fn get_tx_batch_nonce(&self, token: Address) -> Result<U256>;

    /// Submits a valset update signed by `signing_valset`'s members.
    async fn send_eth_valset_update(
        &self,
        new_valset: &Valset,
        signing_valset: &Valset,
        confirms: &[ValsetConfirm],
    ) -> Result<H256>;

    /// Submits a transaction batch signed by `signing_valset`'s members.
    async fn send_transaction_batch(
        &self,
        signing_valset: &Valset,
        batch: &OutgoingBatch,
        confirms: &[BatchConfirm],
    ) -> Result<H256>;
}
