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

//! The app chain side of the bridge: the wire surface the duties consume and
//! its production implementation over the node's REST API.

use ethers::types::Address;

use crate::error::Result;
use crate::types::{
    AppBlock, BatchConfirm, BridgeParams, EventBatch, LastClaim,
    OutgoingBatch, TokenFees, Valset, ValsetConfirm,
};

mod client;

pub use client::AppChainRpcClient;

/// Everything the orchestrator reads from, or broadcasts to, the app chain.
/// The duties depend only on this capability so tests can inject scripted
/// implementations; production wires in [`AppChainRpcClient`].
#[async_trait::async_trait]
pub trait AppChain: Send + Sync {
    /// The bridge module's parameters.
    async fn bridge_params(&self) -> Result<BridgeParams>;

    /// The highest claim this orchestrator has had accepted, and the
    /// Ethereum height it lived at.
    async fn last_claim_event(&self) -> Result<LastClaim>;

    /// The most recent valsets, newest first, already signed and eligible.
    async fn latest_valsets(&self) -> Result<Vec<Valset>>;

    /// The valset at a specific nonce.
    async fn valset_at(&self, nonce: u64) -> Result<Valset>;

    /// Every confirm submitted for the valset at `nonce`.
    async fn all_valset_confirms(&self, nonce: u64)
        -> Result<Vec<ValsetConfirm>>;

    /// The most recent outgoing batches, newest first.
    async fn latest_transaction_batches(&self) -> Result<Vec<OutgoingBatch>>;

    /// Every confirm submitted for the batch `(nonce, token)`.
    async fn transaction_batch_signatures(
        &self,
        nonce: u64,
        token: Address,
    ) -> Result<Vec<BatchConfirm>>;

    /// An app chain block, for the timestamps used by the offset gates.
    async fn get_block(&self, height: u64) -> Result<AppBlock>;

    /// Valsets this validator has not signed yet.
    async fn oldest_unsigned_valsets(
        &self,
        orchestrator: &str,
    ) -> Result<Vec<Valset>>;

    /// The oldest batch this validator has not signed yet, if any.
    async fn oldest_unsigned_batch(
        &self,
        orchestrator: &str,
    ) -> Result<Option<OutgoingBatch>>;

    /// Accumulated fees of unbatched transfers, per token.
    async fn unbatched_fees_by_token(&self) -> Result<Vec<TokenFees>>;

    /// Atomically attests every event in `claims`. `expected_nonce` is the
    /// highest nonce already attested by this orchestrator; the app chain
    /// rejects the whole broadcast if another claim advanced it meanwhile.
    async fn send_ethereum_claims(
        &self,
        expected_nonce: u64,
        claims: &EventBatch,
    ) -> Result<()>;

    /// Submits this validator's signature over a valset.
    async fn send_valset_confirm(&self, confirm: &ValsetConfirm)
        -> Result<()>;

    /// Submits this validator's signature over a batch.
    async fn send_batch_confirm(&self, confirm: &BatchConfirm) -> Result<()>;

    /// Asks the app chain to cut a new batch for `denom`.
    async fn send_request_batch(&self, denom: &str) -> Result<()>;
}
