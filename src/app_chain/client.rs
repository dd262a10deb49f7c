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

use std::time::{Duration, SystemTime};

use ethers::types::Address;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::AppChain;
use crate::config::AppChainConfig;
use crate::error::{Error, Result};
use crate::types::{
    AppBlock, BatchConfirm, BridgeParams, EventBatch, LastClaim,
    OutgoingBatch, TokenFees, Valset, ValsetConfirm,
};

/// Production [`AppChain`] over the node's REST API.
///
/// Queries live under `bridge/v1/`; broadcasts are POSTed to the same tree
/// and signed/wrapped by the node's tx service, which holds this
/// orchestrator's app chain key. A 4xx means the chain rejected the
/// submission; 5xx and transport failures are transient.
#[derive(Clone)]
pub struct AppChainRpcClient {
    client: reqwest::Client,
    base: url::Url,
    orchestrator: String,
    broadcast_timeout: Duration,
}

impl AppChainRpcClient {
    /// Creates a new client against the configured app chain node.
    pub fn new(config: &AppChainConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.read_timeout())
            .build()?;
        Ok(Self {
            client,
            base: config.rpc_endpoint.clone(),
            orchestrator: config.orchestrator_address.clone(),
            broadcast_timeout: config.broadcast_timeout(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        Ok(self.base.join(path)?)
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let url = self.endpoint(path)?;
        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .timeout(self.broadcast_timeout)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<R> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(Error::SubmissionRejected { reason: message })
        } else {
            Err(Error::Rpc { message })
        }
    }
}

#[derive(serde::Deserialize)]
struct BlockResponse {
    height: u64,
    /// Unix timestamp in seconds.
    time: u64,
}

#[derive(serde::Serialize)]
struct ClaimsBroadcast<'a> {
    orchestrator: &'a str,
    expected_nonce: u64,
    #[serde(flatten)]
    claims: &'a EventBatch,
}

#[derive(serde::Serialize)]
struct RequestBatchBroadcast<'a> {
    orchestrator: &'a str,
    denom: &'a str,
}

#[derive(serde::Deserialize)]
struct Empty {}

#[async_trait::async_trait]
impl AppChain for AppChainRpcClient {
    async fn bridge_params(&self) -> Result<BridgeParams> {
        self.get("bridge/v1/params").await
    }

    async fn last_claim_event(&self) -> Result<LastClaim> {
        self.get(&format!(
            "bridge/v1/oracle/event/{}",
            self.orchestrator
        ))
        .await
    }

    async fn latest_valsets(&self) -> Result<Vec<Valset>> {
        self.get("bridge/v1/valset/latest").await
    }

    async fn valset_at(&self, nonce: u64) -> Result<Valset> {
        self.get(&format!("bridge/v1/valset/{nonce}")).await
    }

    async fn all_valset_confirms(
        &self,
        nonce: u64,
    ) -> Result<Vec<ValsetConfirm>> {
        self.get(&format!("bridge/v1/valset/{nonce}/confirms")).await
    }

    async fn latest_transaction_batches(&self) -> Result<Vec<OutgoingBatch>> {
        self.get("bridge/v1/batch/latest").await
    }

    async fn transaction_batch_signatures(
        &self,
        nonce: u64,
        token: Address,
    ) -> Result<Vec<BatchConfirm>> {
        self.get(&format!("bridge/v1/batch/{nonce}/confirms/{token:?}"))
            .await
    }

    async fn get_block(&self, height: u64) -> Result<AppBlock> {
        let block: BlockResponse =
            self.get(&format!("blocks/{height}")).await?;
        Ok(AppBlock {
            height: block.height,
            time: SystemTime::UNIX_EPOCH + Duration::from_secs(block.time),
        })
    }

    async fn oldest_unsigned_valsets(
        &self,
        orchestrator: &str,
    ) -> Result<Vec<Valset>> {
        self.get(&format!("bridge/v1/valset/unsigned/{orchestrator}"))
            .await
    }

    async fn oldest_unsigned_batch(
        &self,
        orchestrator: &str,
    ) -> Result<Option<OutgoingBatch>> {
        self.get(&format!("bridge/v1/batch/unsigned/{orchestrator}"))
            .await
    }

    async fn unbatched_fees_by_token(&self) -> Result<Vec<TokenFees>> {
        self.get("bridge/v1/batch/fees").await
    }

    async fn send_ethereum_claims(
        &self,
        expected_nonce: u64,
        claims: &EventBatch,
    ) -> Result<()> {
        let _: Empty = self
            .post(
                "bridge/v1/oracle/claims",
                &ClaimsBroadcast {
                    orchestrator: &self.orchestrator,
                    expected_nonce,
                    claims,
                },
            )
            .await?;
        Ok(())
    }

    async fn send_valset_confirm(
        &self,
        confirm: &ValsetConfirm,
    ) -> Result<()> {
        let _: Empty = self.post("bridge/v1/valset/confirm", confirm).await?;
        Ok(())
    }

    async fn send_batch_confirm(&self, confirm: &BatchConfirm) -> Result<()> {
        let _: Empty = self.post("bridge/v1/batch/confirm", confirm).await?;
        Ok(())
    }

    async fn send_request_batch(&self, denom: &str) -> Result<()> {
        let _: Empty = self
            .post(
                "bridge/v1/batch/request",
                &RequestBatchBroadcast {
                    orchestrator: &self.orchestrator,
                    denom,
                },
            )
            .await?;
        Ok(())
    }
}
