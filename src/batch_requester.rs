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

//! The batch requester duty: ask the app chain to cut a new outgoing batch
//! for a token once its accumulated transfer fees are worth relaying.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::U256;

use crate::app_chain::AppChain;
use crate::config::AssetConfig;
use crate::context::Shutdown;
use crate::error::Result;
use crate::loops::Loop;
use crate::price::PriceBackend;
use crate::probe;
use crate::retry::{retry, ExponentialWithMaxRetryCount};

/// Batch requester scheduling and threshold parameters.
#[derive(Debug, Clone)]
pub struct BatchRequesterOptions {
    /// Time between two iterations.
    pub interval: Duration,
    /// Attempt budget for each retried wire read.
    pub max_retry_attempts: u32,
    /// Minimum accumulated fee value (in USD) before a batch is requested.
    pub min_batch_fee_usd: f64,
}

/// The batch requester duty loop.
pub struct BatchRequester {
    app_chain: Arc<dyn AppChain>,
    prices: Arc<dyn PriceBackend>,
    assets: HashMap<String, AssetConfig>,
    shutdown: Shutdown,
    retry_policy: ExponentialWithMaxRetryCount,
    interval: Duration,
    min_batch_fee_usd: f64,
}

impl BatchRequester {
    /// Creates the batch requester duty.
    pub fn new(
        app_chain: Arc<dyn AppChain>,
        prices: Arc<dyn PriceBackend>,
        assets: HashMap<String, AssetConfig>,
        shutdown: Shutdown,
        opts: BatchRequesterOptions,
    ) -> Self {
        Self {
            app_chain,
            prices,
            assets,
            shutdown,
            retry_policy: ExponentialWithMaxRetryCount::with_attempts(
                opts.max_retry_attempts,
            ),
            interval: opts.interval,
            min_batch_fee_usd: opts.min_batch_fee_usd,
        }
    }
}

#[async_trait::async_trait]
impl Loop for BatchRequester {
    const TAG: &'static str = "BatchRequester";

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&mut self) -> Result<()> {
        let app_chain = self.app_chain.clone();
        let unbatched = retry(
            "unbatched fees query",
            self.retry_policy.clone(),
            &mut self.shutdown,
            || app_chain.unbatched_fees_by_token(),
        )
        .await?;

        // at most one batch request per token per tick
        for token_fees in unbatched {
            let Some(asset) = self.assets.get(&token_fees.denom) else {
                tracing::warn!(
                    denom = %token_fees.denom,
                    "unknown asset, cannot price its fees"
                );
                continue;
            };
            let symbol = asset.symbol.as_str();
            let prices = match self.prices.get_prices(&[symbol]).await {
                Ok(prices) => prices,
                Err(e) => {
                    tracing::warn!(%symbol, "failed to fetch price: {}", e);
                    continue;
                }
            };
            let Some(price) = prices.get(symbol) else {
                tracing::warn!(%symbol, "no price available, skipping");
                continue;
            };
            let usd_value = fee_value_usd(
                token_fees.total_fees,
                asset.decimals,
                *price,
            );
            if usd_value < self.min_batch_fee_usd {
                tracing::debug!(
                    denom = %token_fees.denom,
                    usd_value,
                    threshold = self.min_batch_fee_usd,
                    "accumulated fees below threshold"
                );
                continue;
            }
            self.app_chain
                .send_request_batch(&token_fees.denom)
                .await?;
            tracing::info!(
                denom = %token_fees.denom,
                usd_value,
                "requested a new batch"
            );
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::BatchRequester,
                denom = %token_fees.denom,
                usd_value,
            );
        }
        Ok(())
    }
}

/// USD value of `fees` base units of a token with the given decimals.
/// Precision loss on huge amounts only ever rounds the comparison against a
/// human-scale threshold.
fn fee_value_usd(fees: U256, decimals: u8, price_usd: f64) -> f64 {
    let whole_tokens: f64 = fees.to_string().parse().unwrap_or(f64::MAX);
    whole_tokens / 10f64.powi(i32::from(decimals)) * price_usd
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ethers::types::Address;

    use super::*;
    use crate::price::StaticPriceBackend;
    use crate::test_utils::{never_shutdown, MockAppChain};
    use crate::types::TokenFees;

    fn asset(symbol: &str, decimals: u8) -> AssetConfig {
        AssetConfig {
            symbol: symbol.into(),
            coingecko_id: None,
            decimals,
            price: None,
        }
    }

    fn fees(denom: &str, amount: u64) -> TokenFees {
        TokenFees {
            token_contract: Address::from_low_u64_be(0xcafe),
            denom: denom.into(),
            total_fees: U256::from(amount),
        }
    }

    fn requester(
        app_chain: MockAppChain,
        prices: &[(&str, f64)],
        min_usd: f64,
    ) -> BatchRequester {
        let prices = StaticPriceBackend::new(
            prices.iter().map(|(t, p)| (t.to_string(), *p)).collect(),
        );
        let assets = HashMap::from([
            ("weth".to_string(), asset("ETH", 18)),
            ("uusdc".to_string(), asset("USDC", 6)),
        ]);
        BatchRequester::new(
            Arc::new(app_chain),
            Arc::new(prices),
            assets,
            never_shutdown(),
            BatchRequesterOptions {
                interval: Duration::from_secs(60),
                max_retry_attempts: 1,
                min_batch_fee_usd: min_usd,
            },
        )
    }

    type RequestLog = Arc<Mutex<Vec<String>>>;

    fn recording_app_chain(unbatched: Vec<TokenFees>) -> (MockAppChain, RequestLog) {
        let log: RequestLog = Arc::default();
        let requests = log.clone();
        let app = MockAppChain {
            unbatched_fees_by_token_fn: Some(Box::new(move || {
                Ok(unbatched.clone())
            })),
            send_request_batch_fn: Some(Box::new(move |denom| {
                requests.lock().unwrap().push(denom);
                Ok(())
            })),
            ..Default::default()
        };
        (app, log)
    }

    #[tokio::test]
    async fn requests_a_batch_once_fees_clear_the_threshold() {
        // 0.05 ETH at $1000 = $50
        let (app, log) =
            recording_app_chain(vec![fees("weth", 50_000_000_000_000_000)]);
        let mut requester = requester(app, &[("ETH", 1000.0)], 23.3);
        requester.tick().await.unwrap();
        assert_eq!(log.lock().unwrap().as_slice(), &["weth".to_string()]);
    }

    #[tokio::test]
    async fn thin_fees_do_not_trigger_a_request() {
        // 0.01 ETH at $1000 = $10
        let (app, log) =
            recording_app_chain(vec![fees("weth", 10_000_000_000_000_000)]);
        let mut requester = requester(app, &[("ETH", 1000.0)], 23.3);
        requester.tick().await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_token_is_judged_separately() {
        let (app, log) = recording_app_chain(vec![
            // $50 worth of ETH fees
            fees("weth", 50_000_000_000_000_000),
            // $2 worth of USDC fees
            fees("uusdc", 2_000_000),
        ]);
        let mut requester =
            requester(app, &[("ETH", 1000.0), ("USDC", 1.0)], 23.3);
        requester.tick().await.unwrap();
        assert_eq!(log.lock().unwrap().as_slice(), &["weth".to_string()]);
    }

    #[tokio::test]
    async fn unknown_denoms_are_skipped() {
        let (app, log) = recording_app_chain(vec![fees("uatom", 1_000_000)]);
        let mut requester = requester(app, &[("ETH", 1000.0)], 23.3);
        requester.tick().await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unpriced_assets_are_skipped() {
        // the asset is known but no backend can price it
        let (app, log) =
            recording_app_chain(vec![fees("weth", 50_000_000_000_000_000)]);
        let mut requester = requester(app, &[], 23.3);
        requester.tick().await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }
}
