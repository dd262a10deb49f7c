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

//! Price backends for the batch requester's fee threshold.
//!
//! A price backend resolves token symbols to USD prices. The batch requester
//! uses a live `CoinGecko` backend merged with a static map from the config;
//! the static map keeps the duty alive when the live source is unreachable.

use std::collections::HashMap;
use std::sync::Arc;

use futures::TryFutureExt;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// A type alias for a map of token symbols to USD prices.
pub type PricesMap = HashMap<String, f64>;

/// A trait for a price backend.
#[async_trait::async_trait]
pub trait PriceBackend: Send + Sync {
    /// Returns the USD prices for the given tokens. Unknown tokens are
    /// simply absent from the result.
    async fn get_prices(&self, tokens: &[&str]) -> Result<PricesMap>;
}

/// A backend for fetching prices from `CoinGecko`.
#[derive(Clone, Debug, typed_builder::TypedBuilder)]
pub struct CoinGeckoBackend {
    #[builder(
        default = String::from("https://api.coingecko.com/api/v3"),
        setter(into)
    )]
    host: String,
    #[builder(default = Arc::new(reqwest::Client::new()))]
    client: Arc<reqwest::Client>,
    /// Maps token symbols to CoinGecko coin ids, e.g. `ETH` to `ethereum`.
    /// Symbols without a mapping are queried by symbol as-is.
    #[builder(default)]
    coin_ids: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SimplePriceResponse {
    usd: Option<f64>,
}

impl CoinGeckoBackend {
    async fn get<R: DeserializeOwned>(&self, endpoint: &str) -> Result<R> {
        let url = format!("{}/{}", self.host, endpoint);
        self.client
            .get(&url)
            .send()
            .await?
            .json()
            .await
            .map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl PriceBackend for CoinGeckoBackend {
    async fn get_prices(&self, tokens: &[&str]) -> Result<PricesMap> {
        // map token symbols to coingecko ids
        let mut id_to_token = HashMap::new();
        for token in tokens {
            let id = self
                .coin_ids
                .get(*token)
                .map(String::as_str)
                .unwrap_or(*token);
            id_to_token.insert(id, *token);
        }
        let ids = id_to_token.keys().copied().collect::<Vec<_>>();
        let endpoint = format!(
            "simple/price?ids={}&vs_currencies=usd",
            ids.join("%2C")
        );
        let prices: PricesMap = self
            .get::<HashMap<String, SimplePriceResponse>>(&endpoint)
            .map_ok(|m| {
                m.into_iter()
                    .filter_map(|(k, v)| v.usd.map(|price| (k, price)))
                    .collect()
            })
            .await?;
        // remap the ids back to token symbols
        let prices = prices
            .into_iter()
            .filter_map(|(id, price)| {
                id_to_token
                    .get(id.as_str())
                    .map(|t| ((*t).to_string(), price))
            })
            .collect();
        Ok(prices)
    }
}

/// A Static Price Backend
///
/// Always returns the price data that is configured initially while creating
/// the backend. Backs the `assets` section of the config.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceBackend {
    prices: PricesMap,
}

impl StaticPriceBackend {
    /// Creates a new static price backend.
    #[must_use]
    pub fn new(prices: PricesMap) -> Self {
        Self { prices }
    }
}

#[async_trait::async_trait]
impl PriceBackend for StaticPriceBackend {
    async fn get_prices(&self, tokens: &[&str]) -> Result<PricesMap> {
        let result = self
            .prices
            .iter()
            .filter(|(token, _)| tokens.contains(&token.as_str()))
            .map(|(token, price)| (token.clone(), *price))
            .collect();
        Ok(result)
    }
}

/// Merges price backends, first one wins per token.
///
/// Backends are queried in order; a token already priced by an earlier
/// backend is not overridden, and a failing backend is skipped with a
/// warning instead of failing the merge.
#[derive(Default)]
pub struct PriceOracleMerger {
    backends: Vec<Box<dyn PriceBackend>>,
}

impl PriceOracleMerger {
    /// Creates a new builder for the merger.
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    /// Adds a backend to the merger.
    #[must_use]
    pub fn merge(mut self, backend: Box<dyn PriceBackend>) -> Self {
        self.backends.push(backend);
        self
    }
}

#[async_trait::async_trait]
impl PriceBackend for PriceOracleMerger {
    async fn get_prices(&self, tokens: &[&str]) -> Result<PricesMap> {
        let mut merged = PricesMap::new();
        for backend in &self.backends {
            let missing = tokens
                .iter()
                .filter(|t| !merged.contains_key(**t))
                .copied()
                .collect::<Vec<_>>();
            if missing.is_empty() {
                break;
            }
            match backend.get_prices(&missing).await {
                Ok(prices) => merged.extend(prices),
                Err(e) => {
                    tracing::warn!("price backend failed, skipping: {}", e);
                }
            }
        }
        Ok(merged)
    }
}
