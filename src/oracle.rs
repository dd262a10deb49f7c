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

//! The oracle duty: every bridge event with finalized depth on Ethereum
//! eventually becomes a claim attested by this validator on the app chain.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::app_chain::AppChain;
use crate::context::Shutdown;
use crate::error::Result;
use crate::ethereum::EthereumBridge;
use crate::loops::Loop;
use crate::probe;
use crate::retry::{retry, ExponentialWithMaxRetryCount};
use crate::types::{filter_events_by_nonce, EventBatch};

/// Oracle scheduling and scan-window parameters.
#[derive(Debug, Clone)]
pub struct OracleOptions {
    /// Time between two scan iterations.
    pub interval: Duration,
    /// Time between two cursor resyncs from the app chain.
    pub resync_interval: Duration,
    /// Blocks below the Ethereum head an event must be before it is final.
    pub confirmation_depth: u64,
    /// The widest block window one iteration may scan.
    pub blocks_to_search: u64,
    /// Attempt budget for each retried wire read.
    pub max_retry_attempts: u32,
    /// Initial scan cursor: the height of the last accepted claim, or the
    /// bridge contract deployment height when no claim exists yet.
    pub start_height: u64,
}

/// The oracle duty loop.
pub struct Oracle {
    ethereum: Arc<dyn EthereumBridge>,
    app_chain: Arc<dyn AppChain>,
    shutdown: Shutdown,
    interval: Duration,
    resync_interval: Duration,
    confirmation_depth: u64,
    blocks_to_search: u64,
    retry_policy: ExponentialWithMaxRetryCount,
    last_confirmed_eth_height: u64,
    last_resync: Instant,
}

/// One finished scan: the new cursor position and the (unfiltered) events
/// found on the way there.
struct Scan {
    current: u64,
    events: EventBatch,
}

impl Oracle {
    /// Creates the oracle duty with its cursor already initialized.
    pub fn new(
        ethereum: Arc<dyn EthereumBridge>,
        app_chain: Arc<dyn AppChain>,
        shutdown: Shutdown,
        opts: OracleOptions,
    ) -> Self {
        Self {
            ethereum,
            app_chain,
            shutdown,
            interval: opts.interval,
            resync_interval: opts.resync_interval,
            confirmation_depth: opts.confirmation_depth,
            blocks_to_search: opts.blocks_to_search,
            retry_policy: ExponentialWithMaxRetryCount::with_attempts(
                opts.max_retry_attempts,
            ),
            last_confirmed_eth_height: opts.start_height,
            last_resync: Instant::now(),
        }
    }

    /// The current scan cursor.
    pub fn last_confirmed_eth_height(&self) -> u64 {
        self.last_confirmed_eth_height
    }

    /// Scans `[start, start + blocks_to_search]` capped at the finalized
    /// head, returning `None` when the finalized head is still below the
    /// cursor (re-org or lagging node).
    async fn scan(
        ethereum: Arc<dyn EthereumBridge>,
        start: u64,
        confirmation_depth: u64,
        blocks_to_search: u64,
    ) -> Result<Option<Scan>> {
        let head = ethereum.header_by_number(None).await?;
        // a chain shorter than the confirmation depth has no final blocks;
        // the subtraction must not wrap into a huge window
        let mut current = head.number.saturating_sub(confirmation_depth);
        if current < start {
            return Ok(None);
        }
        current = current.min(start + blocks_to_search);

        let events = EventBatch {
            send_to_other: ethereum
                .get_send_to_other_events(start, current)
                .await?,
            send_to_app: ethereum.get_send_to_app_events(start, current).await?,
            batch_executed: ethereum
                .get_batch_executed_events(start, current)
                .await?,
            erc20_deployed: ethereum
                .get_erc20_deployed_events(start, current)
                .await?,
            valset_updated: ethereum
                .get_valset_updated_events(start, current)
                .await?,
        };
        Ok(Some(Scan { current, events }))
    }

    /// Scans for finalized events past the cursor and attests them on the
    /// app chain. The cursor only advances once the whole iteration, claim
    /// submission included, went through.
    async fn relay_eth_events(&mut self) -> Result<()> {
        let ethereum = self.ethereum.clone();
        // The scan starts at the cursor itself, not one past it: a previous
        // iteration may have died mid-submission inside a multi-event block,
        // and the nonce filter below makes the overlap idempotent.
        let start = self.last_confirmed_eth_height;
        let depth = self.confirmation_depth;
        let width = self.blocks_to_search;
        let scanned = retry(
            "ethereum event scan",
            self.retry_policy.clone(),
            &mut self.shutdown,
            || Self::scan(ethereum.clone(), start, depth, width),
        )
        .await?;
        let Some(Scan { current, events }) = scanned else {
            tracing::debug!(
                start,
                "finalized head is below the cursor, nothing to scan"
            );
            return Ok(());
        };

        let app_chain = self.app_chain.clone();
        let last_claim = retry(
            "last claim event query",
            self.retry_policy.clone(),
            &mut self.shutdown,
            || app_chain.last_claim_event(),
        )
        .await?;

        let claims = EventBatch {
            send_to_other: filter_events_by_nonce(
                events.send_to_other,
                last_claim.event_nonce,
            ),
            send_to_app: filter_events_by_nonce(
                events.send_to_app,
                last_claim.event_nonce,
            ),
            batch_executed: filter_events_by_nonce(
                events.batch_executed,
                last_claim.event_nonce,
            ),
            erc20_deployed: filter_events_by_nonce(
                events.erc20_deployed,
                last_claim.event_nonce,
            ),
            valset_updated: filter_events_by_nonce(
                events.valset_updated,
                last_claim.event_nonce,
            ),
        };
        tracing::debug!(
            start,
            end = current,
            total = claims.len(),
            "scanned bridge events from Ethereum"
        );

        if !claims.is_empty() {
            // Submitted once, without retry: the expected nonce makes a
            // replayed broadcast fail, so a retry here could only burn the
            // whole tick on a claim another path already advanced past.
            self.app_chain
                .send_ethereum_claims(last_claim.event_nonce, &claims)
                .await?;
            tracing::info!(
                expected_nonce = last_claim.event_nonce,
                claims = claims.len(),
                "attested bridge events on the app chain"
            );
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Oracle,
                expected_nonce = last_claim.event_nonce,
                claims = claims.len(),
                start,
                end = current,
            );
        }

        self.last_confirmed_eth_height = current;
        Ok(())
    }

    /// Re-reads the cursor from the app chain. Recovers from indexing delays
    /// at the RPC layer, validators that got unbonded with claims in flight,
    /// and dropped RPC responses.
    async fn resync(&mut self) -> Result<()> {
        let app_chain = self.app_chain.clone();
        let last_claim = retry(
            "cursor resync",
            self.retry_policy.clone(),
            &mut self.shutdown,
            || app_chain.last_claim_event(),
        )
        .await?;
        self.last_confirmed_eth_height = last_claim.eth_height;
        self.last_resync = Instant::now();
        tracing::info!(
            last_confirmed_eth_height = self.last_confirmed_eth_height,
            "auto resync"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Loop for Oracle {
    const TAG: &'static str = "Oracle";

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&mut self) -> Result<()> {
        tracing::debug!(
            last_confirmed_eth_height = self.last_confirmed_eth_height,
            "scanning for events"
        );
        self.relay_eth_events().await?;

        if self.last_resync.elapsed() >= self.resync_interval {
            self.resync().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ethers::types::Address;

    use super::*;
    use crate::error::Error;
    use crate::test_utils::{never_shutdown, MockAppChain, MockEthereum};
    use crate::types::{Header, LastClaim, SendToAppEvent};

    fn opts(start_height: u64) -> OracleOptions {
        OracleOptions {
            interval: Duration::from_secs(60),
            resync_interval: Duration::from_secs(48 * 60 * 60),
            confirmation_depth: 12,
            blocks_to_search: 20,
            max_retry_attempts: 1,
            start_height,
        }
    }

    fn deposit(nonce: u64, height: u64) -> SendToAppEvent {
        SendToAppEvent {
            token_contract: Address::from_low_u64_be(0xcafe),
            destination: "app1receiver".into(),
            event_nonce: nonce,
            block_height: height,
            ..Default::default()
        }
    }

    /// Deposits at blocks 905 (nonce 10) and 908 (nonce 11), served only
    /// within the queried range.
    fn eth_with_deposits(head: u64) -> MockEthereum {
        MockEthereum {
            header_by_number_fn: Some(Box::new(move |_| {
                Ok(Header {
                    number: head,
                    timestamp: 0,
                })
            })),
            get_send_to_app_events_fn: Some(Box::new(|from, to| {
                Ok(vec![deposit(10, 905), deposit(11, 908)]
                    .into_iter()
                    .filter(|ev| ev.block_height >= from && ev.block_height <= to)
                    .collect())
            })),
            ..Default::default()
        }
        .with_empty_event_streams()
    }

    type ClaimLog = Arc<Mutex<Vec<(u64, EventBatch)>>>;

    fn recording_app_chain(last_claim_nonce: u64) -> (MockAppChain, ClaimLog) {
        let log: ClaimLog = Arc::default();
        let sent = log.clone();
        let app = MockAppChain {
            last_claim_event_fn: Some(Box::new(move || {
                Ok(LastClaim {
                    event_nonce: last_claim_nonce,
                    eth_height: 900,
                })
            })),
            send_ethereum_claims_fn: Some(Box::new(move |nonce, claims| {
                sent.lock().unwrap().push((nonce, claims));
                Ok(())
            })),
            ..Default::default()
        };
        (app, log)
    }

    #[tokio::test]
    async fn happy_path_attests_both_deposits() {
        let (app, log) = recording_app_chain(9);
        let mut oracle = Oracle::new(
            Arc::new(eth_with_deposits(1000)),
            Arc::new(app),
            never_shutdown(),
            opts(900),
        );
        oracle.tick().await.unwrap();

        let sent = log.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (expected_nonce, claims) = &sent[0];
        assert_eq!(*expected_nonce, 9);
        assert_eq!(
            claims.send_to_app.iter().map(|e| e.event_nonce).collect::<Vec<_>>(),
            vec![10, 11]
        );
        assert!(claims.send_to_other.is_empty());
        // head 1000 - depth 12 = 988, clipped to 900 + 20
        assert_eq!(oracle.last_confirmed_eth_height(), 920);
    }

    #[tokio::test]
    async fn already_attested_events_are_filtered_out() {
        let (app, log) = recording_app_chain(10);
        let mut oracle = Oracle::new(
            Arc::new(eth_with_deposits(1000)),
            Arc::new(app),
            never_shutdown(),
            opts(900),
        );
        oracle.tick().await.unwrap();

        let sent = log.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (expected_nonce, claims) = &sent[0];
        assert_eq!(*expected_nonce, 10);
        assert_eq!(
            claims.send_to_app.iter().map(|e| e.event_nonce).collect::<Vec<_>>(),
            vec![11]
        );
    }

    #[tokio::test]
    async fn scan_window_is_clipped() {
        let ranges: Arc<Mutex<Vec<(u64, u64)>>> = Arc::default();
        let seen = ranges.clone();
        let mut eth = eth_with_deposits(2000);
        eth.get_send_to_app_events_fn = Some(Box::new(move |from, to| {
            seen.lock().unwrap().push((from, to));
            Ok(vec![])
        }));
        let (app, log) = recording_app_chain(11);
        let mut oracle = Oracle::new(
            Arc::new(eth),
            Arc::new(app),
            never_shutdown(),
            opts(900),
        );
        oracle.tick().await.unwrap();

        // raw current would be 1988; the window caps it at 920
        assert_eq!(ranges.lock().unwrap().as_slice(), &[(900, 920)]);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(oracle.last_confirmed_eth_height(), 920);
    }

    #[tokio::test]
    async fn shallow_head_is_a_no_op() {
        // head below the confirmation depth: the subtraction must saturate
        // instead of wrapping into a huge window
        let eth = MockEthereum {
            header_by_number_fn: Some(Box::new(|_| {
                Ok(Header {
                    number: 5,
                    timestamp: 0,
                })
            })),
            ..Default::default()
        };
        let mut oracle = Oracle::new(
            Arc::new(eth),
            Arc::new(MockAppChain::default()),
            never_shutdown(),
            opts(900),
        );
        // no event stream and no app chain call is scripted: reaching any of
        // them would panic
        oracle.tick().await.unwrap();
        assert_eq!(oracle.last_confirmed_eth_height(), 900);
    }

    #[tokio::test]
    async fn lagging_node_does_not_move_the_cursor_backwards() {
        let eth = MockEthereum {
            header_by_number_fn: Some(Box::new(|_| {
                Ok(Header {
                    number: 905,
                    timestamp: 0,
                })
            })),
            ..Default::default()
        };
        let mut oracle = Oracle::new(
            Arc::new(eth),
            Arc::new(MockAppChain::default()),
            never_shutdown(),
            opts(900),
        );
        oracle.tick().await.unwrap();
        assert_eq!(oracle.last_confirmed_eth_height(), 900);
    }

    #[tokio::test]
    async fn one_block_window_still_queries_that_block() {
        let ranges: Arc<Mutex<Vec<(u64, u64)>>> = Arc::default();
        let seen = ranges.clone();
        let mut eth = eth_with_deposits(912);
        eth.get_send_to_app_events_fn = Some(Box::new(move |from, to| {
            seen.lock().unwrap().push((from, to));
            Ok(vec![])
        }));
        let (app, _log) = recording_app_chain(11);
        let mut oracle = Oracle::new(
            Arc::new(eth),
            Arc::new(app),
            never_shutdown(),
            opts(900),
        );
        oracle.tick().await.unwrap();
        // head 912 - depth 12 = 900 = cursor: a single-block window
        assert_eq!(ranges.lock().unwrap().as_slice(), &[(900, 900)]);
    }

    #[tokio::test]
    async fn rerunning_after_submission_sends_nothing() {
        // first tick attests nonces 10 and 11; the app chain then reports
        // nonce 11 and the re-scan of the overlap finds nothing new
        let last_claim = Arc::new(Mutex::new(LastClaim {
            event_nonce: 9,
            eth_height: 900,
        }));
        let log: ClaimLog = Arc::default();
        let claim_state = last_claim.clone();
        let sent = log.clone();
        let app = MockAppChain {
            last_claim_event_fn: Some(Box::new(move || {
                Ok(*claim_state.lock().unwrap())
            })),
            send_ethereum_claims_fn: Some(Box::new(move |nonce, claims| {
                sent.lock().unwrap().push((nonce, claims));
                Ok(())
            })),
            ..Default::default()
        };
        let mut oracle = Oracle::new(
            Arc::new(eth_with_deposits(1000)),
            Arc::new(app),
            never_shutdown(),
            opts(900),
        );
        oracle.tick().await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);

        *last_claim.lock().unwrap() = LastClaim {
            event_nonce: 11,
            eth_height: 908,
        };
        oracle.tick().await.unwrap();
        // no second submission
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_submission_fails_the_tick_and_keeps_the_cursor() {
        let (mut app, _log) = recording_app_chain(9);
        app.send_ethereum_claims_fn = Some(Box::new(|_, _| {
            Err(Error::SubmissionRejected {
                reason: "validator is unbonding".into(),
            })
        }));
        let mut oracle = Oracle::new(
            Arc::new(eth_with_deposits(1000)),
            Arc::new(app),
            never_shutdown(),
            opts(900),
        );
        let res = oracle.tick().await;
        assert!(matches!(res, Err(Error::SubmissionRejected { .. })));
        assert!(!res.unwrap_err().is_loop_fatal());
        assert_eq!(oracle.last_confirmed_eth_height(), 900);
    }

    #[tokio::test]
    async fn resync_may_move_the_cursor_backwards() {
        let (app, _log) = recording_app_chain(30);
        let eth = MockEthereum {
            header_by_number_fn: Some(Box::new(|_| {
                Ok(Header {
                    number: 1000,
                    timestamp: 0,
                })
            })),
            ..Default::default()
        }
        .with_empty_event_streams();
        let mut opts = opts(950);
        opts.resync_interval = Duration::ZERO;
        let mut oracle =
            Oracle::new(Arc::new(eth), Arc::new(app), never_shutdown(), opts);
        oracle.tick().await.unwrap();
        // the app chain recorded height 900; the resync wins over the scan
        assert_eq!(oracle.last_confirmed_eth_height(), 900);
    }

    #[tokio::test]
    async fn exhausted_reads_end_the_loop() {
        let eth = MockEthereum {
            header_by_number_fn: Some(Box::new(|_| {
                Err(Error::Rpc {
                    message: "node is down".into(),
                })
            })),
            ..Default::default()
        };
        let mut oracle = Oracle::new(
            Arc::new(eth),
            Arc::new(MockAppChain::default()),
            never_shutdown(),
            opts(900),
        );
        let res = oracle.tick().await;
        assert!(matches!(res, Err(Error::RetryExhausted(_))));
        assert!(res.unwrap_err().is_loop_fatal());
    }
}
