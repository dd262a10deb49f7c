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

//! Retry logic for async calls

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;

use crate::context::Shutdown;
use crate::error::{Error, Result};
use crate::probe;

/// Exponential backoff with Max Retry Count is a backoff policy which doubles
/// the wait between attempts (up to `max_interval`), until it exceeds the
/// maximum retry count.
#[derive(Debug, Clone)]
pub struct ExponentialWithMaxRetryCount {
    interval: Duration,
    base_interval: Duration,
    max_interval: Duration,
    max_retry_count: u32,
    count: u32,
}

impl ExponentialWithMaxRetryCount {
    /// Creates a new Exponential backoff starting at `base_interval`,
    /// doubling up to `max_interval`, with `max_retry_count` as the maximum
    /// number of retries, after which we return `None` to indicate that we
    /// should stop retrying.
    pub fn new(
        base_interval: Duration,
        max_interval: Duration,
        max_retry_count: u32,
    ) -> Self {
        Self {
            interval: base_interval,
            base_interval,
            max_interval,
            max_retry_count,
            count: 0,
        }
    }

    /// A policy with the default 1s..60s interval range and the given
    /// attempt budget.
    pub fn with_attempts(max_retry_count: u32) -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            max_retry_count,
        )
    }
}

impl Backoff for ExponentialWithMaxRetryCount {
    fn next_backoff(&mut self) -> Option<Duration> {
        (self.count < self.max_retry_count).then(|| {
            self.count += 1;
            let current = self.interval;
            self.interval = (self.interval * 2).min(self.max_interval);
            current
        })
    }

    fn reset(&mut self) {
        self.count = 0;
        self.interval = self.base_interval;
    }
}

/// Runs `op` until it succeeds, the `is_retryable` predicate rejects its
/// error, the policy runs out of attempts, or the shutdown signal fires.
///
/// A non-retryable error is returned as-is; an exhausted retryable error is
/// wrapped in [`Error::RetryExhausted`] so the caller can tell "the node
/// rejected us" apart from "the node is gone".
pub async fn retry_with_shutdown<T, F, Fut, P>(
    tag: &str,
    policy: ExponentialWithMaxRetryCount,
    shutdown: &mut Shutdown,
    is_retryable: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let operation = || {
        let fut = op();
        let is_retryable = &is_retryable;
        async move {
            fut.await.map_err(|e| {
                if is_retryable(&e) {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    };
    let notify = |e: Error, wait: Duration| {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::TRACE,
            kind = %probe::Kind::Retry,
            %tag,
            wait_ms = wait.as_millis() as u64,
        );
        tracing::warn!("{tag} failed, will retry in {wait:?}: {e}");
    };
    let retried = backoff::future::retry_notify(policy, operation, notify);
    tokio::select! {
        res = retried => res.map_err(|e| {
            // `retry_notify` only surfaces a retryable error once the
            // policy is exhausted; anything else came out as permanent.
            if is_retryable(&e) {
                Error::RetryExhausted(Box::new(e))
            } else {
                e
            }
        }),
        _ = shutdown.recv() => Err(Error::Cancelled),
    }
}

/// Same as [`retry_with_shutdown`] with the default transient-error
/// predicate.
pub async fn retry<T, F, Fut>(
    tag: &str,
    policy: ExponentialWithMaxRetryCount,
    shutdown: &mut Shutdown,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_shutdown(tag, policy, shutdown, Error::is_transient, op).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::sync::broadcast;

    use super::*;

    fn fast_policy(attempts: u32) -> ExponentialWithMaxRetryCount {
        ExponentialWithMaxRetryCount::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            attempts,
        )
    }

    fn shutdown_pair() -> (broadcast::Sender<()>, Shutdown) {
        let (tx, rx) = broadcast::channel(2);
        (tx, Shutdown::new(rx))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let (_tx, mut shutdown) = shutdown_pair();
        let calls = AtomicU32::new(0);
        let res = retry("test", fast_policy(5), &mut shutdown, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Rpc {
                    message: "boom".into(),
                })
            } else {
                Ok(42u64)
            }
        })
        .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let (_tx, mut shutdown) = shutdown_pair();
        let calls = AtomicU32::new(0);
        let res: Result<()> =
            retry("test", fast_policy(5), &mut shutdown, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::SubmissionRejected {
                    reason: "stale nonce".into(),
                })
            })
            .await;
        assert!(matches!(res, Err(Error::SubmissionRejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_is_reported_as_such() {
        let (_tx, mut shutdown) = shutdown_pair();
        let calls = AtomicU32::new(0);
        let res: Result<()> =
            retry("test", fast_policy(3), &mut shutdown, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Rpc {
                    message: "still down".into(),
                })
            })
            .await;
        assert!(matches!(res, Err(Error::RetryExhausted(_))));
        // initial attempt + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(res.unwrap_err().is_loop_fatal());
    }

    #[tokio::test]
    async fn shutdown_cancels_between_attempts() {
        let (tx, mut shutdown) = shutdown_pair();
        tx.send(()).unwrap();
        let res: Result<()> = retry(
            "test",
            ExponentialWithMaxRetryCount::new(
                Duration::from_secs(3600),
                Duration::from_secs(3600),
                5,
            ),
            &mut shutdown,
            || async {
                Err(Error::Rpc {
                    message: "down".into(),
                })
            },
        )
        .await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }
}
