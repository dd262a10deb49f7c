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

//! The tick driver shared by all four orchestrator duties.

use std::time::Duration;

use tokio::time::Instant;

use crate::context::Shutdown;
use crate::error::{Error, Result};

/// A long-running orchestrator duty driven by [`run_loop`].
///
/// A duty only implements its per-tick body; scheduling, error logging and
/// cancellation live in the driver. Ticks never overlap: a body that runs
/// longer than the interval simply delays the next tick.
#[async_trait::async_trait]
pub trait Loop: Send {
    /// A helper tag used to identify the duty in the logs.
    const TAG: &'static str;

    /// How long to wait between two invocations of the body.
    fn interval(&self) -> Duration;

    /// One iteration of the duty. Returned errors are logged and the loop
    /// keeps ticking, except for loop-fatal ones (exhausted retries), which
    /// end the loop so the supervisor can restart it from a clean slate.
    async fn tick(&mut self) -> Result<()>;
}

/// Drives `duty` until shutdown or a loop-fatal error.
///
/// Each iteration invokes the body, awaits its completion, then waits out the
/// remainder of the interval before re-invoking. Returns `Ok(())` on
/// shutdown.
pub async fn run_loop<L: Loop>(mut duty: L, mut shutdown: Shutdown) -> Result<()> {
    tracing::debug!("{} started", L::TAG);
    loop {
        let started = Instant::now();
        tokio::select! {
            res = duty.tick() => match res {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    tracing::debug!("{} cancelled mid-tick", L::TAG);
                    return Ok(());
                }
                Err(e) if e.is_loop_fatal() => {
                    tracing::error!("{} got fatal error, loop exits: {}", L::TAG, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("{} tick failed: {}", L::TAG, e);
                }
            },
            _ = shutdown.recv() => {
                tracing::debug!("{} shutting down", L::TAG);
                return Ok(());
            }
        }
        let remaining = duty.interval().saturating_sub(started.elapsed());
        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            _ = shutdown.recv() => {
                tracing::debug!("{} shutting down", L::TAG);
                return Ok(());
            }
        }
    }
}
