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

//! Orchestrator context: configuration plus the process-wide shutdown signal.

use std::convert::TryFrom;
use std::time::Duration;

use ethers::core::k256::SecretKey;
use ethers::prelude::*;
use tokio::sync::broadcast;

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};

/// OrchestratorContext contains the orchestrator's configuration and shutdown
/// signal.
#[derive(Clone)]
pub struct OrchestratorContext {
    /// The configuration of the orchestrator.
    pub config: OrchestratorConfig,
    /// Broadcasts a shutdown signal to all active loops.
    ///
    /// The initial `shutdown` trigger is provided by the binary entry point.
    /// When a loop task is spawned, it is passed a broadcast receiver handle.
    /// When a graceful shutdown is initiated, a `()` value is sent via the
    /// broadcast::Sender. Each loop receives it, reaches a safe terminal
    /// state, and completes the task.
    notify_shutdown: broadcast::Sender<()>,
}

impl OrchestratorContext {
    /// Creates a new OrchestratorContext.
    pub fn new(config: OrchestratorConfig) -> Self {
        let (notify_shutdown, _) = broadcast::channel(2);
        Self {
            config,
            notify_shutdown,
        }
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed loops.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// Returns a new Ethereum provider pointed at the configured bridge
    /// endpoint.
    pub fn evm_provider(&self) -> Result<Provider<Http>> {
        let provider =
            Provider::try_from(self.config.ethereum.http_endpoint.as_str())?
                .interval(Duration::from_millis(5u64));
        Ok(provider)
    }

    /// Sets up and returns the orchestrator's Ethereum wallet.
    pub fn evm_wallet(&self) -> Result<LocalWallet> {
        let private_key = self
            .config
            .ethereum
            .private_key
            .as_ref()
            .ok_or(Error::MissingSecrets)?;
        let key = SecretKey::from_bytes(private_key.as_bytes().into())?;
        let chain_id = self.config.ethereum.chain_id;
        let wallet = LocalWallet::from(key).with_chain_id(chain_id);
        Ok(wallet)
    }
}

/// Listens for the process shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, every
/// loop should shutdown.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal has
/// been received. Callers may query for whether the shutdown signal has been
/// received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Whether the shutdown signal has already been observed.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}
