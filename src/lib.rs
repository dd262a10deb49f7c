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

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Webb Bridge Orchestrator
//!
//! A validator-side process that ferries state between an Ethereum bridge
//! contract and the app chain that mirrors it. One orchestrator runs
//! alongside each validator and performs up to four duties, each a
//! long-lived loop in its own fault domain:
//!
//!   1. **Oracle** — observes finalized bridge events on Ethereum and
//!      attests them as claims on the app chain.
//!   2. **Relayer** — lifts signed validator-set updates and transaction
//!      batches off the app chain and submits them to the bridge contract.
//!   3. **Signer** — signs pending valsets and batches on behalf of the
//!      local validator.
//!   4. **Batch requester** — asks the app chain to cut a new outgoing
//!      batch once the accumulated fees are worth relaying.
//!
//! The duties never share mutable state; they coordinate only through the
//! app chain's replicated state. Contract-issued event nonces order all
//! claims, confirmation depth defines finality, and per-validator relay
//! offsets keep the relayers from racing each other with identical
//! transactions.

/// The app chain wire surface and its REST client.
pub mod app_chain;
/// Batch requester duty.
pub mod batch_requester;
/// CLI arguments and config loading.
pub mod cli;
/// Orchestrator configuration.
pub mod config;
/// Context and shutdown signalling.
pub mod context;
/// Error types.
pub mod error;
/// The Ethereum wire surface and its contract client.
pub mod ethereum;
/// The tick driver shared by the duties.
pub mod loops;
/// Oracle duty.
pub mod oracle;
/// Price backends for fee pricing.
pub mod price;
/// A module used for debugging orchestrator lifecycle and duty state.
pub mod probe;
/// Relayer duty.
pub mod relayer;
/// Retry functionality.
pub mod retry;
/// Service wiring and duty supervision.
pub mod service;
/// Signer duty.
pub mod signer;
/// Domain types.
pub mod types;

#[cfg(test)]
mod test_utils;
