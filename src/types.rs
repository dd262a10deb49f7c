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

//! Domain types shared by the orchestrator duties.
//!
//! Everything here mirrors replicated state: events emitted by the bridge
//! contract on Ethereum, and artifacts (valsets, batches, confirms) held by
//! the app chain. Event nonces are issued by the contract, strictly
//! ascending, and are the universal anti-replay primitive.

use std::time::SystemTime;

use ethers::abi::Token;
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An Ethereum block header, reduced to what the orchestrator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Block number.
    pub number: u64,
    /// Block timestamp (seconds since the epoch).
    pub timestamp: u64,
}

/// The highest claim this orchestrator has had accepted on the app chain:
/// the event nonce and the Ethereum block the event lived in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LastClaim {
    /// Nonce of the last attested event.
    pub event_nonce: u64,
    /// Ethereum block height of the last attested event.
    pub eth_height: u64,
}

/// Bridge module parameters as held by the app chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeParams {
    /// The 32-byte domain separator baked into the bridge contract. Every
    /// checkpoint digest commits to it.
    pub bridge_id: H256,
    /// The Ethereum height the bridge contract was deployed at; the oracle's
    /// scan cursor starts here when no claim exists yet.
    pub bridge_contract_start_height: u64,
    /// Seconds a valset must age on the app chain before relaying.
    pub relay_valset_offset: u64,
    /// Seconds a batch must age on the app chain before relaying.
    pub relay_batch_offset: u64,
    /// Seconds between oracle cursor resyncs.
    pub resync_interval: u64,
}

/// One member of a validator set: the Ethereum key the contract trusts and
/// the voting power behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValsetMember {
    /// The member's Ethereum address.
    pub eth_address: Address,
    /// The member's bridge voting power.
    pub power: u64,
}

/// An authenticated validator set. Members are ordered by descending power;
/// the bridge contract trusts signatures from its current valset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Valset {
    /// Strictly ascending valset nonce.
    pub nonce: u64,
    /// App chain block height this valset was created at.
    pub height: u64,
    /// Members by descending power.
    pub members: Vec<ValsetMember>,
    /// Relay reward paid out by the contract on update.
    pub reward_amount: U256,
    /// ERC20 the reward is denominated in.
    pub reward_token: Address,
}

impl Valset {
    /// The canonical digest a validator signs to confirm this valset. Must
    /// match the contract's checkpoint computation byte for byte.
    pub fn checkpoint_hash(&self, bridge_id: H256) -> H256 {
        let (addresses, powers): (Vec<_>, Vec<_>) = self
            .members
            .iter()
            .map(|m| {
                (
                    Token::Address(m.eth_address),
                    Token::Uint(U256::from(m.power)),
                )
            })
            .unzip();
        let encoded = ethers::abi::encode(&[
            Token::FixedBytes(bridge_id.as_bytes().to_vec()),
            Token::FixedBytes(method_word(b"checkpoint")),
            Token::Uint(U256::from(self.nonce)),
            Token::Array(addresses),
            Token::Array(powers),
            Token::Uint(self.reward_amount),
            Token::Address(self.reward_token),
        ]);
        H256::from(keccak256(encoded))
    }

    /// Aligns `confirms` with this valset's member order, matching by
    /// Ethereum address. Members that did not sign get a zero signature; the
    /// contract checks that the ones present clear the power threshold.
    ///
    /// Confirms are matched by address and never by position: member order
    /// is by descending power, which need not match submission order.
    pub fn order_signatures<C: SignedConfirm>(
        &self,
        confirms: &[C],
    ) -> Result<Vec<OrderedSignature>> {
        self.members
            .iter()
            .map(|member| {
                let confirm = confirms
                    .iter()
                    .find(|c| c.eth_address() == member.eth_address);
                match confirm {
                    Some(c) => parse_signature(c.signature()),
                    None => Ok(OrderedSignature::absent()),
                }
            })
            .collect()
    }
}

/// A signature by an orchestrator over a specific valset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValsetConfirm {
    /// The valset nonce this confirm covers.
    pub nonce: u64,
    /// The confirming orchestrator's app chain address.
    pub orchestrator: String,
    /// The Ethereum address the signature recovers to.
    pub eth_address: Address,
    /// Hex-encoded 65-byte ECDSA signature over the checkpoint digest.
    pub signature: String,
}

/// A signature by an orchestrator over a specific transaction batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchConfirm {
    /// The batch nonce this confirm covers.
    pub nonce: u64,
    /// The ERC20 contract the batch pays out.
    pub token_contract: Address,
    /// The confirming orchestrator's app chain address.
    pub orchestrator: String,
    /// The Ethereum address the signature recovers to.
    pub eth_address: Address,
    /// Hex-encoded 65-byte ECDSA signature over the checkpoint digest.
    pub signature: String,
}

/// Anything carrying an Ethereum signature attributable to a valset member.
pub trait SignedConfirm {
    /// The Ethereum address the signature recovers to.
    fn eth_address(&self) -> Address;
    /// The hex-encoded signature.
    fn signature(&self) -> &str;
}

impl SignedConfirm for ValsetConfirm {
    fn eth_address(&self) -> Address {
        self.eth_address
    }

    fn signature(&self) -> &str {
        &self.signature
    }
}

impl SignedConfirm for BatchConfirm {
    fn eth_address(&self) -> Address {
        self.eth_address
    }

    fn signature(&self) -> &str {
        &self.signature
    }
}

/// An ECDSA signature split into the r/s/v form the contract takes, aligned
/// to a valset member slot. An absent member is all zeroes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderedSignature {
    /// Recovery id.
    pub v: u8,
    /// R component.
    pub r: H256,
    /// S component.
    pub s: H256,
}

impl OrderedSignature {
    fn absent() -> Self {
        Self {
            v: 0,
            r: H256::zero(),
            s: H256::zero(),
        }
    }
}

fn parse_signature(hex_sig: &str) -> Result<OrderedSignature> {
    let sig: Signature = hex_sig
        .trim_start_matches("0x")
        .parse()
        .map_err(|_| Error::Generic("malformed confirm signature"))?;
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    sig.r.to_big_endian(&mut r);
    sig.s.to_big_endian(&mut s);
    Ok(OrderedSignature {
        v: sig.v as u8,
        r: H256::from(r),
        s: H256::from(s),
    })
}

/// One transfer inside an outgoing batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchTransfer {
    /// App chain assigned transfer id.
    pub id: u64,
    /// Sender on the app chain.
    pub sender: String,
    /// Recipient on Ethereum.
    pub destination: Address,
    /// Transfer amount in ERC20 base units.
    pub amount: U256,
    /// Fee paid to the relayer, same token.
    pub fee: U256,
}

/// A batch of outgoing transfers for a single token, ordered by ascending
/// nonce per token on the app chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutgoingBatch {
    /// Strictly ascending batch nonce (per token).
    pub batch_nonce: u64,
    /// The ERC20 contract this batch pays out.
    pub token_contract: Address,
    /// The transfers paid out by this batch.
    pub transactions: Vec<BatchTransfer>,
    /// Ethereum height after which the contract refuses this batch.
    pub batch_timeout: u64,
    /// App chain block height this batch was created at.
    pub block_created_at: u64,
}

impl OutgoingBatch {
    /// The canonical digest a validator signs to confirm this batch. Must
    /// match the contract's checkpoint computation byte for byte.
    pub fn checkpoint_hash(&self, bridge_id: H256) -> H256 {
        let mut amounts = Vec::with_capacity(self.transactions.len());
        let mut destinations = Vec::with_capacity(self.transactions.len());
        let mut fees = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            amounts.push(Token::Uint(tx.amount));
            destinations.push(Token::Address(tx.destination));
            fees.push(Token::Uint(tx.fee));
        }
        let encoded = ethers::abi::encode(&[
            Token::FixedBytes(bridge_id.as_bytes().to_vec()),
            Token::FixedBytes(method_word(b"transactionBatch")),
            Token::Array(amounts),
            Token::Array(destinations),
            Token::Array(fees),
            Token::Uint(U256::from(self.batch_nonce)),
            Token::Address(self.token_contract),
            Token::Uint(U256::from(self.batch_timeout)),
        ]);
        H256::from(keccak256(encoded))
    }
}

/// An app chain block, reduced to what the offset gates read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppBlock {
    /// Block height.
    pub height: u64,
    /// Block time.
    pub time: SystemTime,
}

/// Accumulated fees of not-yet-batched outgoing transfers for one token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenFees {
    /// The ERC20 contract the fees are denominated in.
    pub token_contract: Address,
    /// The token's app chain denom.
    pub denom: String,
    /// Sum of fees over all pending transfers, in base units.
    pub total_fees: U256,
}

/// A deposit observed through the bridge contract's legacy send interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SendToOtherEvent {
    /// The ERC20 that was deposited.
    pub token_contract: Address,
    /// Depositor on Ethereum.
    pub sender: Address,
    /// Recipient, as an opaque 32-byte destination.
    pub destination: H256,
    /// Deposited amount in base units.
    pub amount: U256,
    /// Contract-issued event nonce.
    pub event_nonce: u64,
    /// Ethereum block the event was emitted in.
    pub block_height: u64,
}

/// A deposit addressed to an app chain account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SendToAppEvent {
    /// The ERC20 that was deposited.
    pub token_contract: Address,
    /// Depositor on Ethereum.
    pub sender: Address,
    /// Recipient account on the app chain.
    pub destination: String,
    /// Deposited amount in base units.
    pub amount: U256,
    /// Contract-issued event nonce.
    pub event_nonce: u64,
    /// Ethereum block the event was emitted in.
    pub block_height: u64,
}

/// A transaction batch that the contract executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchExecutedEvent {
    /// Nonce of the executed batch.
    pub batch_nonce: u64,
    /// The ERC20 the batch paid out.
    pub token_contract: Address,
    /// Contract-issued event nonce.
    pub event_nonce: u64,
    /// Ethereum block the event was emitted in.
    pub block_height: u64,
}

/// An ERC20 representation deployed by the contract for an app chain denom.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Erc20DeployedEvent {
    /// The app chain denom the ERC20 represents.
    pub denom: String,
    /// The freshly deployed ERC20 contract.
    pub token_contract: Address,
    /// ERC20 name.
    pub name: String,
    /// ERC20 symbol.
    pub symbol: String,
    /// ERC20 decimals.
    pub decimals: u8,
    /// Contract-issued event nonce.
    pub event_nonce: u64,
    /// Ethereum block the event was emitted in.
    pub block_height: u64,
}

/// A valset update the contract accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValsetUpdatedEvent {
    /// Nonce of the valset now current on the contract.
    pub valset_nonce: u64,
    /// Members of the new valset.
    pub members: Vec<ValsetMember>,
    /// Reward paid out for the update.
    pub reward_amount: U256,
    /// ERC20 the reward was denominated in.
    pub reward_token: Address,
    /// Contract-issued event nonce.
    pub event_nonce: u64,
    /// Ethereum block the event was emitted in.
    pub block_height: u64,
}

/// Anything the bridge contract emitted with an event nonce attached.
pub trait EventWithNonce {
    /// The contract-issued nonce of this event.
    fn event_nonce(&self) -> u64;
}

macro_rules! impl_event_with_nonce {
    ($($event:ty),+ $(,)?) => {
        $(impl EventWithNonce for $event {
            fn event_nonce(&self) -> u64 {
                self.event_nonce
            }
        })+
    };
}

impl_event_with_nonce!(
    SendToOtherEvent,
    SendToAppEvent,
    BatchExecutedEvent,
    Erc20DeployedEvent,
    ValsetUpdatedEvent,
);

/// Drops every event whose nonce is not strictly greater than `nonce`.
///
/// The oracle re-scans the block of its last submission on purpose; this
/// filter is what makes that overlap idempotent.
pub fn filter_events_by_nonce<E: EventWithNonce>(
    events: Vec<E>,
    nonce: u64,
) -> Vec<E> {
    events
        .into_iter()
        .filter(|ev| ev.event_nonce() > nonce)
        .collect()
}

/// All events gathered by one oracle iteration, submitted as one atomic
/// claim: events in the same block are attested together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventBatch {
    /// Legacy deposits.
    pub send_to_other: Vec<SendToOtherEvent>,
    /// Deposits addressed to app chain accounts.
    pub send_to_app: Vec<SendToAppEvent>,
    /// Executed batches.
    pub batch_executed: Vec<BatchExecutedEvent>,
    /// Deployed ERC20 representations.
    pub erc20_deployed: Vec<Erc20DeployedEvent>,
    /// Accepted valset updates.
    pub valset_updated: Vec<ValsetUpdatedEvent>,
}

impl EventBatch {
    /// Whether this batch carries no events at all.
    pub fn is_empty(&self) -> bool {
        self.send_to_other.is_empty()
            && self.send_to_app.is_empty()
            && self.batch_executed.is_empty()
            && self.erc20_deployed.is_empty()
            && self.valset_updated.is_empty()
    }

    /// Total number of events across all five kinds.
    pub fn len(&self) -> usize {
        self.send_to_other.len()
            + self.send_to_app.len()
            + self.batch_executed.len()
            + self.erc20_deployed.len()
            + self.valset_updated.len()
    }
}

fn method_word(name: &[u8]) -> Vec<u8> {
    let mut word = vec![0u8; 32];
    word[..name.len()].copy_from_slice(name);
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(addr: u64, power: u64) -> ValsetMember {
        ValsetMember {
            eth_address: Address::from_low_u64_be(addr),
            power,
        }
    }

    fn hex_sig(fill: u8, v: u8) -> String {
        let mut bytes = vec![fill; 64];
        bytes.push(v);
        format!("0x{}", hex::encode(bytes))
    }

    #[test]
    fn nonce_filter_is_strict() {
        let events = vec![
            SendToAppEvent {
                event_nonce: 9,
                ..Default::default()
            },
            SendToAppEvent {
                event_nonce: 10,
                ..Default::default()
            },
            SendToAppEvent {
                event_nonce: 11,
                ..Default::default()
            },
        ];
        let kept = filter_events_by_nonce(events, 10);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].event_nonce, 11);
    }

    #[test]
    fn nonce_filter_works_for_every_event_kind() {
        let kept = filter_events_by_nonce(
            vec![ValsetUpdatedEvent {
                event_nonce: 3,
                ..Default::default()
            }],
            3,
        );
        assert!(kept.is_empty());
        let kept = filter_events_by_nonce(
            vec![BatchExecutedEvent {
                event_nonce: 4,
                ..Default::default()
            }],
            3,
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn valset_checkpoint_is_deterministic_and_nonce_sensitive() {
        let bridge_id = H256::from_low_u64_be(0xdefa);
        let valset = Valset {
            nonce: 333,
            height: 1,
            members: vec![member(1, 1000), member(2, 500)],
            reward_amount: U256::from(1000u64),
            reward_token: Address::from_low_u64_be(0xfafa),
        };
        assert_eq!(
            valset.checkpoint_hash(bridge_id),
            valset.clone().checkpoint_hash(bridge_id)
        );
        let mut bumped = valset.clone();
        bumped.nonce = 334;
        assert_ne!(
            valset.checkpoint_hash(bridge_id),
            bumped.checkpoint_hash(bridge_id)
        );
        // A different domain separator yields a different digest too.
        assert_ne!(
            valset.checkpoint_hash(bridge_id),
            valset.checkpoint_hash(H256::from_low_u64_be(0xbeef))
        );
    }

    #[test]
    fn batch_checkpoint_commits_to_the_transfers() {
        let bridge_id = H256::from_low_u64_be(0xdefa);
        let batch = OutgoingBatch {
            batch_nonce: 202,
            token_contract: Address::from_low_u64_be(0xcafe),
            transactions: vec![BatchTransfer {
                id: 1,
                sender: "app1sender".into(),
                destination: Address::from_low_u64_be(7),
                amount: U256::from(100u64),
                fee: U256::from(3u64),
            }],
            batch_timeout: 4_000,
            block_created_at: 10,
        };
        let mut refunded = batch.clone();
        refunded.transactions[0].amount = U256::from(101u64);
        assert_ne!(
            batch.checkpoint_hash(bridge_id),
            refunded.checkpoint_hash(bridge_id)
        );
    }

    #[test]
    fn signatures_are_matched_by_address_not_position() {
        let valset = Valset {
            nonce: 444,
            height: 1,
            members: vec![member(1, 1000), member(2, 500), member(3, 100)],
            ..Default::default()
        };
        // Confirms arrive in arbitrary order and member 2 never signed.
        let confirms = vec![
            ValsetConfirm {
                nonce: 444,
                orchestrator: "app1c".into(),
                eth_address: Address::from_low_u64_be(3),
                signature: hex_sig(0x33, 27),
            },
            ValsetConfirm {
                nonce: 444,
                orchestrator: "app1a".into(),
                eth_address: Address::from_low_u64_be(1),
                signature: hex_sig(0x11, 28),
            },
        ];
        let ordered = valset.order_signatures(&confirms).unwrap();
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered[0].v, 28);
        assert_eq!(ordered[0].r, H256::from([0x11; 32]));
        assert_eq!(ordered[1], OrderedSignature::absent());
        assert_eq!(ordered[2].v, 27);
        assert_eq!(ordered[2].s, H256::from([0x33; 32]));
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        let valset = Valset {
            nonce: 444,
            height: 1,
            members: vec![member(1, 1000)],
            ..Default::default()
        };
        let confirms = vec![ValsetConfirm {
            nonce: 444,
            orchestrator: "app1a".into(),
            eth_address: Address::from_low_u64_be(1),
            signature: "0xdeadbeef".into(),
        }];
        assert!(valset.order_signatures(&confirms).is_err());
    }
}
