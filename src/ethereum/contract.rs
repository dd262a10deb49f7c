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

//! Generated bindings for the bridge contract, plus the conversions from raw
//! logs into the domain event types.

use ethers::contract::abigen;
use ethers::contract::LogMeta;

use crate::types::{
    BatchExecutedEvent, Erc20DeployedEvent, SendToAppEvent, SendToOtherEvent,
    ValsetMember, ValsetUpdatedEvent,
};

abigen!(
    BridgeContract,
    r#"[
        event SendToOtherEvent(address indexed _tokenContract, address indexed _sender, bytes32 indexed _destination, uint256 _amount, uint256 _eventNonce)
        event SendToAppEvent(address indexed _tokenContract, address indexed _sender, string _destination, uint256 _amount, uint256 _eventNonce)
        event TransactionBatchExecutedEvent(uint256 indexed _batchNonce, address indexed _token, uint256 _eventNonce)
        event ERC20DeployedEvent(string _appDenom, address indexed _tokenContract, string _name, string _symbol, uint8 _decimals, uint256 _eventNonce)
        event ValsetUpdatedEvent(uint256 indexed _newValsetNonce, uint256 _eventNonce, uint256 _rewardAmount, address _rewardToken, address[] _validators, uint256[] _powers)
        function state_lastValsetNonce() external view returns (uint256)
        function lastBatchNonce(address _erc20Address) external view returns (uint256)
        function updateValset(address[] _newValidators, uint256[] _newPowers, uint256 _newValsetNonce, uint256 _newRewardAmount, address _newRewardToken, address[] _currentValidators, uint256[] _currentPowers, uint256 _currentValsetNonce, uint8[] _v, bytes32[] _r, bytes32[] _s) external
        function submitBatch(address[] _currentValidators, uint256[] _currentPowers, uint256 _currentValsetNonce, uint8[] _v, bytes32[] _r, bytes32[] _s, uint256[] _amounts, address[] _destinations, uint256[] _fees, uint256 _batchNonce, address _tokenContract, uint256 _batchTimeout) external
    ]"#,
);

impl SendToOtherEvent {
    pub(super) fn from_log(
        raw: SendToOtherEventFilter,
        meta: &LogMeta,
    ) -> Self {
        Self {
            token_contract: raw.token_contract,
            sender: raw.sender,
            destination: raw.destination.into(),
            amount: raw.amount,
            event_nonce: raw.event_nonce.as_u64(),
            block_height: meta.block_number.as_u64(),
        }
    }
}

impl SendToAppEvent {
    pub(super) fn from_log(raw: SendToAppEventFilter, meta: &LogMeta) -> Self {
        Self {
            token_contract: raw.token_contract,
            sender: raw.sender,
            destination: raw.destination,
            amount: raw.amount,
            event_nonce: raw.event_nonce.as_u64(),
            block_height: meta.block_number.as_u64(),
        }
    }
}

impl BatchExecutedEvent {
    pub(super) fn from_log(
        raw: TransactionBatchExecutedEventFilter,
        meta: &LogMeta,
    ) -> Self {
        Self {
            batch_nonce: raw.batch_nonce.as_u64(),
            token_contract: raw.token,
            event_nonce: raw.event_nonce.as_u64(),
            block_height: meta.block_number.as_u64(),
        }
    }
}

impl Erc20DeployedEvent {
    pub(super) fn from_log(
        raw: Erc20DeployedEventFilter,
        meta: &LogMeta,
    ) -> Self {
        Self {
            denom: raw.app_denom,
            token_contract: raw.token_contract,
            name: raw.name,
            symbol: raw.symbol,
            decimals: raw.decimals,
            event_nonce: raw.event_nonce.as_u64(),
            block_height: meta.block_number.as_u64(),
        }
    }
}

impl ValsetUpdatedEvent {
    pub(super) fn from_log(
        raw: ValsetUpdatedEventFilter,
        meta: &LogMeta,
    ) -> Self {
        let members = raw
            .validators
            .into_iter()
            .zip(raw.powers)
            .map(|(eth_address, power)| ValsetMember {
                eth_address,
                power: power.as_u64(),
            })
            .collect();
        Self {
            valset_nonce: raw.new_valset_nonce.as_u64(),
            members,
            reward_amount: raw.reward_amount,
            reward_token: raw.reward_token,
            event_nonce: raw.event_nonce.as_u64(),
            block_height: meta.block_number.as_u64(),
        }
    }
}
