// Copyright 2025 - See NOTICE file for copyright holders.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Canonical ABI encoding and keccak256 commitments.
//!
//! The adjudicator and the off-chain engine must agree on these bytes
//! exactly. Channel and transfer states are mirrored as solidity structs and
//! hashed as `keccak256(abi.encode(state))`.

use alloc::vec::Vec;
use alloy_primitives::{keccak256, B256, U256};
use alloy_sol_types::sol;
use alloy_sol_types::SolValue;

use crate::error::TypesError;
use crate::state::{Balance, CoreChannelState, CoreTransferState};

sol! {
    #[derive(Debug, PartialEq)]
    struct BalanceSol {
        // [alice, bob] for channels, [initiator, responder] for transfers.
        uint256[2] amount;
    }

    #[derive(Debug, PartialEq)]
    struct CoreChannelStateSol {
        bytes32 channelAddress;
        address alice;
        address bob;
        bytes32[] assetIds;
        BalanceSol[] balances;
        uint256[] processedDepositsA;
        uint256[] processedDepositsB;
        uint256 defundNonce;
        uint256 timeout;
        uint256 nonce;
        bytes32 merkleRoot;
    }

    #[derive(Debug, PartialEq)]
    struct CoreTransferStateSol {
        bytes32 channelAddress;
        bytes32 transferId;
        bytes32 transferDefinition;
        address initiator;
        address responder;
        bytes32 assetId;
        BalanceSol balance;
        uint256 transferTimeout;
        bytes32 initialStateHash;
    }
}

impl From<&Balance> for BalanceSol {
    fn from(balance: &Balance) -> Self {
        BalanceSol {
            amount: [U256::from(balance.amount[0]), U256::from(balance.amount[1])],
        }
    }
}

impl TryFrom<BalanceSol> for Balance {
    type Error = TypesError;

    fn try_from(sol: BalanceSol) -> Result<Self, Self::Error> {
        Ok(Balance::new(to_u128(sol.amount[0])?, to_u128(sol.amount[1])?))
    }
}

// convert_channel_state mirrors a CoreChannelState into its solidity form.
pub fn convert_channel_state(state: &CoreChannelState) -> CoreChannelStateSol {
    CoreChannelStateSol {
        channelAddress: state.channel_address,
        alice: state.alice,
        bob: state.bob,
        assetIds: state.asset_ids.clone(),
        balances: state.balances.iter().map(BalanceSol::from).collect(),
        processedDepositsA: state.processed_deposits_a.iter().map(|d| U256::from(*d)).collect(),
        processedDepositsB: state.processed_deposits_b.iter().map(|d| U256::from(*d)).collect(),
        defundNonce: U256::from(state.defund_nonce),
        timeout: U256::from(state.timeout),
        nonce: U256::from(state.nonce),
        merkleRoot: state.merkle_root,
    }
}

// convert_transfer_state mirrors a CoreTransferState into its solidity form.
pub fn convert_transfer_state(transfer: &CoreTransferState) -> CoreTransferStateSol {
    CoreTransferStateSol {
        channelAddress: transfer.channel_address,
        transferId: transfer.transfer_id,
        transferDefinition: transfer.transfer_definition,
        initiator: transfer.initiator,
        responder: transfer.responder,
        assetId: transfer.asset_id,
        balance: BalanceSol::from(&transfer.balance),
        transferTimeout: U256::from(transfer.transfer_timeout),
        initialStateHash: transfer.initial_state_hash,
    }
}

pub fn encode_core_channel_state(state: &CoreChannelState) -> Vec<u8> {
    convert_channel_state(state).abi_encode()
}

pub fn decode_core_channel_state(data: &[u8]) -> Result<CoreChannelState, TypesError> {
    let sol = <CoreChannelStateSol as SolValue>::abi_decode(data, true)
        .map_err(|_| TypesError::Decode)?;
    let state = CoreChannelState {
        channel_address: sol.channelAddress,
        alice: sol.alice,
        bob: sol.bob,
        asset_ids: sol.assetIds,
        balances: sol
            .balances
            .into_iter()
            .map(Balance::try_from)
            .collect::<Result<_, _>>()?,
        processed_deposits_a: sol
            .processedDepositsA
            .into_iter()
            .map(to_u128)
            .collect::<Result<_, _>>()?,
        processed_deposits_b: sol
            .processedDepositsB
            .into_iter()
            .map(to_u128)
            .collect::<Result<_, _>>()?,
        defund_nonce: to_u64(sol.defundNonce)?,
        timeout: to_u64(sol.timeout)?,
        nonce: to_u64(sol.nonce)?,
        merkle_root: sol.merkleRoot,
    };
    state.validate()?;
    Ok(state)
}

pub fn hash_core_channel_state(state: &CoreChannelState) -> B256 {
    keccak256(encode_core_channel_state(state))
}

pub fn hash_core_transfer_state(transfer: &CoreTransferState) -> B256 {
    keccak256(convert_transfer_state(transfer).abi_encode())
}

/// Digest a responder signs to let someone else resolve a disputed transfer
/// on their behalf: `keccak256(abi.encode(transferStateHash, keccak256(resolver)))`.
pub fn responder_auth_digest(transfer_state_hash: &B256, resolver: &[u8]) -> B256 {
    keccak256((*transfer_state_hash, keccak256(resolver)).abi_encode())
}

fn to_u128(value: U256) -> Result<u128, TypesError> {
    u128::try_from(value).map_err(|_| TypesError::AmountOverflow)
}

fn to_u64(value: U256) -> Result<u64, TypesError> {
    u64::try_from(value).map_err(|_| TypesError::AmountOverflow)
}
