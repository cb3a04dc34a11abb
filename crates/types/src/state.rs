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

//! Channel and transfer state as both parties sign it.
//!
//! These are plain value types. Their canonical byte form and hash live in
//! [`crate::sol`]; everything that needs to compare two states compares the
//! hashes.

use alloc::vec::Vec;
use alloy_primitives::{Address, FixedBytes, B256};

use crate::error::TypesError;
use crate::sol;

/// 65-byte `r || s || v` secp256k1 signature, `v` in `{27, 28}`.
pub type Signature = FixedBytes<65>;

/// The two fixed seats of a channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Party {
    Alice,
    Bob,
}

impl Party {
    /// Position of this party in `Balance::amount`.
    pub fn index(self) -> usize {
        match self {
            Party::Alice => 0,
            Party::Bob => 1,
        }
    }

    pub fn counterparty(self) -> Party {
        match self {
            Party::Alice => Party::Bob,
            Party::Bob => Party::Alice,
        }
    }
}

/// Two amounts of a single asset.
///
/// In a channel state the slots are `[alice, bob]`; in a transfer they are
/// `[initiator, responder]`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Balance {
    pub amount: [u128; 2],
}

impl Balance {
    pub fn new(first: u128, second: u128) -> Self {
        Self {
            amount: [first, second],
        }
    }

    /// Sum of both slots, `None` on overflow.
    pub fn total(&self) -> Option<u128> {
        self.amount[0].checked_add(self.amount[1])
    }
}

/// The signed portion of a channel's state.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoreChannelState {
    pub channel_address: B256,
    pub alice: Address,
    pub bob: Address,
    pub asset_ids: Vec<B256>,
    pub balances: Vec<Balance>,
    pub processed_deposits_a: Vec<u128>,
    pub processed_deposits_b: Vec<u128>,
    pub defund_nonce: u64,
    pub timeout: u64,
    pub nonce: u64,
    pub merkle_root: B256,
}

impl CoreChannelState {
    /// A fresh state at nonce 0, before the setup update is applied.
    pub fn empty(channel_address: B256, alice: Address, bob: Address, timeout: u64) -> Self {
        Self {
            channel_address,
            alice,
            bob,
            asset_ids: Vec::new(),
            balances: Vec::new(),
            processed_deposits_a: Vec::new(),
            processed_deposits_b: Vec::new(),
            defund_nonce: 1,
            timeout,
            nonce: 0,
            merkle_root: B256::ZERO,
        }
    }

    /// Checks that the per-asset vectors line up and asset ids are distinct.
    pub fn validate(&self) -> Result<(), TypesError> {
        let n = self.asset_ids.len();
        if self.balances.len() != n
            || self.processed_deposits_a.len() != n
            || self.processed_deposits_b.len() != n
        {
            return Err(TypesError::LengthMismatch);
        }
        for (i, id) in self.asset_ids.iter().enumerate() {
            if self.asset_ids[..i].contains(id) {
                return Err(TypesError::DuplicateAsset);
            }
        }
        Ok(())
    }

    pub fn asset_index(&self, asset_id: &B256) -> Option<usize> {
        self.asset_ids.iter().position(|a| a == asset_id)
    }

    /// Index of `asset_id`, appending a zeroed entry if the asset is new.
    pub fn asset_index_or_insert(&mut self, asset_id: B256) -> usize {
        match self.asset_index(&asset_id) {
            Some(idx) => idx,
            None => {
                self.asset_ids.push(asset_id);
                self.balances.push(Balance::default());
                self.processed_deposits_a.push(0);
                self.processed_deposits_b.push(0);
                self.asset_ids.len() - 1
            }
        }
    }

    /// Which seat `signer` holds, if any.
    pub fn party_of(&self, signer: &Address) -> Option<Party> {
        if *signer == self.alice {
            Some(Party::Alice)
        } else if *signer == self.bob {
            Some(Party::Bob)
        } else {
            None
        }
    }

    pub fn signer_of(&self, party: Party) -> Address {
        match party {
            Party::Alice => self.alice,
            Party::Bob => self.bob,
        }
    }

    /// True if both states describe the same channel between the same parties.
    pub fn same_identity(&self, other: &CoreChannelState) -> bool {
        self.channel_address == other.channel_address
            && self.alice == other.alice
            && self.bob == other.bob
    }

    /// keccak256 of the canonical ABI encoding.
    pub fn hash(&self) -> B256 {
        sol::hash_core_channel_state(self)
    }

    pub fn encode(&self) -> Vec<u8> {
        sol::encode_core_channel_state(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, TypesError> {
        sol::decode_core_channel_state(data)
    }
}

/// The signed portion of a conditional transfer; the leaf of a channel's
/// merkle tree.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoreTransferState {
    pub channel_address: B256,
    pub transfer_id: B256,
    pub transfer_definition: B256,
    pub initiator: Address,
    pub responder: Address,
    pub asset_id: B256,
    pub balance: Balance,
    pub transfer_timeout: u64,
    pub initial_state_hash: B256,
}

impl CoreTransferState {
    pub fn hash(&self) -> B256 {
        sol::hash_core_transfer_state(self)
    }
}
