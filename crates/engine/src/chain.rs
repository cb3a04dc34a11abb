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

//! Ledger collaborator: reads deposit totals and submits adjudicator calls.

use alloy_primitives::B256;
use duet_types::{CoreChannelState, CoreTransferState, Signature};

use crate::error::ChainError;
use crate::update::SignedChannelState;

/// Result type alias for ledger operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Outcome of a submitted adjudicator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    /// Ledger sequence number the call was included at.
    pub block_number: u64,
}

/// Totals deposited into a channel for one asset, as recorded by the adjudicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepositTotals {
    pub alice: u128,
    pub bob: u128,
}

/// The stored dispute of a channel, as far as the engine needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisputeWindow {
    pub nonce: u64,
    pub consensus_expiry: u64,
    pub defund_expiry: u64,
}

impl DisputeWindow {
    /// Whether `block` lies in `[consensus_expiry, defund_expiry]`.
    pub fn in_defund_phase(&self, block: u64) -> bool {
        self.consensus_expiry <= block && block <= self.defund_expiry
    }
}

/// The adjudicator as seen from the engine.
#[async_trait::async_trait]
pub trait ChainService: Send + Sync {
    /// Current ledger sequence number.
    async fn block_number(&self) -> ChainResult<u64>;

    async fn total_deposits(&self, channel: &B256, asset_id: &B256) -> ChainResult<DepositTotals>;

    /// The channel's dispute, or `None` if it was never disputed.
    async fn channel_dispute(&self, channel: &B256) -> ChainResult<Option<DisputeWindow>>;

    async fn dispute_channel(&self, signed: &SignedChannelState) -> ChainResult<TxReceipt>;

    async fn defund_channel(&self, state: &CoreChannelState) -> ChainResult<TxReceipt>;

    async fn dispute_transfer(
        &self,
        transfer: &CoreTransferState,
        proof: &[B256],
    ) -> ChainResult<TxReceipt>;

    async fn defund_transfer(
        &self,
        transfer: &CoreTransferState,
        initial_state: &[u8],
        resolver: &[u8],
        responder_signature: Option<Signature>,
    ) -> ChainResult<TxReceipt>;
}
