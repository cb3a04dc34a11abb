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

//! Error types for the channel engine and its collaborators.

use duet_types::{Party, TypesError};
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from persisting or loading channel records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Errors reported by the ledger collaborator.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The adjudicator rejected the call; carries its stable reason.
    #[error("adjudicator rejected call: {0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by the messaging collaborator.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("counterparty unreachable: {0}")]
    Unreachable(String),

    /// The counterparty refused to counter-sign.
    #[error("counterparty rejected update: {0}")]
    Rejected(String),

    #[error("timed out waiting for counterparty")]
    Timeout,
}

/// Errors from running a transfer definition.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed initial state: {0}")]
    MalformedState(String),

    #[error("resolver rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur while proposing, receiving or disputing updates.
///
/// Every error leaves the locally stored state untouched.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("state error: {0}")]
    Types(#[from] TypesError),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("channel already exists: {0}")]
    ChannelExists(String),

    /// Another update for this channel is in flight.
    #[error("channel busy")]
    ChannelBusy,

    #[error("timed out waiting for channel lock")]
    LockTimeout,

    #[error("address is not a participant in this channel")]
    NotParticipant,

    #[error("identity mismatch")]
    IdentityMismatch,

    #[error("invalid {party:?} signature")]
    InvalidSignature { party: Party },

    #[error("stale update: local nonce {local}, proposed {proposed}")]
    StaleUpdate { local: u64, proposed: u64 },

    #[error("out of sync: local nonce {local}, proposed {proposed}")]
    OutOfSync { local: u64, proposed: u64 },

    /// Re-applying the update locally produced a different state.
    #[error("state mismatch: expected {expected}, got {actual}")]
    StateMismatch { expected: String, actual: String },

    #[error("merkle root does not match active transfers")]
    MerkleRootMismatch,

    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: u128, required: u128 },

    #[error("no unreconciled deposit")]
    NoUnreconciledDeposit,

    #[error("deposit totals regress below processed amounts")]
    DepositRegressed,

    #[error("claimed deposits exceed on-chain totals")]
    DepositExceedsOnchain,

    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    #[error("unknown transfer definition: {0}")]
    UnknownDefinition(String),

    #[error("transfer not found: {0}")]
    TransferNotFound(String),

    #[error("transfer already exists: {0}")]
    TransferExists(String),

    #[error("invalid transfer: {0}")]
    InvalidTransfer(&'static str),

    #[error("initial state hash mismatch")]
    InitialStateHashMismatch,

    #[error("only the initiator may create a transfer")]
    NotInitiator,

    #[error("only the responder may resolve a transfer")]
    NotResponder,

    #[error("resolved balance does not sum to locked amount")]
    ResolvedBalanceMismatch,

    #[error("invalid update: {0}")]
    InvalidUpdate(&'static str),

    #[error("channel was never disputed: {0}")]
    NotDisputed(String),

    #[error("not in defund phase: block {now}, phase [{opens}, {closes}]")]
    NotInDefundPhase { now: u64, opens: u64, closes: u64 },
}
