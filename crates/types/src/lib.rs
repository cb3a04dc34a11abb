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

//! Shared channel model for the duet adjudicator and off-chain engine.
//!
//! Everything both sides must compute bit-identically lives here: the
//! signed state types, their ABI encoding and keccak256 commitment, the
//! merkle tree over active transfers, and secp256k1 signing/recovery.

#![no_std]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod error;
pub mod ethsig;
pub mod merkle;
pub mod sol;
pub mod state;

pub use alloy_primitives::{keccak256, Address, B256};
pub use error::TypesError;
pub use ethsig::{recover_signer, verify, ChannelSigner};
pub use merkle::{merkle_proof, merkle_root, verify_merkle_proof};
pub use sol::responder_auth_digest;
pub use state::{Balance, CoreChannelState, CoreTransferState, Party, Signature};
