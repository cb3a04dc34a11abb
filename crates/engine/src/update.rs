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

//! Channel updates and the deterministic function that applies them.
//!
//! Both the proposer and the receiver run [`apply_update`] on their own copy
//! of the channel. The receiver only counter-signs if its result hashes to
//! the state the proposer signed.

use alloy_primitives::{keccak256, Address, B256};
use duet_types::{merkle_root, Balance, CoreChannelState, CoreTransferState, Party, Signature};
use serde::{Deserialize, Serialize};

use crate::definitions::DefinitionRegistry;
use crate::error::{EngineError, EngineResult};

/// A transfer together with the initial state its definition resolves against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullTransferState {
    pub core: CoreTransferState,
    pub initial_state: Vec<u8>,
}

/// The change an update makes to the channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateDetails {
    /// Creates the channel. Always proposed by alice.
    Setup { timeout: u64 },
    /// Folds on-chain deposits up to these totals into the balances.
    Deposit {
        asset_id: B256,
        total_deposits_a: u128,
        total_deposits_b: u128,
    },
    /// Locks funds into a conditional transfer.
    Create {
        transfer: CoreTransferState,
        initial_state: Vec<u8>,
    },
    /// Settles an active transfer and credits the outcome.
    Resolve { transfer_id: B256, resolver: Vec<u8> },
    /// Moves funds from the proposer to the counterparty.
    Payment { asset_id: B256, amount: u128 },
}

impl UpdateDetails {
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateDetails::Setup { .. } => "setup",
            UpdateDetails::Deposit { .. } => "deposit",
            UpdateDetails::Create { .. } => "create",
            UpdateDetails::Resolve { .. } => "resolve",
            UpdateDetails::Payment { .. } => "payment",
        }
    }
}

/// An update as exchanged between the parties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub channel_address: B256,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub details: UpdateDetails,
    pub state: CoreChannelState,
    pub alice_signature: Option<Signature>,
    pub bob_signature: Option<Signature>,
}

impl ChannelUpdate {
    pub fn signature_of(&self, party: Party) -> Option<&Signature> {
        match party {
            Party::Alice => self.alice_signature.as_ref(),
            Party::Bob => self.bob_signature.as_ref(),
        }
    }

    pub fn set_signature(&mut self, party: Party, signature: Signature) {
        match party {
            Party::Alice => self.alice_signature = Some(signature),
            Party::Bob => self.bob_signature = Some(signature),
        }
    }

    /// The dual-signed state, once both signatures are present.
    pub fn signed_state(&self) -> Option<SignedChannelState> {
        Some(SignedChannelState {
            state: self.state.clone(),
            alice_signature: self.alice_signature?,
            bob_signature: self.bob_signature?,
        })
    }
}

/// A channel state carrying both parties' signatures over its hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedChannelState {
    pub state: CoreChannelState,
    pub alice_signature: Signature,
    pub bob_signature: Signature,
}

impl SignedChannelState {
    /// Checks both signatures against the state's hash.
    pub fn verify(&self) -> EngineResult<()> {
        let hash = self.state.hash();
        if !duet_types::verify(&self.alice_signature, &hash, &self.state.alice) {
            return Err(EngineError::InvalidSignature { party: Party::Alice });
        }
        if !duet_types::verify(&self.bob_signature, &hash, &self.state.bob) {
            return Err(EngineError::InvalidSignature { party: Party::Bob });
        }
        Ok(())
    }
}

/// Everything a party persists for one channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub latest: SignedChannelState,
    pub transfers: Vec<FullTransferState>,
    /// The update that produced `latest`, if it came from a regular update
    /// rather than a resync.
    pub latest_update: Option<ChannelUpdate>,
}

impl ChannelRecord {
    pub fn channel_address(&self) -> B256 {
        self.latest.state.channel_address
    }

    pub fn nonce(&self) -> u64 {
        self.latest.state.nonce
    }

    pub fn transfer(&self, transfer_id: &B256) -> Option<&FullTransferState> {
        self.transfers
            .iter()
            .find(|t| t.core.transfer_id == *transfer_id)
    }
}

/// Merkle root over the hashes of `transfers`.
pub fn transfers_root(transfers: &[FullTransferState]) -> B256 {
    let leaves: Vec<B256> = transfers.iter().map(|t| t.core.hash()).collect();
    merkle_root(&leaves)
}

/// Deterministic id for a transfer created at `nonce`.
pub fn transfer_id(channel_address: &B256, nonce: u64, initial_state_hash: &B256) -> B256 {
    let mut buf = Vec::with_capacity(72);
    buf.extend_from_slice(channel_address.as_slice());
    buf.extend_from_slice(&nonce.to_be_bytes());
    buf.extend_from_slice(initial_state_hash.as_slice());
    keccak256(buf)
}

/// Applies `details`, proposed by `from`, to `state` and its active transfers.
///
/// Returns the next state (nonce advanced by one) and the next transfer set.
/// The inputs are never modified.
pub fn apply_update(
    state: &CoreChannelState,
    transfers: &[FullTransferState],
    from: Party,
    details: &UpdateDetails,
    definitions: &DefinitionRegistry,
) -> EngineResult<(CoreChannelState, Vec<FullTransferState>)> {
    let mut next = state.clone();
    let mut next_transfers = transfers.to_vec();

    match details {
        UpdateDetails::Setup { timeout } => {
            if state.nonce != 0 {
                return Err(EngineError::InvalidUpdate("setup on an existing channel"));
            }
            if from != Party::Alice {
                return Err(EngineError::InvalidUpdate("setup must be proposed by alice"));
            }
            next.timeout = *timeout;
            next.defund_nonce = 1;
        }
        UpdateDetails::Deposit {
            asset_id,
            total_deposits_a,
            total_deposits_b,
        } => {
            let idx = next.asset_index_or_insert(*asset_id);
            let delta_a = total_deposits_a
                .checked_sub(next.processed_deposits_a[idx])
                .ok_or(EngineError::DepositRegressed)?;
            let delta_b = total_deposits_b
                .checked_sub(next.processed_deposits_b[idx])
                .ok_or(EngineError::DepositRegressed)?;
            if delta_a == 0 && delta_b == 0 {
                return Err(EngineError::NoUnreconciledDeposit);
            }
            credit(&mut next.balances[idx], Party::Alice, delta_a)?;
            credit(&mut next.balances[idx], Party::Bob, delta_b)?;
            next.processed_deposits_a[idx] = *total_deposits_a;
            next.processed_deposits_b[idx] = *total_deposits_b;
        }
        UpdateDetails::Create {
            transfer,
            initial_state,
        } => {
            if transfer.channel_address != state.channel_address {
                return Err(EngineError::InvalidTransfer("wrong channel"));
            }
            if transfer.initiator != state.signer_of(from) {
                return Err(EngineError::NotInitiator);
            }
            if transfer.responder != state.signer_of(from.counterparty()) {
                return Err(EngineError::InvalidTransfer("responder is not the counterparty"));
            }
            if keccak256(initial_state) != transfer.initial_state_hash {
                return Err(EngineError::InitialStateHashMismatch);
            }
            let definition = definitions
                .get(&transfer.transfer_definition)
                .ok_or_else(|| {
                    EngineError::UnknownDefinition(hex::encode(transfer.transfer_definition))
                })?;
            if transfer.transfer_timeout != definition.transfer_timeout() {
                return Err(EngineError::InvalidTransfer(
                    "timeout differs from the definition's",
                ));
            }
            let expected_id = transfer_id(
                &state.channel_address,
                state.nonce.saturating_add(1),
                &transfer.initial_state_hash,
            );
            if transfer.transfer_id != expected_id {
                return Err(EngineError::InvalidTransfer("transfer id is not derived"));
            }
            if transfers
                .iter()
                .any(|t| t.core.transfer_id == transfer.transfer_id)
            {
                return Err(EngineError::TransferExists(hex::encode(transfer.transfer_id)));
            }
            if transfer.balance.total().is_none() {
                return Err(EngineError::InvalidTransfer("locked amount overflows"));
            }
            let idx = next
                .asset_index(&transfer.asset_id)
                .ok_or_else(|| EngineError::UnknownAsset(hex::encode(transfer.asset_id)))?;
            debit(&mut next.balances[idx], from, transfer.balance.amount[0])?;
            debit(
                &mut next.balances[idx],
                from.counterparty(),
                transfer.balance.amount[1],
            )?;
            next_transfers.push(FullTransferState {
                core: transfer.clone(),
                initial_state: initial_state.clone(),
            });
            next.merkle_root = transfers_root(&next_transfers);
        }
        UpdateDetails::Resolve {
            transfer_id,
            resolver,
        } => {
            let pos = transfers
                .iter()
                .position(|t| t.core.transfer_id == *transfer_id)
                .ok_or_else(|| EngineError::TransferNotFound(hex::encode(transfer_id)))?;
            let transfer = next_transfers.remove(pos);
            if transfer.core.responder != state.signer_of(from) {
                return Err(EngineError::NotResponder);
            }
            let definition = definitions
                .get(&transfer.core.transfer_definition)
                .ok_or_else(|| {
                    EngineError::UnknownDefinition(hex::encode(transfer.core.transfer_definition))
                })?;
            let outcome =
                definition.resolve(&transfer.core.balance, &transfer.initial_state, resolver)?;
            if outcome.total() != transfer.core.balance.total() {
                return Err(EngineError::ResolvedBalanceMismatch);
            }
            let idx = next
                .asset_index(&transfer.core.asset_id)
                .ok_or_else(|| EngineError::UnknownAsset(hex::encode(transfer.core.asset_id)))?;
            let initiator = state
                .party_of(&transfer.core.initiator)
                .ok_or(EngineError::NotParticipant)?;
            credit(&mut next.balances[idx], initiator, outcome.amount[0])?;
            credit(
                &mut next.balances[idx],
                initiator.counterparty(),
                outcome.amount[1],
            )?;
            next.merkle_root = transfers_root(&next_transfers);
        }
        UpdateDetails::Payment { asset_id, amount } => {
            if *amount == 0 {
                return Err(EngineError::InvalidUpdate("zero payment"));
            }
            let idx = next
                .asset_index(asset_id)
                .ok_or_else(|| EngineError::UnknownAsset(hex::encode(asset_id)))?;
            debit(&mut next.balances[idx], from, *amount)?;
            credit(&mut next.balances[idx], from.counterparty(), *amount)?;
        }
    }

    next.nonce = state
        .nonce
        .checked_add(1)
        .ok_or(EngineError::InvalidUpdate("nonce overflow"))?;
    next.validate()?;
    Ok((next, next_transfers))
}

fn credit(balance: &mut Balance, party: Party, amount: u128) -> EngineResult<()> {
    let slot = &mut balance.amount[party.index()];
    *slot = slot
        .checked_add(amount)
        .ok_or(duet_types::TypesError::AmountOverflow)?;
    Ok(())
}

fn debit(balance: &mut Balance, party: Party, amount: u128) -> EngineResult<()> {
    let slot = &mut balance.amount[party.index()];
    *slot = slot
        .checked_sub(amount)
        .ok_or(EngineError::InsufficientBalance {
            available: *slot,
            required: amount,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::HashlockTransfer;
    use std::sync::Arc;

    const ASSET: B256 = B256::repeat_byte(0xa5);
    const DEFINITION: B256 = B256::repeat_byte(0xd1);

    fn alice() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn registry() -> DefinitionRegistry {
        let mut registry = DefinitionRegistry::new();
        registry.register(Arc::new(HashlockTransfer::new(DEFINITION, 10)));
        registry
    }

    fn funded() -> (CoreChannelState, Vec<FullTransferState>) {
        let empty = CoreChannelState::empty(B256::repeat_byte(0xcc), alice(), bob(), 0);
        let defs = registry();
        let (state, transfers) = apply_update(
            &empty,
            &[],
            Party::Alice,
            &UpdateDetails::Setup { timeout: 2 },
            &defs,
        )
        .unwrap();
        apply_update(
            &state,
            &transfers,
            Party::Alice,
            &UpdateDetails::Deposit {
                asset_id: ASSET,
                total_deposits_a: 100,
                total_deposits_b: 20,
            },
            &defs,
        )
        .unwrap()
    }

    fn hashlock(state: &CoreChannelState, preimage: &[u8], amount: u128) -> UpdateDetails {
        let initial_state = keccak256(preimage).to_vec();
        let initial_state_hash = keccak256(&initial_state);
        UpdateDetails::Create {
            transfer: CoreTransferState {
                channel_address: state.channel_address,
                transfer_id: transfer_id(
                    &state.channel_address,
                    state.nonce + 1,
                    &initial_state_hash,
                ),
                transfer_definition: DEFINITION,
                initiator: alice(),
                responder: bob(),
                asset_id: ASSET,
                balance: Balance::new(amount, 0),
                transfer_timeout: 10,
                initial_state_hash,
            },
            initial_state,
        }
    }

    #[test]
    fn setup_then_deposit() {
        let (state, transfers) = funded();
        assert_eq!(state.nonce, 2);
        assert_eq!(state.defund_nonce, 1);
        assert_eq!(state.timeout, 2);
        assert_eq!(state.balances, vec![Balance::new(100, 20)]);
        assert_eq!(state.processed_deposits_a, vec![100]);
        assert_eq!(state.processed_deposits_b, vec![20]);
        assert!(transfers.is_empty());
    }

    #[test]
    fn setup_only_from_alice() {
        let empty = CoreChannelState::empty(B256::ZERO, alice(), bob(), 0);
        let err = apply_update(
            &empty,
            &[],
            Party::Bob,
            &UpdateDetails::Setup { timeout: 2 },
            &registry(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidUpdate(_)));
    }

    #[test]
    fn deposit_without_delta_is_rejected() {
        let (state, transfers) = funded();
        let err = apply_update(
            &state,
            &transfers,
            Party::Bob,
            &UpdateDetails::Deposit {
                asset_id: ASSET,
                total_deposits_a: 100,
                total_deposits_b: 20,
            },
            &registry(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::NoUnreconciledDeposit));
    }

    #[test]
    fn deposit_folds_only_the_delta() {
        let (state, transfers) = funded();
        let (next, _) = apply_update(
            &state,
            &transfers,
            Party::Bob,
            &UpdateDetails::Deposit {
                asset_id: ASSET,
                total_deposits_a: 100,
                total_deposits_b: 38,
            },
            &registry(),
        )
        .unwrap();
        assert_eq!(next.balances, vec![Balance::new(100, 38)]);
        assert_eq!(next.processed_deposits_b, vec![38]);
    }

    #[test]
    fn payment_moves_funds() {
        let (state, transfers) = funded();
        let (next, _) = apply_update(
            &state,
            &transfers,
            Party::Bob,
            &UpdateDetails::Payment {
                asset_id: ASSET,
                amount: 5,
            },
            &registry(),
        )
        .unwrap();
        assert_eq!(next.balances, vec![Balance::new(105, 15)]);
        assert_eq!(next.nonce, state.nonce + 1);
        // Inputs are untouched.
        assert_eq!(state.balances, vec![Balance::new(100, 20)]);
    }

    #[test]
    fn overdrawn_payment_is_rejected() {
        let (state, transfers) = funded();
        let err = apply_update(
            &state,
            &transfers,
            Party::Bob,
            &UpdateDetails::Payment {
                asset_id: ASSET,
                amount: 21,
            },
            &registry(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientBalance {
                available: 20,
                required: 21
            }
        ));
    }

    #[test]
    fn create_and_resolve_hashlock() {
        let (state, transfers) = funded();
        let defs = registry();
        let create = hashlock(&state, b"secret", 30);
        let (locked, active) =
            apply_update(&state, &transfers, Party::Alice, &create, &defs).unwrap();
        assert_eq!(locked.balances, vec![Balance::new(70, 20)]);
        assert_eq!(active.len(), 1);
        assert_eq!(locked.merkle_root, active[0].core.hash());

        let resolve = UpdateDetails::Resolve {
            transfer_id: active[0].core.transfer_id,
            resolver: b"secret".to_vec(),
        };
        let (resolved, remaining) =
            apply_update(&locked, &active, Party::Bob, &resolve, &defs).unwrap();
        assert_eq!(resolved.balances, vec![Balance::new(70, 50)]);
        assert!(remaining.is_empty());
        assert_eq!(resolved.merkle_root, B256::ZERO);
    }

    #[test]
    fn only_responder_resolves() {
        let (state, transfers) = funded();
        let defs = registry();
        let create = hashlock(&state, b"x", 1);
        let (locked, active) =
            apply_update(&state, &transfers, Party::Alice, &create, &defs).unwrap();
        let resolve = UpdateDetails::Resolve {
            transfer_id: active[0].core.transfer_id,
            resolver: b"x".to_vec(),
        };
        let err = apply_update(&locked, &active, Party::Alice, &resolve, &defs).unwrap_err();
        assert!(matches!(err, EngineError::NotResponder));
    }

    #[test]
    fn create_checks_initial_state_and_initiator() {
        let (state, transfers) = funded();
        let defs = registry();

        let mut bad_hash = hashlock(&state, b"x", 1);
        if let UpdateDetails::Create { initial_state, .. } = &mut bad_hash {
            initial_state.push(0);
        }
        let err = apply_update(&state, &transfers, Party::Alice, &bad_hash, &defs).unwrap_err();
        assert!(matches!(err, EngineError::InitialStateHashMismatch));

        let err = apply_update(&state, &transfers, Party::Bob, &hashlock(&state, b"x", 1), &defs)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotInitiator));
    }

    #[test]
    fn create_requires_registered_definition() {
        let (state, transfers) = funded();
        let err = apply_update(
            &state,
            &transfers,
            Party::Alice,
            &hashlock(&state, b"x", 1),
            &DefinitionRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnknownDefinition(_)));
    }

    #[test]
    fn create_rejects_timeout_other_than_the_definition() {
        let (state, transfers) = funded();
        let mut short = hashlock(&state, b"x", 1);
        if let UpdateDetails::Create { transfer, .. } = &mut short {
            transfer.transfer_timeout = 0;
        }
        let err = apply_update(&state, &transfers, Party::Alice, &short, &registry()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransfer(_)));
    }

    #[test]
    fn create_rejects_foreign_transfer_id() {
        let (state, transfers) = funded();
        let defs = registry();

        let mut chosen = hashlock(&state, b"x", 1);
        if let UpdateDetails::Create { transfer, .. } = &mut chosen {
            transfer.transfer_id = B256::repeat_byte(0x77);
        }
        let err = apply_update(&state, &transfers, Party::Alice, &chosen, &defs).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransfer(_)));

        // An id derived for an earlier nonce does not carry over.
        let mut replayed = hashlock(&state, b"x", 1);
        if let UpdateDetails::Create { transfer, .. } = &mut replayed {
            transfer.transfer_id =
                transfer_id(&state.channel_address, state.nonce, &transfer.initial_state_hash);
        }
        let err = apply_update(&state, &transfers, Party::Alice, &replayed, &defs).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransfer(_)));
    }
}
