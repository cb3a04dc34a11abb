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

//! Bridges the contract's storage types to the shared channel model so that
//! hashes, signatures and merkle proofs match the off-chain engine byte for
//! byte.

use alloc::vec::Vec as StdVec;

use duet_types::{
    responder_auth_digest, verify, verify_merkle_proof, Address as EthAddress,
    Balance as CoreBalance, CoreChannelState, CoreTransferState, Signature, B256,
};
use soroban_sdk::{xdr::ToXdr, Address, Bytes, BytesN, Env, Vec};

use crate::{Balance, ChannelState, Error, TransferState};

fn b256(bytes: &BytesN<32>) -> B256 {
    B256::from(bytes.to_array())
}

fn eth_address(bytes: &BytesN<20>) -> EthAddress {
    EthAddress::from(bytes.to_array())
}

fn amount(value: i128) -> Result<u128, Error> {
    u128::try_from(value).map_err(|_| Error::InvalidAmount)
}

fn core_balance(balance: &Balance) -> Result<CoreBalance, Error> {
    Ok(CoreBalance::new(amount(balance.bal_a)?, amount(balance.bal_b)?))
}

fn amounts(values: &Vec<i128>) -> Result<StdVec<u128>, Error> {
    values.iter().map(amount).collect()
}

pub fn to_core_channel_state(state: &ChannelState) -> Result<CoreChannelState, Error> {
    let core = CoreChannelState {
        channel_address: b256(&state.channel_id),
        alice: eth_address(&state.alice),
        bob: eth_address(&state.bob),
        asset_ids: state.asset_ids.iter().map(|id| b256(&id)).collect(),
        balances: state
            .balances
            .iter()
            .map(|b| core_balance(&b))
            .collect::<Result<_, _>>()?,
        processed_deposits_a: amounts(&state.processed_deposits_a)?,
        processed_deposits_b: amounts(&state.processed_deposits_b)?,
        defund_nonce: state.defund_nonce,
        timeout: state.timeout,
        nonce: state.nonce,
        merkle_root: b256(&state.merkle_root),
    };
    core.validate().map_err(|_| Error::MalformedState)?;
    Ok(core)
}

pub fn to_core_transfer_state(transfer: &TransferState) -> Result<CoreTransferState, Error> {
    Ok(CoreTransferState {
        channel_address: b256(&transfer.channel_id),
        transfer_id: b256(&transfer.transfer_id),
        transfer_definition: b256(&transfer.transfer_definition),
        initiator: eth_address(&transfer.initiator),
        responder: eth_address(&transfer.responder),
        asset_id: b256(&transfer.asset_id),
        balance: core_balance(&transfer.balance)?,
        transfer_timeout: transfer.transfer_timeout,
        initial_state_hash: b256(&transfer.initial_state_hash),
    })
}

/// keccak256 commitment both parties sign for `state`.
pub fn hash_state(env: &Env, state: &ChannelState) -> Result<BytesN<32>, Error> {
    let hash = to_core_channel_state(state)?.hash();
    Ok(BytesN::from_array(env, &hash.0))
}

/// Merkle leaf of `transfer`.
pub fn hash_transfer(env: &Env, transfer: &TransferState) -> Result<BytesN<32>, Error> {
    let hash = to_core_transfer_state(transfer)?.hash();
    Ok(BytesN::from_array(env, &hash.0))
}

// address_id derives the 32-byte id under which an asset or transfer definition contract is known.
pub fn address_id(env: &Env, addr: &Address) -> BytesN<32> {
    env.crypto().keccak256(&addr.clone().to_xdr(env))
}

pub fn verify_signature(digest: &BytesN<32>, sig: &BytesN<65>, signer: &BytesN<20>) -> bool {
    verify(&Signature::from(sig.to_array()), &b256(digest), &eth_address(signer))
}

pub fn verify_proof(proof: &Vec<BytesN<32>>, root: &BytesN<32>, leaf: &BytesN<32>) -> bool {
    let proof: StdVec<B256> = proof.iter().map(|p| b256(&p)).collect();
    verify_merkle_proof(&proof, &b256(root), &b256(leaf))
}

pub fn responder_digest(env: &Env, transfer_hash: &BytesN<32>, resolver: &Bytes) -> BytesN<32> {
    let mut buf = alloc::vec![0u8; resolver.len() as usize];
    resolver.copy_into_slice(&mut buf);
    let digest = responder_auth_digest(&b256(transfer_hash), &buf);
    BytesN::from_array(env, &digest.0)
}
