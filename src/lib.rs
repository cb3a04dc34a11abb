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

#![no_std]
extern crate alloc;

mod commit;

use alloc::vec::Vec as StdVec;

use soroban_sdk::{
    contract, contractclient, contracterror, contractimpl, contracttype, log, symbol_short, token,
    xdr::ToXdr, Address, Bytes, BytesN, Env, Symbol, Vec,
};

pub use commit::{address_id, hash_state, hash_transfer};

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    ChannelNotFound = 1,
    ChannelAlreadyExists = 2,
    IdentityMismatch = 3,
    InvalidAliceSignature = 4,
    InvalidBobSignature = 5,
    StaleNonce = 6,
    ConsensusPhaseEnded = 7,
    NotInDefundPhase = 8,
    HashMismatch = 9,
    AlreadyDefunded = 10,
    InvalidMerkleProof = 11,
    TransferAlreadyDisputed = 12,
    TransferNotDisputed = 13,
    TransferHashMismatch = 14,
    TransferAlreadyDefunded = 15,
    NotResponder = 16,
    InitialStateMismatch = 17,
    ResolvedBalanceMismatch = 18,
    UnknownAsset = 19,
    UnknownDefinition = 20,
    MalformedState = 21,
    InvalidAmount = 22,
    InsufficientChannelFunds = 23,
    Overflow = 24,
}

impl Error {
    /// Stable, human readable reason for the error code.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::ChannelNotFound => "channel not found",
            Error::ChannelAlreadyExists => "channel already exists",
            Error::IdentityMismatch => "identity mismatch",
            Error::InvalidAliceSignature => "invalid alice signature",
            Error::InvalidBobSignature => "invalid bob signature",
            Error::StaleNonce => "stale nonce",
            Error::ConsensusPhaseEnded => "not allowed once consensus phase has ended",
            Error::NotInDefundPhase => "not in defund phase",
            Error::HashMismatch => "hash mismatch",
            Error::AlreadyDefunded => "already defunded",
            Error::InvalidMerkleProof => "invalid merkle proof",
            Error::TransferAlreadyDisputed => "transfer already disputed",
            Error::TransferNotDisputed => "transfer not disputed",
            Error::TransferHashMismatch => "transfer hash mismatch",
            Error::TransferAlreadyDefunded => "transfer already defunded",
            Error::NotResponder => "not transfer responder",
            Error::InitialStateMismatch => "initial state hash mismatch",
            Error::ResolvedBalanceMismatch => "resolved balance mismatch",
            Error::UnknownAsset => "unknown asset",
            Error::UnknownDefinition => "unknown transfer definition",
            Error::MalformedState => "malformed state",
            Error::InvalidAmount => "invalid amount",
            Error::InsufficientChannelFunds => "insufficient channel funds",
            Error::Overflow => "arithmetic overflow",
        }
    }
}

/// Two amounts of one asset: `[alice, bob]` in a channel state,
/// `[initiator, responder]` in a transfer.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Balance {
    pub bal_a: i128,
    pub bal_b: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Participant {
    /// Account that authorizes deposits and receives payouts.
    pub addr: Address,
    /// 20-byte secp256k1 address that signs channel states.
    pub signer: BytesN<20>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Params {
    pub a: Participant,
    pub b: Participant,
    pub nonce: BytesN<32>,
    pub timeout: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelState {
    pub channel_id: BytesN<32>,
    pub alice: BytesN<20>,
    pub bob: BytesN<20>,
    pub asset_ids: Vec<BytesN<32>>,
    pub balances: Vec<Balance>,
    pub processed_deposits_a: Vec<i128>,
    pub processed_deposits_b: Vec<i128>,
    pub defund_nonce: u64,
    pub timeout: u64,
    pub nonce: u64,
    pub merkle_root: BytesN<32>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferState {
    pub channel_id: BytesN<32>,
    pub transfer_id: BytesN<32>,
    pub transfer_definition: BytesN<32>,
    pub initiator: BytesN<20>,
    pub responder: BytesN<20>,
    pub asset_id: BytesN<32>,
    pub balance: Balance,
    pub transfer_timeout: u64,
    pub initial_state_hash: BytesN<32>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelDispute {
    pub channel_state_hash: BytesN<32>,
    pub nonce: u64,
    pub merkle_root: BytesN<32>,
    pub consensus_expiry: u64,
    pub defund_expiry: u64,
    pub defund_nonce: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferDispute {
    pub transfer_state_hash: BytesN<32>,
    pub transfer_dispute_expiry: u64,
    pub is_defunded: bool,
}

/// Per channel and asset: what each party deposited through the adjudicator
/// and what has been paid back out.
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DepositLedger {
    pub total_a: i128,
    pub total_b: i128,
    pub paid_out: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DataKey {
    Channel(BytesN<32>),
    Dispute(BytesN<32>),
    TransferDispute(BytesN<32>, BytesN<32>),
    Deposits(BytesN<32>, BytesN<32>),
    Asset(BytesN<32>),
    Definition(BytesN<32>),
}

/// Interface every transfer definition contract exposes. The returned split
/// must sum to the locked balance.
#[contractclient(name = "TransferDefinitionClient")]
pub trait TransferDefinition {
    fn resolve(env: Env, balance: Balance, initial_state: Bytes, resolver: Bytes) -> Balance;
}

#[contract]
pub struct Adjudicator;

const CHANNELS: Symbol = symbol_short!("CHANNELS");

const A: bool = false;

const B: bool = !A;

#[contractimpl]
impl Adjudicator {
    pub fn open(env: Env, params: Params) -> Result<BytesN<32>, Error> {
        // checks
        let cid = get_channel_id(&env, &params);
        let key = DataKey::Channel(cid.clone());
        if env.storage().persistent().has(&key) {
            return Err(Error::ChannelAlreadyExists);
        }

        // effects
        env.storage().persistent().set(&key, &params);
        env.events()
            .publish((CHANNELS, symbol_short!("open")), cid.clone());
        Ok(cid)
    }

    pub fn register_asset(env: Env, token: Address) -> BytesN<32> {
        register(&env, &token, DataKey::Asset)
    }

    pub fn register_definition(env: Env, definition: Address) -> BytesN<32> {
        register(&env, &definition, DataKey::Definition)
    }

    // We encode the actor index as bool. False is party A, true is party B.
    pub fn deposit(
        env: Env,
        channel_id: BytesN<32>,
        party_idx: bool,
        token: Address,
        amount: i128,
    ) -> Result<(), Error> {
        // checks
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }
        let params = get_params(&env, &channel_id)?;
        let asset_id = register(&env, &token, DataKey::Asset);
        let mut ledger = get_deposits(&env, &channel_id, &asset_id);
        let actor = match party_idx {
            A => {
                ledger.total_a = ledger.total_a.checked_add(amount).ok_or(Error::Overflow)?;
                params.a.addr
            }
            B => {
                ledger.total_b = ledger.total_b.checked_add(amount).ok_or(Error::Overflow)?;
                params.b.addr
            }
        };
        actor.require_auth();

        // effects
        set_deposits(&env, &channel_id, &asset_id, &ledger);

        // interact
        let contract = env.current_contract_address();
        let token_client = token::Client::new(&env, &token);
        token_client.transfer(&actor, &contract, &amount);
        env.events().publish(
            (CHANNELS, symbol_short!("deposit")),
            (channel_id, asset_id, party_idx, amount),
        );
        Ok(())
    }

    pub fn dispute_channel(
        env: Env,
        state: ChannelState,
        sig_a: BytesN<65>,
        sig_b: BytesN<65>,
    ) -> Result<(), Error> {
        // checks
        let params = get_params(&env, &state.channel_id)?;
        verify_identity(&params, &state)?;
        let state_hash = hash_state(&env, &state)?;
        if !commit::verify_signature(&state_hash, &sig_a, &params.a.signer) {
            return Err(Error::InvalidAliceSignature);
        }
        if !commit::verify_signature(&state_hash, &sig_b, &params.b.signer) {
            return Err(Error::InvalidBobSignature);
        }

        let now = current_block(&env);
        let mut dispute = match get_dispute(&env, &state.channel_id) {
            // Still in the consensus phase: only a newer state may replace
            // the stored one, and the expiries stay fixed.
            Some(dispute) if now < dispute.consensus_expiry => {
                if state.nonce <= dispute.nonce {
                    return Err(Error::StaleNonce);
                }
                dispute
            }
            Some(dispute) if now <= dispute.defund_expiry => {
                return Err(Error::ConsensusPhaseEnded);
            }
            Some(dispute) => {
                if state.nonce <= dispute.nonce {
                    return Err(Error::StaleNonce);
                }
                new_dispute(&env, now, state.timeout)?
            }
            None => new_dispute(&env, now, state.timeout)?,
        };

        // effects
        dispute.channel_state_hash = state_hash;
        dispute.nonce = state.nonce;
        dispute.merkle_root = state.merkle_root.clone();
        dispute.defund_nonce = state.defund_nonce.saturating_sub(1);
        set_dispute(&env, &state.channel_id, &dispute);

        log!(&env, "channel disputed", state.nonce, dispute.consensus_expiry);
        env.events().publish(
            (CHANNELS, symbol_short!("dispute")),
            (state.channel_id, dispute),
        );
        Ok(())
    }

    pub fn defund_channel(env: Env, state: ChannelState) -> Result<(), Error> {
        // checks
        let params = get_params(&env, &state.channel_id)?;
        verify_identity(&params, &state)?;
        let mut dispute =
            get_dispute(&env, &state.channel_id).ok_or(Error::NotInDefundPhase)?;
        if !in_defund_phase(&env, &dispute) {
            return Err(Error::NotInDefundPhase);
        }
        if hash_state(&env, &state)? != dispute.channel_state_hash {
            return Err(Error::HashMismatch);
        }
        if state.defund_nonce.checked_sub(1) != Some(dispute.defund_nonce) {
            return Err(Error::AlreadyDefunded);
        }

        let mut payouts = StdVec::new();
        for i in 0..state.asset_ids.len() {
            let asset_id = state.asset_ids.get(i).ok_or(Error::MalformedState)?;
            let balance = state.balances.get(i).ok_or(Error::MalformedState)?;
            let processed_a = state.processed_deposits_a.get(i).ok_or(Error::MalformedState)?;
            let processed_b = state.processed_deposits_b.get(i).ok_or(Error::MalformedState)?;
            let token = get_asset(&env, &asset_id)?;
            let mut ledger = get_deposits(&env, &state.channel_id, &asset_id);

            // Funds sent to the channel outside the signed protocol still
            // belong to whoever sent them.
            let amount_a = balance
                .bal_a
                .checked_add(unreconciled(ledger.total_a, processed_a))
                .ok_or(Error::Overflow)?;
            let amount_b = balance
                .bal_b
                .checked_add(unreconciled(ledger.total_b, processed_b))
                .ok_or(Error::Overflow)?;
            withdraw_from_ledger(&mut ledger, amount_a, amount_b)?;
            payouts.push((asset_id, token, ledger, amount_a, amount_b));
        }

        // effects
        dispute.defund_nonce = state.defund_nonce;
        set_dispute(&env, &state.channel_id, &dispute);
        for (asset_id, _, ledger, _, _) in payouts.iter() {
            set_deposits(&env, &state.channel_id, asset_id, ledger);
        }

        // interact
        let contract = env.current_contract_address();
        for (_, token, _, amount_a, amount_b) in payouts.iter() {
            let token_client = token::Client::new(&env, token);
            if *amount_a > 0 {
                token_client.transfer(&contract, &params.a.addr, amount_a);
            }
            if *amount_b > 0 {
                token_client.transfer(&contract, &params.b.addr, amount_b);
            }
        }
        log!(&env, "channel defunded", state.nonce, state.defund_nonce);
        env.events().publish(
            (CHANNELS, symbol_short!("defund")),
            (state.channel_id, state.defund_nonce),
        );
        Ok(())
    }

    pub fn dispute_transfer(
        env: Env,
        transfer: TransferState,
        proof: Vec<BytesN<32>>,
    ) -> Result<(), Error> {
        // checks
        let params = get_params(&env, &transfer.channel_id)?;
        verify_transfer_parties(&params, &transfer)?;
        let dispute =
            get_dispute(&env, &transfer.channel_id).ok_or(Error::NotInDefundPhase)?;
        let transfer_hash = hash_transfer(&env, &transfer)?;
        if !commit::verify_proof(&proof, &dispute.merkle_root, &transfer_hash) {
            return Err(Error::InvalidMerkleProof);
        }
        if !in_defund_phase(&env, &dispute) {
            return Err(Error::NotInDefundPhase);
        }
        let key = DataKey::TransferDispute(
            transfer.channel_id.clone(),
            transfer.transfer_id.clone(),
        );
        if env.storage().persistent().has(&key) {
            return Err(Error::TransferAlreadyDisputed);
        }

        // effects
        let transfer_dispute = TransferDispute {
            transfer_state_hash: transfer_hash,
            transfer_dispute_expiry: current_block(&env)
                .checked_add(transfer.transfer_timeout)
                .ok_or(Error::Overflow)?,
            is_defunded: false,
        };
        env.storage().persistent().set(&key, &transfer_dispute);
        env.events().publish(
            (CHANNELS, symbol_short!("tdispute")),
            (transfer.channel_id, transfer.transfer_id, transfer_dispute),
        );
        Ok(())
    }

    pub fn defund_transfer(
        env: Env,
        transfer: TransferState,
        initial_state: Bytes,
        resolver: Bytes,
        responder_signature: Option<BytesN<65>>,
    ) -> Result<(), Error> {
        // checks
        let params = get_params(&env, &transfer.channel_id)?;
        verify_transfer_parties(&params, &transfer)?;
        let key = DataKey::TransferDispute(
            transfer.channel_id.clone(),
            transfer.transfer_id.clone(),
        );
        let mut transfer_dispute: TransferDispute = env
            .storage()
            .persistent()
            .get(&key)
            .ok_or(Error::TransferNotDisputed)?;
        let transfer_hash = hash_transfer(&env, &transfer)?;
        if transfer_hash != transfer_dispute.transfer_state_hash {
            return Err(Error::TransferHashMismatch);
        }
        if transfer_dispute.is_defunded {
            return Err(Error::TransferAlreadyDefunded);
        }

        let outcome = if current_block(&env) < transfer_dispute.transfer_dispute_expiry {
            // Inside the window only the responder may resolve.
            authorize_responder(
                &env,
                &params,
                &transfer,
                &transfer_hash,
                &resolver,
                responder_signature,
            )?;
            if env.crypto().keccak256(&initial_state) != transfer.initial_state_hash {
                return Err(Error::InitialStateMismatch);
            }
            let definition: Address = env
                .storage()
                .persistent()
                .get(&DataKey::Definition(transfer.transfer_definition.clone()))
                .ok_or(Error::UnknownDefinition)?;
            let resolved = TransferDefinitionClient::new(&env, &definition).resolve(
                &transfer.balance,
                &initial_state,
                &resolver,
            );
            if resolved.bal_a < 0
                || resolved.bal_b < 0
                || resolved.bal_a.checked_add(resolved.bal_b)
                    != transfer.balance.bal_a.checked_add(transfer.balance.bal_b)
            {
                return Err(Error::ResolvedBalanceMismatch);
            }
            resolved
        } else {
            // Expired: anyone may cancel, returning the locked amounts.
            transfer.balance.clone()
        };

        let token = get_asset(&env, &transfer.asset_id)?;
        let mut ledger = get_deposits(&env, &transfer.channel_id, &transfer.asset_id);
        withdraw_from_ledger(&mut ledger, outcome.bal_a, outcome.bal_b)?;
        let initiator = account_of(&params, &transfer.initiator)?;
        let responder = account_of(&params, &transfer.responder)?;

        // effects
        transfer_dispute.is_defunded = true;
        env.storage().persistent().set(&key, &transfer_dispute);
        set_deposits(&env, &transfer.channel_id, &transfer.asset_id, &ledger);

        // interact
        let contract = env.current_contract_address();
        let token_client = token::Client::new(&env, &token);
        if outcome.bal_a > 0 {
            token_client.transfer(&contract, &initiator, &outcome.bal_a);
        }
        if outcome.bal_b > 0 {
            token_client.transfer(&contract, &responder, &outcome.bal_b);
        }
        env.events().publish(
            (CHANNELS, symbol_short!("tdefund")),
            (transfer.channel_id, transfer.transfer_id, outcome),
        );
        Ok(())
    }

    pub fn get_params(env: Env, channel_id: BytesN<32>) -> Result<Params, Error> {
        get_params(&env, &channel_id)
    }

    pub fn get_dispute(env: Env, channel_id: BytesN<32>) -> Option<ChannelDispute> {
        get_dispute(&env, &channel_id)
    }

    pub fn get_transfer_dispute(
        env: Env,
        channel_id: BytesN<32>,
        transfer_id: BytesN<32>,
    ) -> Option<TransferDispute> {
        env.storage()
            .persistent()
            .get(&DataKey::TransferDispute(channel_id, transfer_id))
    }

    pub fn get_deposits(env: Env, channel_id: BytesN<32>, asset_id: BytesN<32>) -> DepositLedger {
        get_deposits(&env, &channel_id, &asset_id)
    }

    pub fn hash_state(env: Env, state: ChannelState) -> Result<BytesN<32>, Error> {
        hash_state(&env, &state)
    }

    pub fn hash_transfer(env: Env, transfer: TransferState) -> Result<BytesN<32>, Error> {
        hash_transfer(&env, &transfer)
    }
}

// get_params returns the params of the channel with the given id or an error if it does not exist.
pub fn get_params(env: &Env, id: &BytesN<32>) -> Result<Params, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Channel(id.clone()))
        .ok_or(Error::ChannelNotFound)
}

pub fn get_dispute(env: &Env, id: &BytesN<32>) -> Option<ChannelDispute> {
    env.storage().persistent().get(&DataKey::Dispute(id.clone()))
}

pub fn set_dispute(env: &Env, id: &BytesN<32>, dispute: &ChannelDispute) {
    env.storage()
        .persistent()
        .set(&DataKey::Dispute(id.clone()), dispute);
}

// get_deposits returns the deposit ledger of a channel's asset, zeroed if
// nothing was deposited yet.
pub fn get_deposits(env: &Env, id: &BytesN<32>, asset_id: &BytesN<32>) -> DepositLedger {
    env.storage()
        .persistent()
        .get(&DataKey::Deposits(id.clone(), asset_id.clone()))
        .unwrap_or_default()
}

pub fn set_deposits(env: &Env, id: &BytesN<32>, asset_id: &BytesN<32>, ledger: &DepositLedger) {
    env.storage()
        .persistent()
        .set(&DataKey::Deposits(id.clone(), asset_id.clone()), ledger);
}

pub fn get_asset(env: &Env, asset_id: &BytesN<32>) -> Result<Address, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Asset(asset_id.clone()))
        .ok_or(Error::UnknownAsset)
}

// register stores `addr` under its content-derived id. Re-registering is a no-op.
fn register(env: &Env, addr: &Address, key: fn(BytesN<32>) -> DataKey) -> BytesN<32> {
    let id = address_id(env, addr);
    let key = key(id.clone());
    if !env.storage().persistent().has(&key) {
        env.storage().persistent().set(&key, addr);
    }
    id
}

pub fn get_channel_id(env: &Env, params: &Params) -> BytesN<32> {
    let data = params.clone().to_xdr(env);
    env.crypto().sha256(&data)
}

pub fn current_block(env: &Env) -> u64 {
    u64::from(env.ledger().sequence())
}

// new_dispute opens fresh consensus and defund windows starting at `now`.
fn new_dispute(env: &Env, now: u64, timeout: u64) -> Result<ChannelDispute, Error> {
    let consensus_expiry = now.checked_add(timeout).ok_or(Error::Overflow)?;
    let defund_expiry = consensus_expiry.checked_add(timeout).ok_or(Error::Overflow)?;
    Ok(ChannelDispute {
        channel_state_hash: BytesN::from_array(env, &[0; 32]),
        nonce: 0,
        merkle_root: BytesN::from_array(env, &[0; 32]),
        consensus_expiry,
        defund_expiry,
        defund_nonce: 0,
    })
}

pub fn in_defund_phase(env: &Env, dispute: &ChannelDispute) -> bool {
    let now = current_block(env);
    dispute.consensus_expiry <= now && now <= dispute.defund_expiry
}

pub fn verify_identity(params: &Params, state: &ChannelState) -> Result<(), Error> {
    if state.alice != params.a.signer || state.bob != params.b.signer {
        return Err(Error::IdentityMismatch);
    }
    // The dispute timeout is fixed when the channel is opened.
    if state.timeout != params.timeout {
        return Err(Error::IdentityMismatch);
    }
    Ok(())
}

fn verify_transfer_parties(params: &Params, transfer: &TransferState) -> Result<(), Error> {
    let forward = transfer.initiator == params.a.signer && transfer.responder == params.b.signer;
    let backward = transfer.initiator == params.b.signer && transfer.responder == params.a.signer;
    if !forward && !backward {
        return Err(Error::IdentityMismatch);
    }
    Ok(())
}

fn account_of(params: &Params, signer: &BytesN<20>) -> Result<Address, Error> {
    if *signer == params.a.signer {
        Ok(params.a.addr.clone())
    } else if *signer == params.b.signer {
        Ok(params.b.addr.clone())
    } else {
        Err(Error::IdentityMismatch)
    }
}

fn authorize_responder(
    env: &Env,
    params: &Params,
    transfer: &TransferState,
    transfer_hash: &BytesN<32>,
    resolver: &Bytes,
    responder_signature: Option<BytesN<65>>,
) -> Result<(), Error> {
    match responder_signature {
        Some(sig) => {
            let digest = commit::responder_digest(env, transfer_hash, resolver);
            if !commit::verify_signature(&digest, &sig, &transfer.responder) {
                return Err(Error::NotResponder);
            }
        }
        None => account_of(params, &transfer.responder)?.require_auth(),
    }
    Ok(())
}

fn unreconciled(total: i128, processed: i128) -> i128 {
    if total > processed {
        total - processed
    } else {
        0
    }
}

// withdraw_from_ledger books a payout against the channel's holdings of one asset.
fn withdraw_from_ledger(
    ledger: &mut DepositLedger,
    amount_a: i128,
    amount_b: i128,
) -> Result<(), Error> {
    if amount_a < 0 || amount_b < 0 {
        return Err(Error::InvalidAmount);
    }
    let total = amount_a.checked_add(amount_b).ok_or(Error::Overflow)?;
    let holdings = ledger
        .total_a
        .checked_add(ledger.total_b)
        .and_then(|deposited| deposited.checked_sub(ledger.paid_out))
        .ok_or(Error::Overflow)?;
    if total > holdings {
        return Err(Error::InsufficientChannelFunds);
    }
    ledger.paid_out = ledger.paid_out.checked_add(total).ok_or(Error::Overflow)?;
    Ok(())
}

#[cfg(test)]
mod test;
