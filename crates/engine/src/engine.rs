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

//! The per-party channel engine.
//!
//! One engine runs per party. It is the only writer of that party's channel
//! records. Every mutation of a channel happens under that channel's lock:
//! local proposals wait for it, inbound updates fail fast with
//! [`EngineError::ChannelBusy`] so two parties proposing at once cannot
//! block each other. Different channels never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use alloy_primitives::{keccak256, Address, B256};
use duet_types::{
    merkle_proof, responder_auth_digest, verify, Balance, ChannelSigner, CoreChannelState,
    CoreTransferState,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::chain::{ChainService, TxReceipt};
use crate::config::EngineConfig;
use crate::definitions::DefinitionRegistry;
use crate::error::{EngineError, EngineResult};
use crate::messaging::Messenger;
use crate::store::ChannelStore;
use crate::update::{
    apply_update, transfer_id, transfers_root, ChannelRecord, ChannelUpdate, FullTransferState,
    SignedChannelState, UpdateDetails,
};

pub struct ChannelEngine {
    signer: ChannelSigner,
    store: Arc<dyn ChannelStore>,
    chain: Arc<dyn ChainService>,
    messenger: Arc<dyn Messenger>,
    definitions: DefinitionRegistry,
    config: EngineConfig,
    locks: StdMutex<HashMap<B256, Arc<Mutex<()>>>>,
}

impl ChannelEngine {
    pub fn new(
        signer: ChannelSigner,
        store: Arc<dyn ChannelStore>,
        chain: Arc<dyn ChainService>,
        messenger: Arc<dyn Messenger>,
        definitions: DefinitionRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            signer,
            store,
            chain,
            messenger,
            definitions,
            config,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// The address this engine signs as.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn get_channel(&self, channel: &B256) -> EngineResult<Option<ChannelRecord>> {
        Ok(self.store.load(channel).await?)
    }

    /// Opens the channel off-chain with the caller as alice.
    ///
    /// `channel_address` is the id the adjudicator assigned on `open`, and
    /// `timeout` must be the one the channel was opened with: the adjudicator
    /// refuses states carrying any other.
    pub async fn setup(
        &self,
        channel_address: B256,
        counterparty: Address,
        timeout: Option<u64>,
    ) -> EngineResult<SignedChannelState> {
        let lock = self.channel_lock(&channel_address);
        let _guard = self.acquire(&lock).await?;

        if self.store.load(&channel_address).await?.is_some() {
            return Err(EngineError::ChannelExists(hex::encode(channel_address)));
        }
        let base = CoreChannelState::empty(channel_address, self.address(), counterparty, 0);
        let details = UpdateDetails::Setup {
            timeout: timeout.unwrap_or(self.config.default_timeout),
        };
        self.propose_locked(base, Vec::new(), details).await
    }

    /// Reconciles the adjudicator's deposit totals for `asset_id` into the balances.
    pub async fn deposit(
        &self,
        channel: &B256,
        asset_id: B256,
    ) -> EngineResult<SignedChannelState> {
        let lock = self.channel_lock(channel);
        let _guard = self.acquire(&lock).await?;

        let record = self.load(channel).await?;
        let totals = self.chain.total_deposits(channel, &asset_id).await?;
        let details = UpdateDetails::Deposit {
            asset_id,
            total_deposits_a: totals.alice,
            total_deposits_b: totals.bob,
        };
        self.propose_locked(record.latest.state, record.transfers, details)
            .await
    }

    /// Moves `amount` of `asset_id` to the counterparty.
    pub async fn pay(
        &self,
        channel: &B256,
        asset_id: B256,
        amount: u128,
    ) -> EngineResult<SignedChannelState> {
        let lock = self.channel_lock(channel);
        let _guard = self.acquire(&lock).await?;

        let record = self.load(channel).await?;
        let details = UpdateDetails::Payment { asset_id, amount };
        self.propose_locked(record.latest.state, record.transfers, details)
            .await
    }

    /// Locks `balance` (`[ours, theirs]`) into a transfer governed by `definition_id`.
    pub async fn create_transfer(
        &self,
        channel: &B256,
        definition_id: B256,
        asset_id: B256,
        balance: Balance,
        initial_state: Vec<u8>,
    ) -> EngineResult<CoreTransferState> {
        let lock = self.channel_lock(channel);
        let _guard = self.acquire(&lock).await?;

        let record = self.load(channel).await?;
        let state = &record.latest.state;
        let me = state.party_of(&self.address()).ok_or(EngineError::NotParticipant)?;
        let definition = self
            .definitions
            .get(&definition_id)
            .ok_or_else(|| EngineError::UnknownDefinition(hex::encode(definition_id)))?;
        let initial_state_hash = keccak256(&initial_state);
        let transfer = CoreTransferState {
            channel_address: state.channel_address,
            transfer_id: transfer_id(
                &state.channel_address,
                state.nonce.saturating_add(1),
                &initial_state_hash,
            ),
            transfer_definition: definition_id,
            initiator: self.address(),
            responder: state.signer_of(me.counterparty()),
            asset_id,
            balance,
            transfer_timeout: definition.transfer_timeout(),
            initial_state_hash,
        };
        let details = UpdateDetails::Create {
            transfer: transfer.clone(),
            initial_state,
        };
        self.propose_locked(record.latest.state, record.transfers, details)
            .await?;
        Ok(transfer)
    }

    /// Settles a transfer this party is the responder of.
    pub async fn resolve_transfer(
        &self,
        channel: &B256,
        transfer_id: B256,
        resolver: Vec<u8>,
    ) -> EngineResult<SignedChannelState> {
        let lock = self.channel_lock(channel);
        let _guard = self.acquire(&lock).await?;

        let record = self.load(channel).await?;
        let details = UpdateDetails::Resolve {
            transfer_id,
            resolver,
        };
        self.propose_locked(record.latest.state, record.transfers, details)
            .await
    }

    /// Validates, counter-signs and persists an update from the counterparty.
    ///
    /// A redelivered update that was already applied returns the stored
    /// dual-signed update without touching state.
    pub async fn receive_update(&self, update: ChannelUpdate) -> EngineResult<ChannelUpdate> {
        let channel = update.channel_address;
        let lock = self.channel_lock(&channel);
        let _guard = lock.try_lock().map_err(|_| EngineError::ChannelBusy)?;

        let nonce = update.nonce;
        match self.apply_inbound(update).await {
            Ok(applied) => Ok(applied),
            Err(e) => {
                warn!(
                    channel = %hex::encode(channel),
                    nonce,
                    error = %e,
                    "rejected inbound update"
                );
                Err(e)
            }
        }
    }

    /// Adopts a newer dual-signed state from the counterparty after a lost update.
    pub async fn sync_channel(
        &self,
        latest: SignedChannelState,
        transfers: Vec<FullTransferState>,
    ) -> EngineResult<()> {
        let channel = latest.state.channel_address;
        let lock = self.channel_lock(&channel);
        let _guard = self.acquire(&lock).await?;

        let record = self.load(&channel).await?;
        if latest.state.nonce <= record.nonce() {
            return Err(EngineError::StaleUpdate {
                local: record.nonce(),
                proposed: latest.state.nonce,
            });
        }
        if !latest.state.same_identity(&record.latest.state) {
            return Err(EngineError::IdentityMismatch);
        }
        latest.state.validate()?;
        latest.verify()?;
        if transfers_root(&transfers) != latest.state.merkle_root {
            return Err(EngineError::MerkleRootMismatch);
        }
        for transfer in &transfers {
            if transfer.core.channel_address != channel {
                return Err(EngineError::InvalidTransfer("wrong channel"));
            }
            if keccak256(&transfer.initial_state) != transfer.core.initial_state_hash {
                return Err(EngineError::InitialStateHashMismatch);
            }
        }

        let from = record.nonce();
        let to = latest.state.nonce;
        self.store
            .save(&ChannelRecord {
                latest,
                transfers,
                latest_update: None,
            })
            .await?;
        info!(channel = %hex::encode(channel), from, to, "channel resynced");
        Ok(())
    }

    /// Submits the latest dual-signed state to the adjudicator.
    pub async fn dispute_channel(&self, channel: &B256) -> EngineResult<TxReceipt> {
        let record = self.load(channel).await?;
        let receipt = self.chain.dispute_channel(&record.latest).await?;
        info!(
            channel = %hex::encode(channel),
            nonce = record.nonce(),
            block = receipt.block_number,
            "channel dispute submitted"
        );
        Ok(receipt)
    }

    /// Pays out the disputed channel. Refused locally while the ledger is
    /// outside the dispute's defund phase.
    pub async fn defund_channel(&self, channel: &B256) -> EngineResult<TxReceipt> {
        let record = self.load(channel).await?;
        let window = self
            .chain
            .channel_dispute(channel)
            .await?
            .ok_or_else(|| EngineError::NotDisputed(hex::encode(channel)))?;
        let now = self.chain.block_number().await?;
        if !window.in_defund_phase(now) {
            return Err(EngineError::NotInDefundPhase {
                now,
                opens: window.consensus_expiry,
                closes: window.defund_expiry,
            });
        }
        let receipt = self.chain.defund_channel(&record.latest.state).await?;
        info!(
            channel = %hex::encode(channel),
            defund_nonce = record.latest.state.defund_nonce,
            block = receipt.block_number,
            "channel defunded"
        );
        Ok(receipt)
    }

    /// Disputes an active transfer, proving it against the stored merkle root.
    pub async fn dispute_transfer(
        &self,
        channel: &B256,
        transfer_id: &B256,
    ) -> EngineResult<TxReceipt> {
        let record = self.load(channel).await?;
        let transfer = record
            .transfer(transfer_id)
            .ok_or_else(|| EngineError::TransferNotFound(hex::encode(transfer_id)))?;
        let leaves: Vec<B256> = record.transfers.iter().map(|t| t.core.hash()).collect();
        let proof = merkle_proof(&leaves, &transfer.core.hash())
            .ok_or_else(|| EngineError::TransferNotFound(hex::encode(transfer_id)))?;
        let receipt = self.chain.dispute_transfer(&transfer.core, &proof).await?;
        info!(
            channel = %hex::encode(channel),
            transfer = %hex::encode(transfer_id),
            block = receipt.block_number,
            "transfer dispute submitted"
        );
        Ok(receipt)
    }

    /// Defunds a disputed transfer.
    ///
    /// With a `resolver`, this party must be the responder; it signs the
    /// resolution so anyone may relay the call. Without one, the call is a
    /// cancel that only succeeds once the transfer's dispute window expired.
    pub async fn defund_transfer(
        &self,
        channel: &B256,
        transfer_id: &B256,
        resolver: Option<Vec<u8>>,
    ) -> EngineResult<TxReceipt> {
        let record = self.load(channel).await?;
        let transfer = record
            .transfer(transfer_id)
            .ok_or_else(|| EngineError::TransferNotFound(hex::encode(transfer_id)))?;
        let (resolver, responder_signature) = match resolver {
            Some(resolver) => {
                if transfer.core.responder != self.address() {
                    return Err(EngineError::NotResponder);
                }
                let digest = responder_auth_digest(&transfer.core.hash(), &resolver);
                let signature = self.signer.sign(&digest)?;
                (resolver, Some(signature))
            }
            None => (Vec::new(), None),
        };
        let receipt = self
            .chain
            .defund_transfer(
                &transfer.core,
                &transfer.initial_state,
                &resolver,
                responder_signature,
            )
            .await?;
        info!(
            channel = %hex::encode(channel),
            transfer = %hex::encode(transfer_id),
            block = receipt.block_number,
            "transfer defunded"
        );
        Ok(receipt)
    }

    /// Number of channels with an operation holding or waiting for their lock.
    pub fn active_locks(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        prune_idle(&mut locks);
        locks.len()
    }

    fn channel_lock(&self, channel: &B256) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        prune_idle(&mut locks);
        locks.entry(*channel).or_default().clone()
    }

    async fn acquire<'a>(&self, lock: &'a Mutex<()>) -> EngineResult<MutexGuard<'a, ()>> {
        match self.config.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, lock.lock())
                .await
                .map_err(|_| EngineError::LockTimeout),
            None => Ok(lock.lock().await),
        }
    }

    async fn load(&self, channel: &B256) -> EngineResult<ChannelRecord> {
        self.store
            .load(channel)
            .await?
            .ok_or_else(|| EngineError::ChannelNotFound(hex::encode(channel)))
    }

    // propose_locked must be called with the channel lock held. Nothing is
    // persisted unless the counterparty's signature checks out.
    async fn propose_locked(
        &self,
        base: CoreChannelState,
        transfers: Vec<FullTransferState>,
        details: UpdateDetails,
    ) -> EngineResult<SignedChannelState> {
        let me = base.party_of(&self.address()).ok_or(EngineError::NotParticipant)?;
        let them = me.counterparty();
        let counterparty = base.signer_of(them);
        let (state, next_transfers) =
            apply_update(&base, &transfers, me, &details, &self.definitions)?;
        let hash = state.hash();

        let kind = details.kind();
        let mut update = ChannelUpdate {
            channel_address: base.channel_address,
            from: self.address(),
            to: counterparty,
            nonce: state.nonce,
            details,
            state,
            alice_signature: None,
            bob_signature: None,
        };
        update.set_signature(me, self.signer.sign(&hash)?);
        debug!(
            channel = %hex::encode(update.channel_address),
            nonce = update.nonce,
            kind,
            "proposing update"
        );

        let reply = self.messenger.send_update(&counterparty, update.clone()).await?;
        let reply_hash = reply.state.hash();
        if reply_hash != hash {
            return Err(EngineError::StateMismatch {
                expected: hex::encode(hash),
                actual: hex::encode(reply_hash),
            });
        }
        let their_signature = *reply
            .signature_of(them)
            .ok_or(EngineError::InvalidSignature { party: them })?;
        if !verify(&their_signature, &hash, &counterparty) {
            return Err(EngineError::InvalidSignature { party: them });
        }
        update.set_signature(them, their_signature);
        let signed = update
            .signed_state()
            .ok_or(EngineError::InvalidUpdate("missing signature"))?;

        self.store
            .save(&ChannelRecord {
                latest: signed.clone(),
                transfers: next_transfers,
                latest_update: Some(update),
            })
            .await?;
        info!(
            channel = %hex::encode(signed.state.channel_address),
            nonce = signed.state.nonce,
            kind,
            "update applied"
        );
        Ok(signed)
    }

    async fn apply_inbound(&self, mut update: ChannelUpdate) -> EngineResult<ChannelUpdate> {
        let channel = update.channel_address;
        if update.to != self.address() {
            return Err(EngineError::NotParticipant);
        }
        if update.nonce != update.state.nonce || channel != update.state.channel_address {
            return Err(EngineError::InvalidUpdate("envelope does not match state"));
        }

        let (base, transfers) = match (&update.details, self.store.load(&channel).await?) {
            (UpdateDetails::Setup { .. }, None) => (
                CoreChannelState::empty(channel, update.state.alice, update.state.bob, 0),
                Vec::new(),
            ),
            (_, None) => return Err(EngineError::ChannelNotFound(hex::encode(channel))),
            (_, Some(record)) => {
                if let Some(applied) = &record.latest_update {
                    if update.nonce == record.nonce()
                        && applied.state.hash() == update.state.hash()
                    {
                        debug!(
                            channel = %hex::encode(channel),
                            nonce = update.nonce,
                            "duplicate update, returning stored copy"
                        );
                        return Ok(applied.clone());
                    }
                }
                let local = record.nonce();
                if update.nonce <= local {
                    return Err(EngineError::StaleUpdate {
                        local,
                        proposed: update.nonce,
                    });
                }
                if update.nonce > local.saturating_add(1) {
                    return Err(EngineError::OutOfSync {
                        local,
                        proposed: update.nonce,
                    });
                }
                (record.latest.state, record.transfers)
            }
        };

        if !update.state.same_identity(&base) {
            return Err(EngineError::IdentityMismatch);
        }
        let from = base.party_of(&update.from).ok_or(EngineError::NotParticipant)?;
        if base.signer_of(from.counterparty()) != self.address() {
            return Err(EngineError::NotParticipant);
        }

        if let UpdateDetails::Deposit {
            asset_id,
            total_deposits_a,
            total_deposits_b,
        } = &update.details
        {
            if self.config.verify_deposits_onchain {
                let totals = self.chain.total_deposits(&channel, asset_id).await?;
                if *total_deposits_a > totals.alice || *total_deposits_b > totals.bob {
                    return Err(EngineError::DepositExceedsOnchain);
                }
            }
        }

        let (expected, next_transfers) =
            apply_update(&base, &transfers, from, &update.details, &self.definitions)?;
        let hash = expected.hash();
        let proposed = update.state.hash();
        if hash != proposed {
            return Err(EngineError::StateMismatch {
                expected: hex::encode(hash),
                actual: hex::encode(proposed),
            });
        }
        let their_signature = update
            .signature_of(from)
            .ok_or(EngineError::InvalidSignature { party: from })?;
        if !verify(their_signature, &hash, &update.from) {
            return Err(EngineError::InvalidSignature { party: from });
        }

        update.set_signature(from.counterparty(), self.signer.sign(&hash)?);
        let signed = update
            .signed_state()
            .ok_or(EngineError::InvalidUpdate("missing signature"))?;
        self.store
            .save(&ChannelRecord {
                latest: signed,
                transfers: next_transfers,
                latest_update: Some(update.clone()),
            })
            .await?;
        info!(
            channel = %hex::encode(channel),
            nonce = update.nonce,
            kind = update.details.kind(),
            "counter-signed update"
        );
        Ok(update)
    }
}

// An entry only the map refers to has no holder and no waiter.
fn prune_idle(locks: &mut HashMap<B256, Arc<Mutex<()>>>) {
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
}
