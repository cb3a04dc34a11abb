#![cfg(test)]

use duet_types::{merkle_proof, merkle_root, responder_auth_digest, ChannelSigner, B256};
use k256::ecdsa::SigningKey;
use rand::thread_rng;
use soroban_sdk::testutils::{Address as _, Ledger as _};
use soroban_sdk::token::{Client as TokenClient, StellarAssetClient};
use soroban_sdk::{contract, contractimpl, vec, Address, Bytes, BytesN, Env, Vec};

use super::{
    Adjudicator, AdjudicatorClient, Balance, ChannelDispute, ChannelState, DepositLedger, Error,
    Params, Participant, TransferState,
};

const A: bool = false;
const B: bool = true;
const START: u32 = 10;
const MINTED: i128 = 1000;

/// Pays the responder when the resolver opens the keccak256 lock held in the
/// initial state; anything else leaves the balance unchanged.
#[contract]
pub struct HashlockResolver;

#[contractimpl]
impl HashlockResolver {
    pub fn resolve(env: Env, balance: Balance, initial_state: Bytes, resolver: Bytes) -> Balance {
        let lock = Bytes::from_array(&env, &env.crypto().keccak256(&resolver).to_array());
        if resolver.is_empty() || lock != initial_state {
            return balance;
        }
        Balance {
            bal_a: 0,
            bal_b: balance.bal_a + balance.bal_b,
        }
    }
}

struct Setup {
    env: Env,
    client: AdjudicatorClient<'static>,
    params: Params,
    cid: BytesN<32>,
    key_alice: ChannelSigner,
    key_bob: ChannelSigner,
    token: Address,
    asset_id: BytesN<32>,
}

impl Setup {
    fn new(timeout: u64) -> Self {
        let env = Env::default();
        env.mock_all_auths();
        at(&env, START);
        let client = AdjudicatorClient::new(&env, &env.register_contract(None, Adjudicator));
        let key_alice = generate_signer();
        let key_bob = generate_signer();
        let params = Params {
            a: Participant {
                addr: Address::generate(&env),
                signer: eth_address(&env, &key_alice),
            },
            b: Participant {
                addr: Address::generate(&env),
                signer: eth_address(&env, &key_bob),
            },
            nonce: BytesN::from_array(&env, &[7; 32]),
            timeout,
        };
        let cid = client.open(&params);
        let (token, asset_id) = new_token(&env, &client, &params);
        Setup {
            env,
            client,
            params,
            cid,
            key_alice,
            key_bob,
            token,
            asset_id,
        }
    }

    fn new_token(&self) -> (Address, BytesN<32>) {
        new_token(&self.env, &self.client, &self.params)
    }

    fn deposit(&self, party: bool, token: &Address, amount: i128) {
        self.client.deposit(&self.cid, &party, token, &amount);
    }

    fn balance_of(&self, token: &Address, addr: &Address) -> i128 {
        TokenClient::new(&self.env, token).balance(addr)
    }

    /// Single-asset state with defund nonce 1 and no transfers.
    fn state(&self, nonce: u64, bal: (i128, i128), processed: (i128, i128)) -> ChannelState {
        ChannelState {
            channel_id: self.cid.clone(),
            alice: self.params.a.signer.clone(),
            bob: self.params.b.signer.clone(),
            asset_ids: vec![&self.env, self.asset_id.clone()],
            balances: vec![
                &self.env,
                Balance {
                    bal_a: bal.0,
                    bal_b: bal.1,
                }
            ],
            processed_deposits_a: vec![&self.env, processed.0],
            processed_deposits_b: vec![&self.env, processed.1],
            defund_nonce: 1,
            timeout: self.params.timeout,
            nonce,
            merkle_root: BytesN::from_array(&self.env, &[0; 32]),
        }
    }

    fn sign(&self, key: &ChannelSigner, state: &ChannelState) -> BytesN<65> {
        sign_digest(&self.env, key, &self.client.hash_state(state))
    }

    fn dispute(&self, state: &ChannelState) {
        self.client.dispute_channel(
            state,
            &self.sign(&self.key_alice, state),
            &self.sign(&self.key_bob, state),
        );
    }

    fn try_dispute(&self, state: &ChannelState) -> Result<(), Error> {
        match self.client.try_dispute_channel(
            state,
            &self.sign(&self.key_alice, state),
            &self.sign(&self.key_bob, state),
        ) {
            Ok(_) => Ok(()),
            Err(Ok(err)) => Err(err),
            Err(Err(_)) => panic!("invocation failed"),
        }
    }

    fn try_defund(&self, state: &ChannelState) -> Result<(), Error> {
        match self.client.try_defund_channel(state) {
            Ok(_) => Ok(()),
            Err(Ok(err)) => Err(err),
            Err(Err(_)) => panic!("invocation failed"),
        }
    }

    fn dispute_record(&self) -> ChannelDispute {
        self.client.get_dispute(&self.cid).unwrap()
    }
}

// new_token deploys a stellar asset, funds both parties and registers it with the adjudicator.
fn new_token(env: &Env, client: &AdjudicatorClient, params: &Params) -> (Address, BytesN<32>) {
    let token = env.register_stellar_asset_contract(Address::generate(env));
    let minter = StellarAssetClient::new(env, &token);
    minter.mint(&params.a.addr, &MINTED);
    minter.mint(&params.b.addr, &MINTED);
    let asset_id = client.register_asset(&token);
    (token, asset_id)
}

fn at(env: &Env, sequence: u32) {
    env.ledger().with_mut(|li| li.sequence_number = sequence);
}

fn generate_signer() -> ChannelSigner {
    ChannelSigner::init_from_key(SigningKey::random(&mut thread_rng()))
}

fn eth_address(env: &Env, key: &ChannelSigner) -> BytesN<20> {
    BytesN::from_array(env, &key.address().0 .0)
}

fn sign_digest(env: &Env, key: &ChannelSigner, digest: &BytesN<32>) -> BytesN<65> {
    let sig = key.sign(&B256::from(digest.to_array())).unwrap();
    BytesN::from_array(env, &sig.0)
}

#[test]
fn open_registers_channel_once() {
    let s = Setup::new(2);
    assert_eq!(s.client.get_params(&s.cid), s.params);
    assert_eq!(
        s.client.try_open(&s.params),
        Err(Ok(Error::ChannelAlreadyExists))
    );
    assert_eq!(s.client.get_dispute(&s.cid), None);
}

#[test]
fn deposits_are_recorded_per_party() {
    let s = Setup::new(2);
    s.deposit(A, &s.token, 30);
    s.deposit(B, &s.token, 12);
    s.deposit(B, &s.token, 8);
    assert_eq!(
        s.client.get_deposits(&s.cid, &s.asset_id),
        DepositLedger {
            total_a: 30,
            total_b: 20,
            paid_out: 0
        }
    );
    assert_eq!(s.balance_of(&s.token, &s.params.a.addr), MINTED - 30);
    assert_eq!(
        s.balance_of(&s.token, &s.client.address),
        50
    );

    assert_eq!(
        s.client.try_deposit(&s.cid, &A, &s.token, &0),
        Err(Ok(Error::InvalidAmount))
    );
    let unknown = BytesN::from_array(&s.env, &[9; 32]);
    assert_eq!(
        s.client.try_deposit(&unknown, &A, &s.token, &1),
        Err(Ok(Error::ChannelNotFound))
    );
}

#[test]
fn dispute_records_expiries() {
    let s = Setup::new(2);
    let state = s.state(3, (17, 45), (0, 62));
    s.dispute(&state);

    let dispute = s.dispute_record();
    assert_eq!(dispute.channel_state_hash, s.client.hash_state(&state));
    assert_eq!(dispute.nonce, 3);
    assert_eq!(dispute.consensus_expiry, START as u64 + 2);
    assert_eq!(dispute.defund_expiry, START as u64 + 4);
    assert_eq!(dispute.defund_nonce, 0);
}

#[test]
fn dispute_rejects_identity_mismatch() {
    let s = Setup::new(2);
    let mut state = s.state(3, (17, 45), (0, 62));
    state.alice = eth_address(&s.env, &generate_signer());
    assert_eq!(s.try_dispute(&state), Err(Error::IdentityMismatch));

    let mut state = s.state(3, (17, 45), (0, 62));
    state.channel_id = BytesN::from_array(&s.env, &[1; 32]);
    assert_eq!(s.try_dispute(&state), Err(Error::ChannelNotFound));

    // A shorter timeout than the one the channel was opened with.
    let mut state = s.state(3, (17, 45), (0, 62));
    state.timeout = 1;
    assert_eq!(s.try_dispute(&state), Err(Error::IdentityMismatch));
    assert_eq!(s.client.get_dispute(&s.cid), None);
}

#[test]
fn dispute_rejects_invalid_signatures() {
    let s = Setup::new(2);
    let state = s.state(3, (17, 45), (0, 62));
    let by_alice = s.sign(&s.key_alice, &state);
    let by_bob = s.sign(&s.key_bob, &state);

    assert_eq!(
        s.client.try_dispute_channel(&state, &by_bob, &by_bob),
        Err(Ok(Error::InvalidAliceSignature))
    );
    assert_eq!(
        s.client.try_dispute_channel(&state, &by_alice, &by_alice),
        Err(Ok(Error::InvalidBobSignature))
    );
    let garbage = BytesN::from_array(&s.env, &[0xff; 65]);
    assert_eq!(
        s.client.try_dispute_channel(&state, &garbage, &by_bob),
        Err(Ok(Error::InvalidAliceSignature))
    );
    assert_eq!(s.client.get_dispute(&s.cid), None);
}

#[test]
fn dispute_rejects_stale_nonce() {
    let s = Setup::new(2);
    let state = s.state(3, (17, 45), (0, 62));
    s.dispute(&state);
    assert_eq!(s.try_dispute(&state), Err(Error::StaleNonce));
    assert_eq!(
        s.try_dispute(&s.state(2, (17, 45), (0, 62))),
        Err(Error::StaleNonce)
    );
}

#[test]
fn newer_state_advances_dispute_in_place() {
    let s = Setup::new(2);
    s.dispute(&s.state(3, (17, 45), (0, 62)));
    let first = s.dispute_record();

    at(&s.env, START + 1);
    let newer = s.state(4, (20, 42), (0, 62));
    s.dispute(&newer);

    let advanced = s.dispute_record();
    assert_eq!(advanced.nonce, 4);
    assert_eq!(advanced.channel_state_hash, s.client.hash_state(&newer));
    assert_eq!(advanced.consensus_expiry, first.consensus_expiry);
    assert_eq!(advanced.defund_expiry, first.defund_expiry);
}

#[test]
fn dispute_rejected_once_consensus_phase_ended() {
    let s = Setup::new(2);
    s.dispute(&s.state(3, (17, 45), (0, 62)));
    at(&s.env, START + 2);
    assert_eq!(
        s.try_dispute(&s.state(4, (17, 45), (0, 62))),
        Err(Error::ConsensusPhaseEnded)
    );
    assert_eq!(
        Error::ConsensusPhaseEnded.reason(),
        "not allowed once consensus phase has ended"
    );
}

#[test]
fn defund_only_inside_defund_phase() {
    let s = Setup::new(2);
    s.deposit(B, &s.token, 62);
    let state = s.state(3, (17, 45), (0, 62));
    s.dispute(&state);

    at(&s.env, START + 1);
    assert_eq!(s.try_defund(&state), Err(Error::NotInDefundPhase));

    at(&s.env, START + 3);
    s.client.defund_channel(&state);
    assert_eq!(s.balance_of(&s.token, &s.params.a.addr), MINTED + 17);
    assert_eq!(s.balance_of(&s.token, &s.params.b.addr), MINTED - 62 + 45);
    assert_eq!(s.dispute_record().defund_nonce, 1);
    assert_eq!(s.try_defund(&state), Err(Error::AlreadyDefunded));

    at(&s.env, START + 5);
    assert_eq!(s.try_defund(&state), Err(Error::NotInDefundPhase));
}

#[test]
fn defund_phase_bounds_are_inclusive() {
    let opening = Setup::new(2);
    let state = opening.state(3, (17, 45), (0, 62));
    opening.deposit(B, &opening.token, 62);
    opening.dispute(&state);
    at(&opening.env, START + 2);
    opening.client.defund_channel(&state);
    assert_eq!(opening.dispute_record().defund_nonce, 1);

    let closing = Setup::new(2);
    let state = closing.state(3, (17, 45), (0, 62));
    closing.deposit(B, &closing.token, 62);
    closing.dispute(&state);
    at(&closing.env, START + 4);
    closing.client.defund_channel(&state);
    assert_eq!(closing.dispute_record().defund_nonce, 1);
    assert_eq!(
        closing.balance_of(&closing.token, &closing.params.b.addr),
        MINTED - 62 + 45
    );
}

#[test]
fn defund_requires_dispute() {
    let s = Setup::new(2);
    assert_eq!(
        s.try_defund(&s.state(3, (17, 45), (0, 62))),
        Err(Error::NotInDefundPhase)
    );
}

#[test]
fn defund_rejects_hash_mismatch() {
    let s = Setup::new(2);
    s.dispute(&s.state(3, (17, 45), (0, 62)));
    at(&s.env, START + 2);
    assert_eq!(
        s.try_defund(&s.state(652, (17, 45), (0, 62))),
        Err(Error::HashMismatch)
    );
}

#[test]
fn defund_rejects_non_incrementing_defund_nonce() {
    let s = Setup::new(2);
    let mut state = s.state(3, (17, 45), (0, 62));
    state.defund_nonce = 0;
    s.dispute(&state);
    at(&s.env, START + 2);
    assert_eq!(s.try_defund(&state), Err(Error::AlreadyDefunded));
}

#[test]
fn defund_pays_balances_and_unreconciled_deposits_per_asset() {
    let s = Setup::new(2);
    let (token2, asset2) = s.new_token();
    s.deposit(B, &s.token, 62);
    s.deposit(A, &token2, 10);
    s.deposit(B, &token2, 8);

    let mut state = s.state(3, (17, 45), (0, 62));
    state.asset_ids.push_back(asset2.clone());
    state.balances.push_back(Balance { bal_a: 10, bal_b: 8 });
    state.processed_deposits_a.push_back(10);
    state.processed_deposits_b.push_back(8);
    s.dispute(&state);

    // Bob tops up after the last signed state.
    s.deposit(B, &token2, 18);

    at(&s.env, START + 2);
    s.client.defund_channel(&state);
    assert_eq!(s.balance_of(&s.token, &s.params.a.addr), MINTED + 17);
    assert_eq!(s.balance_of(&s.token, &s.params.b.addr), MINTED - 62 + 45);
    assert_eq!(s.balance_of(&token2, &s.params.a.addr), MINTED);
    assert_eq!(s.balance_of(&token2, &s.params.b.addr), MINTED);
    assert_eq!(s.balance_of(&s.token, &s.client.address), 0);
    assert_eq!(s.balance_of(&token2, &s.client.address), 0);
    assert_eq!(s.client.get_deposits(&s.cid, &asset2).paid_out, 36);
}

#[test]
fn defund_cannot_exceed_channel_holdings() {
    let s = Setup::new(2);
    s.deposit(A, &s.token, 100);
    let state = s.state(3, (100, 100), (100, 0));
    s.dispute(&state);
    at(&s.env, START + 2);
    assert_eq!(s.try_defund(&state), Err(Error::InsufficientChannelFunds));
    assert_eq!(s.dispute_record().defund_nonce, 0);
    assert_eq!(s.balance_of(&s.token, &s.client.address), 100);
}

#[test]
fn channel_can_be_disputed_again_after_defund_phase() {
    let s = Setup::new(2);
    s.deposit(A, &s.token, 100);
    let first = s.state(3, (60, 40), (100, 0));
    s.dispute(&first);
    at(&s.env, START + 2);
    s.client.defund_channel(&first);

    // The channel keeps operating and alice deposits again.
    s.deposit(A, &s.token, 50);
    let mut second = s.state(4, (25, 25), (150, 0));
    second.defund_nonce = 2;

    at(&s.env, START + 4);
    assert_eq!(s.try_dispute(&second), Err(Error::ConsensusPhaseEnded));

    at(&s.env, START + 5);
    assert_eq!(s.try_dispute(&first), Err(Error::StaleNonce));
    s.dispute(&second);
    let dispute = s.dispute_record();
    assert_eq!(dispute.consensus_expiry, START as u64 + 7);
    assert_eq!(dispute.defund_expiry, START as u64 + 9);
    assert_eq!(dispute.defund_nonce, 1);

    at(&s.env, START + 7);
    s.client.defund_channel(&second);
    assert_eq!(s.balance_of(&s.token, &s.params.a.addr), MINTED - 150 + 60 + 25);
    assert_eq!(s.balance_of(&s.token, &s.params.b.addr), MINTED + 40 + 25);
    assert_eq!(s.balance_of(&s.token, &s.client.address), 0);
}

struct TransferSetup {
    s: Setup,
    paid: TransferState,
    cancelled: TransferState,
    initial_states: (Bytes, Bytes),
    state: ChannelState,
}

fn hashlock(
    s: &Setup,
    id: u8,
    amount: i128,
    preimage: &[u8],
    definition: &BytesN<32>,
) -> (TransferState, Bytes) {
    let lock = s.env.crypto().keccak256(&Bytes::from_slice(&s.env, preimage));
    let initial_state = Bytes::from_array(&s.env, &lock.to_array());
    let transfer = TransferState {
        channel_id: s.cid.clone(),
        transfer_id: BytesN::from_array(&s.env, &[id; 32]),
        transfer_definition: definition.clone(),
        initiator: s.params.a.signer.clone(),
        responder: s.params.b.signer.clone(),
        asset_id: s.asset_id.clone(),
        balance: Balance {
            bal_a: amount,
            bal_b: 0,
        },
        transfer_timeout: 3,
        initial_state_hash: s.env.crypto().keccak256(&initial_state),
    };
    (transfer, initial_state)
}

fn leaf(s: &Setup, transfer: &TransferState) -> B256 {
    B256::from(s.client.hash_transfer(transfer).to_array())
}

fn proof_for(s: &Setup, transfers: &[&TransferState], target: &TransferState) -> Vec<BytesN<32>> {
    let leaves: alloc::vec::Vec<B256> = transfers.iter().map(|t| leaf(s, t)).collect();
    let mut proof = Vec::new(&s.env);
    for sibling in merkle_proof(&leaves, &leaf(s, target)).unwrap() {
        proof.push_back(BytesN::from_array(&s.env, &sibling.0));
    }
    proof
}

/// Alice deposits 100 and locks 10 and 5 into two hashlock transfers to bob;
/// the channel is then disputed at `START` with a transfer timeout of 3.
fn transfer_setup() -> TransferSetup {
    let s = Setup::new(2);
    let resolver = s.env.register_contract(None, HashlockResolver);
    let definition = s.client.register_definition(&resolver);
    s.deposit(A, &s.token, 100);

    let (paid, paid_initial) = hashlock(&s, 1, 10, b"paid", &definition);
    let (cancelled, cancelled_initial) = hashlock(&s, 2, 5, b"cancelled", &definition);
    let root = merkle_root(&[leaf(&s, &paid), leaf(&s, &cancelled)]);
    let mut state = s.state(3, (85, 0), (100, 0));
    state.merkle_root = BytesN::from_array(&s.env, &root.0);

    TransferSetup {
        s,
        paid,
        cancelled,
        initial_states: (paid_initial, cancelled_initial),
        state,
    }
}

fn responder_signature(
    t: &TransferSetup,
    key: &ChannelSigner,
    transfer: &TransferState,
    resolver: &[u8],
) -> BytesN<65> {
    let hash = B256::from(t.s.client.hash_transfer(transfer).to_array());
    let digest = responder_auth_digest(&hash, resolver);
    sign_digest(&t.s.env, key, &BytesN::from_array(&t.s.env, &digest.0))
}

#[test]
fn transfer_dispute_requires_defund_phase_and_valid_proof() {
    let t = transfer_setup();
    let s = &t.s;
    let both = [&t.paid, &t.cancelled];
    let proof = proof_for(s, &both, &t.paid);

    assert_eq!(
        s.client.try_dispute_transfer(&t.paid, &proof),
        Err(Ok(Error::NotInDefundPhase))
    );
    s.dispute(&t.state);
    assert_eq!(
        s.client.try_dispute_transfer(&t.paid, &proof),
        Err(Ok(Error::NotInDefundPhase))
    );

    at(&s.env, START + 2);
    let wrong_proof = proof_for(s, &both, &t.cancelled);
    assert_eq!(
        s.client.try_dispute_transfer(&t.paid, &wrong_proof),
        Err(Ok(Error::InvalidMerkleProof))
    );
    s.client.dispute_transfer(&t.paid, &proof);
    assert_eq!(
        s.client.try_dispute_transfer(&t.paid, &proof),
        Err(Ok(Error::TransferAlreadyDisputed))
    );

    let record = s
        .client
        .get_transfer_dispute(&s.cid, &t.paid.transfer_id)
        .unwrap();
    assert_eq!(record.transfer_state_hash, s.client.hash_transfer(&t.paid));
    assert_eq!(record.transfer_dispute_expiry, START as u64 + 2 + 3);
    assert!(!record.is_defunded);
}

#[test]
fn responder_resolves_and_anyone_cancels_after_expiry() {
    let t = transfer_setup();
    let s = &t.s;
    let both = [&t.paid, &t.cancelled];
    let (paid_initial, cancelled_initial) = &t.initial_states;
    let no_signature: Option<BytesN<65>> = None;

    s.dispute(&t.state);
    at(&s.env, START + 2);
    s.client.defund_channel(&t.state);
    assert_eq!(
        s.client.try_defund_transfer(&t.paid, paid_initial, &Bytes::new(&s.env), &no_signature),
        Err(Ok(Error::TransferNotDisputed))
    );
    s.client
        .dispute_transfer(&t.paid, &proof_for(s, &both, &t.paid));
    s.client
        .dispute_transfer(&t.cancelled, &proof_for(s, &both, &t.cancelled));

    let preimage = Bytes::from_slice(&s.env, b"paid");

    // Alice is not the responder.
    let by_alice = Some(responder_signature(&t, &s.key_alice, &t.paid, b"paid"));
    assert_eq!(
        s.client.try_defund_transfer(&t.paid, paid_initial, &preimage, &by_alice),
        Err(Ok(Error::NotResponder))
    );

    let by_bob = Some(responder_signature(&t, &s.key_bob, &t.paid, b"paid"));
    assert_eq!(
        s.client.try_defund_transfer(&t.paid, cancelled_initial, &preimage, &by_bob),
        Err(Ok(Error::InitialStateMismatch))
    );

    let mut tampered = t.paid.clone();
    tampered.balance.bal_a = 11;
    assert_eq!(
        s.client.try_defund_transfer(&tampered, paid_initial, &preimage, &by_bob),
        Err(Ok(Error::TransferHashMismatch))
    );

    s.client
        .defund_transfer(&t.paid, paid_initial, &preimage, &by_bob);
    assert_eq!(s.balance_of(&s.token, &s.params.b.addr), MINTED + 10);
    assert_eq!(
        s.client.try_defund_transfer(&t.paid, paid_initial, &preimage, &by_bob),
        Err(Ok(Error::TransferAlreadyDefunded))
    );

    // The cancelled transfer's window runs until START + 5.
    at(&s.env, START + 5);
    s.client.defund_transfer(
        &t.cancelled,
        &Bytes::new(&s.env),
        &Bytes::new(&s.env),
        &no_signature,
    );
    assert_eq!(
        s.balance_of(&s.token, &s.params.a.addr),
        MINTED - 100 + 85 + 5
    );
    assert_eq!(s.balance_of(&s.token, &s.client.address), 0);
    assert!(
        s.client
            .get_transfer_dispute(&s.cid, &t.cancelled.transfer_id)
            .unwrap()
            .is_defunded
    );
}

#[test]
fn hash_helpers_reject_negative_amounts() {
    let s = Setup::new(2);
    let state = s.state(3, (-1, 45), (0, 62));
    assert_eq!(s.client.try_hash_state(&state), Err(Ok(Error::InvalidAmount)));

    let mut ragged = s.state(3, (17, 45), (0, 62));
    ragged.processed_deposits_b.push_back(1);
    assert_eq!(s.client.try_hash_state(&ragged), Err(Ok(Error::MalformedState)));
}
