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

//! Ethereum-style secp256k1 signatures over 32-byte digests.
//!
//! A party signs `keccak256("\x19Ethereum Signed Message:\n32" || digest)` and
//! is identified by the last 20 bytes of the keccak256 of its uncompressed
//! public key. Verification never panics: anything that fails to parse or
//! recover is simply not a valid signature.

use core::fmt;

use alloy_primitives::{Address, B256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::error::TypesError;
use crate::state::Signature;

pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag; the address covers the raw x || y coordinates.
    let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();
    Address::from_slice(&hash[12..])
}

pub fn eth_signed_message_hash(digest: &B256) -> B256 {
    // Packed encoding => We can't use the ABI encoder
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(digest.as_slice());
    let out: [u8; 32] = hasher.finalize().into();
    B256::from(out)
}

/// Recovers the address that produced `signature` over `digest`.
pub fn recover_signer(digest: &B256, signature: &Signature) -> Option<Address> {
    let bytes = signature.as_slice();
    let sig = EcdsaSignature::from_slice(&bytes[..64]).ok()?;
    // Malleable high-s twins are rejected outright.
    if sig.normalize_s().is_some() {
        return None;
    }
    let recovery_id = RecoveryId::from_byte(bytes[64].checked_sub(27)?)?;
    let prehash = eth_signed_message_hash(digest);
    let key = VerifyingKey::recover_from_prehash(prehash.as_slice(), &sig, recovery_id).ok()?;
    Some(address_of(&key))
}

pub fn verify(signature: &Signature, digest: &B256, expected_signer: &Address) -> bool {
    recover_signer(digest, signature).is_some_and(|signer| signer == *expected_signer)
}

/// A channel participant's signing key.
#[derive(Clone)]
pub struct ChannelSigner {
    skey: SigningKey,
    addr: Address,
}

impl ChannelSigner {
    pub fn init_from_key(skey: SigningKey) -> Self {
        let addr = address_of(skey.verifying_key());
        Self { skey, addr }
    }

    pub fn from_slice(secret: &[u8]) -> Result<Self, TypesError> {
        let skey = SigningKey::from_slice(secret).map_err(|_| TypesError::InvalidKey)?;
        Ok(Self::init_from_key(skey))
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign(&self, digest: &B256) -> Result<Signature, TypesError> {
        let prehash = eth_signed_message_hash(digest);
        let (sig, recovery_id) = self
            .skey
            .sign_prehash_recoverable(prehash.as_slice())
            .map_err(|_| TypesError::Signing)?;

        let mut sig_bytes = [0u8; 65];
        sig_bytes[..64].copy_from_slice(&sig.to_bytes());
        // Ethereum requires `v = rec_id + 27`.
        sig_bytes[64] = recovery_id.to_byte() + 27;
        Ok(Signature::from(sig_bytes))
    }
}

impl fmt::Debug for ChannelSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSigner").field("addr", &self.addr).finish()
    }
}
