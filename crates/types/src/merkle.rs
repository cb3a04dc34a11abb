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

//! Sorted-pair keccak256 merkle tree over transfer hashes.
//!
//! Leaves are sorted before the tree is built and each pair is hashed in
//! ascending order, so the root depends only on the set of active transfers
//! and a proof is just the list of siblings. A node without a sibling is
//! carried up unchanged. The empty set has the zero root.

use alloc::vec::Vec;
use alloy_primitives::{keccak256, B256};

pub fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_slice());
    buf[32..].copy_from_slice(hi.as_slice());
    keccak256(buf)
}

fn next_layer(layer: &[B256]) -> Vec<B256> {
    layer
        .chunks(2)
        .map(|pair| match pair {
            [a, b] => hash_pair(a, b),
            _ => pair[0],
        })
        .collect()
}

fn sorted(leaves: &[B256]) -> Vec<B256> {
    let mut layer = leaves.to_vec();
    layer.sort_unstable();
    layer
}

pub fn merkle_root(leaves: &[B256]) -> B256 {
    if leaves.is_empty() {
        return B256::ZERO;
    }
    let mut layer = sorted(leaves);
    while layer.len() > 1 {
        layer = next_layer(&layer);
    }
    layer[0]
}

/// Sibling path from `leaf` to the root, or `None` if `leaf` is not in the set.
pub fn merkle_proof(leaves: &[B256], leaf: &B256) -> Option<Vec<B256>> {
    let mut layer = sorted(leaves);
    let mut idx = layer.iter().position(|l| l == leaf)?;
    let mut proof = Vec::new();
    while layer.len() > 1 {
        if let Some(sibling) = layer.get(idx ^ 1) {
            proof.push(*sibling);
        }
        idx /= 2;
        layer = next_layer(&layer);
    }
    Some(proof)
}

pub fn verify_merkle_proof(proof: &[B256], root: &B256, leaf: &B256) -> bool {
    if root.is_zero() {
        return false;
    }
    let computed = proof.iter().fold(*leaf, |acc, sibling| hash_pair(&acc, sibling));
    computed == *root
}
