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

//! Transfer definitions: the pluggable rules that settle conditional transfers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy_primitives::{keccak256, B256};
use duet_types::Balance;

use crate::error::ResolveError;

/// Off-chain counterpart of an on-chain resolver contract.
///
/// `resolve` must be deterministic: both parties run it and must reach the
/// same split.
pub trait TransferDefinition: Send + Sync {
    /// Id under which the resolver contract is registered with the adjudicator.
    fn definition_id(&self) -> B256;

    /// Dispute window, in ledger sequence numbers, for transfers of this kind.
    fn transfer_timeout(&self) -> u64;

    /// Splits `balance` (`[initiator, responder]`) given the transfer's
    /// initial state and the resolver's input.
    fn resolve(
        &self,
        balance: &Balance,
        initial_state: &[u8],
        resolver: &[u8],
    ) -> Result<Balance, ResolveError>;
}

/// Lookup of transfer definitions by id.
#[derive(Clone, Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<B256, Arc<dyn TransferDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `definition`, replacing any earlier one with the same id.
    pub fn register(&mut self, definition: Arc<dyn TransferDefinition>) {
        self.definitions
            .insert(definition.definition_id(), definition);
    }

    pub fn get(&self, id: &B256) -> Option<&Arc<dyn TransferDefinition>> {
        self.definitions.get(id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.definitions.keys().map(hex::encode))
            .finish()
    }
}

/// Hash-locked payment. The initial state is the 32-byte lock
/// `keccak256(preimage)`.
///
/// Resolving with the preimage pays the whole amount to the responder. An
/// empty resolver cancels and returns the balance unchanged.
#[derive(Debug, Clone)]
pub struct HashlockTransfer {
    definition_id: B256,
    transfer_timeout: u64,
}

impl HashlockTransfer {
    pub fn new(definition_id: B256, transfer_timeout: u64) -> Self {
        Self {
            definition_id,
            transfer_timeout,
        }
    }
}

impl TransferDefinition for HashlockTransfer {
    fn definition_id(&self) -> B256 {
        self.definition_id
    }

    fn transfer_timeout(&self) -> u64 {
        self.transfer_timeout
    }

    fn resolve(
        &self,
        balance: &Balance,
        initial_state: &[u8],
        resolver: &[u8],
    ) -> Result<Balance, ResolveError> {
        if initial_state.len() != 32 {
            return Err(ResolveError::MalformedState(format!(
                "expected 32-byte lock, got {} bytes",
                initial_state.len()
            )));
        }
        if resolver.is_empty() {
            return Ok(*balance);
        }
        if keccak256(resolver).as_slice() != initial_state {
            return Err(ResolveError::Rejected("preimage does not open lock".into()));
        }
        let total = balance
            .total()
            .ok_or_else(|| ResolveError::MalformedState("locked amount overflows".into()))?;
        Ok(Balance::new(0, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashlock_outcomes() {
        let lock = keccak256(b"preimage");
        let def = HashlockTransfer::new(B256::repeat_byte(1), 5);
        let locked = Balance::new(7, 3);

        assert_eq!(
            def.resolve(&locked, lock.as_slice(), b"preimage").unwrap(),
            Balance::new(0, 10)
        );
        assert_eq!(def.resolve(&locked, lock.as_slice(), b"").unwrap(), locked);
        assert!(matches!(
            def.resolve(&locked, lock.as_slice(), b"wrong"),
            Err(ResolveError::Rejected(_))
        ));
        assert!(matches!(
            def.resolve(&locked, b"short", b"preimage"),
            Err(ResolveError::MalformedState(_))
        ));
    }

    #[test]
    fn registry_lookup() {
        let mut registry = DefinitionRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(HashlockTransfer::new(B256::repeat_byte(2), 5)));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&B256::repeat_byte(2)).map(|d| d.transfer_timeout()),
            Some(5)
        );
        assert!(registry.get(&B256::ZERO).is_none());
    }
}
