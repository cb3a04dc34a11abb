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

//! Off-chain update engine for duet payment channels.
//!
//! A [`ChannelEngine`] holds one party's signing key and drives every
//! channel that party is in: it proposes updates, validates and
//! counter-signs the counterparty's updates, persists each dual-signed
//! state through a [`ChannelStore`], and submits disputes through a
//! [`ChainService`] when cooperation breaks down.

pub mod chain;
pub mod config;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod store;
pub mod update;

pub use chain::{ChainService, DepositTotals, DisputeWindow, TxReceipt};
pub use config::EngineConfig;
pub use definitions::{DefinitionRegistry, HashlockTransfer, TransferDefinition};
pub use engine::ChannelEngine;
pub use error::{ChainError, EngineError, EngineResult, MessagingError, ResolveError, StoreError};
pub use messaging::Messenger;
pub use store::{ChannelStore, FileStore, MemoryStore};
pub use update::{
    apply_update, ChannelRecord, ChannelUpdate, FullTransferState, SignedChannelState,
    UpdateDetails,
};
