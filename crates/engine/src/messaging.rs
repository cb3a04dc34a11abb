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

//! Messaging collaborator: request/response delivery of updates.

use alloy_primitives::Address;

use crate::error::MessagingError;
use crate::update::ChannelUpdate;

#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    /// Delivers `update` to the party signing as `to` and returns it
    /// counter-signed, or the reason it was refused.
    async fn send_update(&self, to: &Address, update: ChannelUpdate)
        -> Result<ChannelUpdate, MessagingError>;
}
