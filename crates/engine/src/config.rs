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

//! Engine configuration.

use std::time::Duration;

/// Default dispute timeout in ledger sequence numbers.
pub const DEFAULT_TIMEOUT: u64 = 8_640;

/// Configuration for a [`ChannelEngine`](crate::ChannelEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a local proposal waits for the channel lock. None waits forever.
    pub lock_timeout: Option<Duration>,

    /// Dispute timeout used by `setup` when the caller gives none.
    pub default_timeout: u64,

    /// Whether inbound deposit updates are checked against the ledger's totals.
    pub verify_deposits_onchain: bool,
}

impl EngineConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the wait for the channel lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Set the default dispute timeout.
    pub fn with_default_timeout(mut self, timeout: u64) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Enable or disable on-chain deposit verification.
    pub fn with_onchain_deposit_check(mut self, enable: bool) -> Self {
        self.verify_deposits_onchain = enable;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Some(Duration::from_secs(30)),
            default_timeout: DEFAULT_TIMEOUT,
            verify_deposits_onchain: true,
        }
    }
}
