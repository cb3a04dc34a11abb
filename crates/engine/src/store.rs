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

//! Channel persistence.
//!
//! The store is the single source of truth for a party's channels: a record
//! is written only once an update carries both signatures. [`FileStore`]
//! keeps one JSON file per channel and replaces it atomically (write to
//! `.tmp`, then rename).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy_primitives::B256;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::update::ChannelRecord;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// File extension for persisted channel records.
const RECORD_EXTENSION: &str = "json";

/// Persistent storage for channel records, keyed by channel address.
#[async_trait::async_trait]
pub trait ChannelStore: Send + Sync {
    /// Load a channel's record. Returns `Ok(None)` if the channel is unknown.
    async fn load(&self, channel: &B256) -> StoreResult<Option<ChannelRecord>>;

    /// Replace the channel's record.
    async fn save(&self, record: &ChannelRecord) -> StoreResult<()>;

    /// List the addresses of all stored channels.
    async fn channels(&self) -> StoreResult<Vec<B256>>;
}

/// In-memory store. All data is lost when the store is dropped.
#[derive(Default, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<B256, ChannelRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChannelStore for MemoryStore {
    async fn load(&self, channel: &B256) -> StoreResult<Option<ChannelRecord>> {
        Ok(self.records.read().await.get(channel).cloned())
    }

    async fn save(&self, record: &ChannelRecord) -> StoreResult<()> {
        self.records
            .write()
            .await
            .insert(record.channel_address(), record.clone());
        Ok(())
    }

    async fn channels(&self) -> StoreResult<Vec<B256>> {
        Ok(self.records.read().await.keys().copied().collect())
    }
}

/// File-system store, one JSON document per channel.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a new store, creating the directory if needed.
    ///
    /// # Note
    /// This performs blocking I/O (`create_dir_all`). Call at startup.
    pub fn new(base_dir: PathBuf) -> StoreResult<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn record_path(&self, channel: &B256) -> PathBuf {
        self.base_dir
            .join(hex::encode(channel))
            .with_extension(RECORD_EXTENSION)
    }

    /// Write data atomically: write to a `.tmp` file then rename.
    async fn atomic_write(&self, path: &Path, data: &[u8]) -> StoreResult<()> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChannelStore for FileStore {
    async fn load(&self, channel: &B256) -> StoreResult<Option<ChannelRecord>> {
        match fs::read(self.record_path(channel)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Deserialize(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn save(&self, record: &ChannelRecord) -> StoreResult<()> {
        let bytes =
            serde_json::to_vec_pretty(record).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let path = self.record_path(&record.channel_address());
        self.atomic_write(&path, &bytes).await?;
        debug!(
            channel = %hex::encode(record.channel_address()),
            nonce = record.nonce(),
            "channel record written"
        );
        Ok(())
    }

    async fn channels(&self) -> StoreResult<Vec<B256>> {
        let mut channels = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(bytes) = hex::decode(stem) {
                if bytes.len() == 32 {
                    channels.push(B256::from_slice(&bytes));
                }
            }
        }
        Ok(channels)
    }
}
