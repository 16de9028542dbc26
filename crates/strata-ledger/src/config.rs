use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strata_fs::{Compression, FileStorageConfig};

use crate::error::{LedgerError, LedgerResult};

/// Configuration for a file-backed ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding `block-chunks/`, `blockchain-states/`, and `file.lock`.
    pub base_directory: PathBuf,
    /// Blocks per chunk file before it is finalized.
    pub block_chunk_size: u64,
    /// Take a snapshot automatically after every this many blocks.
    /// `None` disables automatic snapshots.
    pub snapshot_period_in_blocks: Option<u64>,
    /// Fan-out directory depth for both stores.
    pub fanout_depth: usize,
    /// Codecs tried when finalizing chunk and snapshot files.
    pub compressors: Vec<Compression>,
    /// Decoded blocks kept in memory. Defaults to twice the chunk size.
    pub block_cache_size: Option<usize>,
    /// Decoded snapshots kept in memory.
    pub snapshot_cache_size: usize,
    /// Keep only the newest this many snapshots when pruning.
    /// `None` retains everything.
    pub snapshot_retention: Option<usize>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from("./local/blockchain"),
            block_chunk_size: 100,
            snapshot_period_in_blocks: Some(1000),
            fanout_depth: 8,
            compressors: vec![Compression::Gzip, Compression::Bzip2, Compression::Xz],
            block_cache_size: None,
            snapshot_cache_size: 16,
            snapshot_retention: None,
        }
    }
}

impl LedgerConfig {
    /// Default configuration rooted at `base_directory`.
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            ..Default::default()
        }
    }

    pub fn effective_block_cache_size(&self) -> usize {
        self.block_cache_size.unwrap_or_else(|| {
            usize::try_from(self.block_chunk_size.saturating_mul(2)).unwrap_or(usize::MAX)
        })
    }

    pub fn storage_config(&self) -> FileStorageConfig {
        FileStorageConfig {
            max_depth: self.fanout_depth,
            compressors: self.compressors.clone(),
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.block_chunk_size == 0 {
            return Err(LedgerError::Config("block_chunk_size must be positive".into()));
        }
        if self.snapshot_period_in_blocks == Some(0) {
            return Err(LedgerError::Config(
                "snapshot_period_in_blocks must be positive when set".into(),
            ));
        }
        if self.effective_block_cache_size() == 0 || self.snapshot_cache_size == 0 {
            return Err(LedgerError::Config("cache sizes must be positive".into()));
        }
        if self.snapshot_retention == Some(0) {
            return Err(LedgerError::Config(
                "snapshot_retention must keep at least one snapshot".into(),
            ));
        }
        Ok(())
    }
}
