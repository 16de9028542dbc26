use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use strata_fs::{FileStorage, SortOrder};
use strata_types::Snapshot;
use tracing::{debug, info, warn};

use crate::codec::{decode_single, encode_record};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::traits::{Direction, SnapshotIter};

/// Directory holding snapshot files, relative to the ledger base directory.
pub const SNAPSHOTS_DIR: &str = "blockchain-states";

const STATE_SUFFIX: &str = "-state.bin";
const GENESIS_ID: &str = "0000000000000000000!";

/// Which snapshot a file holds, as encoded in its name.
///
/// Orders genesis first, then by last covered block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SnapshotName {
    Genesis,
    UpTo(u64),
}

impl SnapshotName {
    pub fn of(snapshot: &Snapshot) -> Self {
        snapshot.last_block_number.map_or(Self::Genesis, Self::UpTo)
    }

    pub fn file_name(&self) -> String {
        match self {
            Self::Genesis => format!("{GENESIS_ID}{STATE_SUFFIX}"),
            Self::UpTo(last) => format!("{last:020}{STATE_SUFFIX}"),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let id = name.strip_suffix(STATE_SUFFIX)?;
        if id == GENESIS_ID {
            return Some(Self::Genesis);
        }
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        id.parse().ok().map(Self::UpTo)
    }

    /// Whether the snapshot's coverage ends before `block_number`.
    pub fn excludes_block(&self, block_number: u64) -> bool {
        match self {
            Self::Genesis => true,
            Self::UpTo(last) => *last < block_number,
        }
    }
}

/// Write-once snapshot files with an LRU cache of decoded snapshots.
pub struct SnapshotStore {
    storage: FileStorage,
    cache: Mutex<LruCache<SnapshotName, Snapshot>>,
}

impl SnapshotStore {
    pub fn new(config: &LedgerConfig) -> LedgerResult<Self> {
        let capacity = NonZeroUsize::new(config.snapshot_cache_size)
            .ok_or_else(|| LedgerError::Config("snapshot cache size must be positive".into()))?;
        Ok(Self {
            storage: FileStorage::new(
                config.base_directory.join(SNAPSHOTS_DIR),
                config.storage_config(),
            ),
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Stored snapshot names, genesis first.
    pub fn names(&self) -> LedgerResult<Vec<SnapshotName>> {
        let mut names: Vec<SnapshotName> = self
            .storage
            .list(Some(SortOrder::Ascending))?
            .iter()
            .filter_map(|name| SnapshotName::parse(name))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn contains(&self, name: SnapshotName) -> LedgerResult<bool> {
        Ok(self.storage.exists(&name.file_name())?)
    }

    /// Write `snapshot` and finalize it at once. Snapshots are never
    /// overwritten.
    pub fn save(&self, snapshot: &Snapshot) -> LedgerResult<()> {
        let name = SnapshotName::of(snapshot);
        let file_name = name.file_name();
        if self.storage.exists(&file_name)? {
            return Err(LedgerError::validation(
                "last_block_number",
                format!("snapshot {file_name} already exists"),
            ));
        }
        self.storage.save(&file_name, &encode_record(snapshot)?, true)?;
        self.cache.lock().put(name, snapshot.clone());
        info!(snapshot = %file_name, accounts = snapshot.account_states.len(), "stored snapshot");
        Ok(())
    }

    /// Finalize snapshots a crashed writer stored but never finalized.
    /// Returns how many were finalized.
    pub fn heal(&self) -> LedgerResult<usize> {
        let mut healed = 0;
        for name in self.names()? {
            let file_name = name.file_name();
            if !self.storage.is_finalized(&file_name)? {
                warn!(snapshot = %file_name, "finalizing snapshot left writable");
                self.storage.finalize(&file_name)?;
                healed += 1;
            }
        }
        Ok(healed)
    }

    pub fn load(&self, name: SnapshotName) -> LedgerResult<Snapshot> {
        if let Some(snapshot) = self.cache.lock().get(&name) {
            return Ok(snapshot.clone());
        }
        let file_name = name.file_name();
        let snapshot: Snapshot = decode_single(&self.storage.load(&file_name)?, &file_name)?;
        if SnapshotName::of(&snapshot) != name {
            return Err(LedgerError::InternalConsistency(format!(
                "{file_name} holds the snapshot for {:?}",
                snapshot.last_block_number
            )));
        }
        debug!(snapshot = %file_name, "loaded snapshot");
        self.cache.lock().put(name, snapshot.clone());
        Ok(snapshot)
    }

    pub fn iter(&self, direction: Direction) -> SnapshotIter<'_> {
        match self.names() {
            Ok(mut names) => {
                if direction == Direction::Backward {
                    names.reverse();
                }
                Box::new(names.into_iter().map(move |name| self.load(name)))
            }
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }

    pub fn first(&self) -> LedgerResult<Option<Snapshot>> {
        self.names()?.first().map(|n| self.load(*n)).transpose()
    }

    pub fn last(&self) -> LedgerResult<Option<Snapshot>> {
        self.names()?.last().map(|n| self.load(*n)).transpose()
    }

    /// Latest snapshot covering no block at or after `block_number`, found by
    /// name alone before anything is decoded.
    pub fn closest_excluding(&self, block_number: u64) -> LedgerResult<Option<Snapshot>> {
        self.names()?
            .into_iter()
            .rev()
            .find(|name| name.excludes_block(block_number))
            .map(|name| self.load(name))
            .transpose()
    }

    pub fn remove(&self, name: SnapshotName) -> LedgerResult<()> {
        self.storage.remove(&name.file_name())?;
        self.cache.lock().pop(&name);
        info!(snapshot = %name.file_name(), "removed snapshot");
        Ok(())
    }

    pub fn clear(&self) -> LedgerResult<()> {
        self.storage.clear()?;
        self.invalidate_cache();
        Ok(())
    }

    pub fn invalidate_cache(&self) {
        self.cache.lock().clear();
    }
}
