use chrono::NaiveDateTime;
use strata_crypto::{sign_snapshot, SigningKey};
use strata_types::{Block, SignedChangeRequest, Snapshot};
use tracing::{debug, info};

use crate::block_store::BlockChunkStore;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::factory::BlockFactory;
use crate::lock::LockCoordinator;
use crate::snapshot::generate_snapshot;
use crate::snapshot_store::{SnapshotName, SnapshotStore};
use crate::traits::{BlockIter, Direction, LedgerReader, LedgerWriter, SnapshotIter};
use crate::validation::{check_snapshot_shape, validate_next_block, ChainValidator};

/// Result of a pruning pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub snapshots_removed: usize,
    pub chunks_removed: usize,
}

/// Ledger stored under one base directory:
///
/// ```text
/// block-chunks/<fanout>/<start>-<end>-chunk.bin[.gz|.bz2|.xz]
/// blockchain-states/<fanout>/<last>-state.bin[.gz|.bz2|.xz]
/// file.lock
/// ```
///
/// Any number of handles may read. Every mutation runs under the directory's
/// write lock, with caches dropped before the lock is taken and after it is
/// released.
pub struct FileLedger {
    config: LedgerConfig,
    blocks: BlockChunkStore,
    snapshots: SnapshotStore,
    lock: LockCoordinator,
    signing_key: Option<SigningKey>,
}

impl FileLedger {
    pub fn open(config: LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let ledger = Self {
            blocks: BlockChunkStore::new(&config)?,
            snapshots: SnapshotStore::new(&config)?,
            lock: LockCoordinator::new(&config.base_directory),
            config,
            signing_key: None,
        };
        info!(base = %ledger.config.base_directory.display(), "opened ledger");
        Ok(ledger)
    }

    /// Key used to sign blocks built by [`add_block_from_request`](Self::add_block_from_request)
    /// and snapshots taken by [`snapshot`](Self::snapshot).
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn block_store(&self) -> &BlockChunkStore {
        &self.blocks
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn lock(&self) -> &LockCoordinator {
        &self.lock
    }

    fn invalidate_caches(&self) {
        self.blocks.invalidate_caches();
        self.snapshots.invalidate_cache();
    }

    fn last_snapshot_block(&self) -> LedgerResult<Option<u64>> {
        Ok(match self.snapshots.names()?.last() {
            Some(SnapshotName::UpTo(last)) => Some(*last),
            _ => None,
        })
    }

    /// Run `f` holding the write lock, healing the chunk store first if a
    /// previous writer left it in need.
    fn with_write_lock<T>(&self, f: impl FnOnce() -> LedgerResult<T>) -> LedgerResult<T> {
        self.invalidate_caches();
        let guard = self.lock.acquire()?;
        if self.blocks.needs_healing() {
            self.snapshots.heal()?;
            self.blocks.heal(self.last_snapshot_block()?)?;
        }
        let result = f();
        drop(guard);
        self.invalidate_caches();
        result
    }

    fn append_block(&self, block: Block, validate: bool, auto_snapshot: bool) -> LedgerResult<()> {
        self.lock.ensure_held()?;
        if validate {
            validate_next_block(self, &block)?.into_result()?;
        } else {
            let next = self.get_next_block_number()?;
            if block.number() != next {
                return Err(LedgerError::validation(
                    "message.block_number",
                    format!("expected {next}, found {}", block.number()),
                )
                .at_block(block.number()));
            }
        }
        let number = block.number();
        self.blocks.append(&block)?;
        debug!(block_number = number, "added block");

        let period = self.config.snapshot_period_in_blocks;
        if auto_snapshot && period.is_some_and(|p| (number + 1) % p == 0) {
            self.snapshot_locked(Some(number))?;
        }
        Ok(())
    }

    fn store_snapshot(&self, snapshot: Snapshot) -> LedgerResult<()> {
        self.lock.ensure_held()?;
        if let Some(last) = snapshot.last_block_number {
            self.blocks.finalize_open_through(last)?;
        }
        self.snapshots.save(&snapshot)?;
        if self.config.snapshot_retention.is_some() {
            self.prune_locked()?;
        }
        Ok(())
    }

    fn snapshot_locked(&self, upto: Option<u64>) -> LedgerResult<Snapshot> {
        let generated = generate_snapshot(self, upto)?;
        let name = SnapshotName::of(&generated);
        if self.snapshots.contains(name)? {
            return self.snapshots.load(name);
        }
        let snapshot = match &self.signing_key {
            Some(key) => sign_snapshot(generated, key)?,
            None => generated,
        };
        self.store_snapshot(snapshot.clone())?;
        info!(last_block_number = ?snapshot.last_block_number, "took snapshot");
        Ok(snapshot)
    }

    /// Take and store the snapshot covering blocks up to `upto` (default: the
    /// tip), signed with the ledger's key if it has one. An already stored
    /// snapshot for that block is returned as is.
    pub fn snapshot(&self, upto: Option<u64>) -> LedgerResult<Snapshot> {
        self.with_write_lock(|| self.snapshot_locked(upto))
    }

    /// Regenerate the snapshot up to `upto` without storing it.
    pub fn generate_snapshot(&self, upto: Option<u64>) -> LedgerResult<Snapshot> {
        generate_snapshot(self, upto)
    }

    /// Build, sign, and append the block for `request`.
    pub fn add_block_from_request(
        &self,
        request: SignedChangeRequest,
        timestamp: NaiveDateTime,
    ) -> LedgerResult<Block> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| LedgerError::Config("ledger has no signing key".into()))?;
        self.with_write_lock(|| {
            let block = BlockFactory::new(self, key).create_block(request, timestamp)?;
            self.append_block(block.clone(), false, true)?;
            Ok(block)
        })
    }

    /// Validate the whole ledger. Unless `partial_allowed`, it must start at
    /// a genesis snapshot.
    pub fn validate(&self, partial_allowed: bool) -> LedgerResult<()> {
        ChainValidator::new(self).validate(!partial_allowed)
    }

    pub fn validate_blocks(&self, offset: u64, limit: Option<u64>) -> LedgerResult<()> {
        ChainValidator::new(self).validate_blocks(offset, limit)
    }

    /// Replace this ledger's content with `source`'s.
    ///
    /// Snapshots are interleaved with blocks in coverage order. Blocks are
    /// appended unvalidated and no automatic snapshots are taken.
    pub fn copy_from(&self, source: &dyn LedgerReader) -> LedgerResult<()> {
        self.with_write_lock(|| {
            self.clear_locked()?;
            let mut snapshots = source.iter_snapshots(Direction::Forward);
            let first = snapshots
                .next()
                .transpose()?
                .ok_or_else(|| LedgerError::NotFound("source ledger has no snapshot".into()))?;
            let start = first.next_block_number();
            self.store_snapshot(first)?;

            let mut pending = snapshots.next().transpose()?;
            let mut copied = 0u64;
            for item in source.iter_blocks_from(start) {
                let block = item?;
                while let Some(snapshot) = pending.take() {
                    if !snapshot.excludes_block(block.number()) {
                        pending = Some(snapshot);
                        break;
                    }
                    self.store_snapshot(snapshot)?;
                    pending = snapshots.next().transpose()?;
                }
                self.append_block(block, false, false)?;
                copied += 1;
            }
            while let Some(snapshot) = pending {
                self.store_snapshot(snapshot)?;
                pending = snapshots.next().transpose()?;
            }
            info!(blocks = copied, "copied ledger");
            Ok(())
        })
    }

    fn clear_locked(&self) -> LedgerResult<()> {
        self.lock.ensure_held()?;
        self.blocks.clear()?;
        self.snapshots.clear()?;
        info!(base = %self.config.base_directory.display(), "cleared ledger");
        Ok(())
    }

    /// Finalize every open chunk, including the live one, and anything an
    /// interrupted finalize left writable.
    pub fn finalize_all_open_segments(&self) -> LedgerResult<()> {
        self.with_write_lock(|| {
            self.blocks.finalize_all_open()?;
            self.snapshots.heal()?;
            Ok(())
        })
    }

    /// Apply `snapshot_retention`: drop the oldest snapshots beyond it and
    /// the chunks fully covered by the oldest one kept.
    pub fn prune(&self) -> LedgerResult<PruneReport> {
        self.with_write_lock(|| self.prune_locked())
    }

    fn prune_locked(&self) -> LedgerResult<PruneReport> {
        self.lock.ensure_held()?;
        let Some(keep) = self.config.snapshot_retention else {
            return Ok(PruneReport::default());
        };
        let names = self.snapshots.names()?;
        if names.len() <= keep {
            return Ok(PruneReport::default());
        }
        let (dropped, kept) = names.split_at(names.len() - keep);
        for name in dropped {
            self.snapshots.remove(*name)?;
        }
        let first_kept = match kept.first() {
            Some(SnapshotName::UpTo(last)) => last + 1,
            _ => 0,
        };
        let report = PruneReport {
            snapshots_removed: dropped.len(),
            chunks_removed: self.blocks.remove_chunks_before(first_kept)?,
        };
        info!(
            snapshots_removed = report.snapshots_removed,
            chunks_removed = report.chunks_removed,
            first_kept,
            "pruned ledger"
        );
        Ok(report)
    }
}

impl LedgerReader for FileLedger {
    fn iter_blocks(&self, direction: Direction) -> BlockIter<'_> {
        self.blocks.iter_blocks(direction)
    }

    fn iter_snapshots(&self, direction: Direction) -> SnapshotIter<'_> {
        self.snapshots.iter(direction)
    }

    fn iter_blocks_from(&self, block_number: u64) -> BlockIter<'_> {
        self.blocks.iter_blocks_from(block_number)
    }

    fn iter_blocks_backward_from(&self, block_number: u64) -> BlockIter<'_> {
        self.blocks.iter_blocks_backward_from(block_number)
    }

    fn get_block_by_number(&self, block_number: u64) -> LedgerResult<Option<Block>> {
        self.blocks.get_block(block_number)
    }

    fn get_first_block(&self) -> LedgerResult<Option<Block>> {
        match self.blocks.first_block_number()? {
            Some(n) => self.blocks.get_block(n),
            None => Ok(None),
        }
    }

    fn get_last_block(&self) -> LedgerResult<Option<Block>> {
        match self.blocks.last_block_number()? {
            Some(n) => self.blocks.get_block(n),
            None => Ok(None),
        }
    }

    fn get_first_block_number(&self) -> LedgerResult<Option<u64>> {
        self.blocks.first_block_number()
    }

    fn get_last_block_number(&self) -> LedgerResult<Option<u64>> {
        self.blocks.last_block_number()
    }

    fn get_first_snapshot(&self) -> LedgerResult<Option<Snapshot>> {
        self.snapshots.first()
    }

    fn get_last_snapshot(&self) -> LedgerResult<Option<Snapshot>> {
        self.snapshots.last()
    }

    fn get_closest_snapshot_excluding_block(
        &self,
        block_number: u64,
    ) -> LedgerResult<Option<Snapshot>> {
        self.snapshots.closest_excluding(block_number)
    }
}

impl LedgerWriter for FileLedger {
    fn add_block(&self, block: Block, validate: bool) -> LedgerResult<()> {
        self.with_write_lock(|| self.append_block(block, validate, true))
    }

    /// Store `snapshot`, finalizing the chunk it closes. Its signature, if
    /// any, must verify.
    fn add_snapshot(&self, snapshot: Snapshot) -> LedgerResult<()> {
        check_snapshot_shape(&snapshot)?;
        self.with_write_lock(|| self.store_snapshot(snapshot))
    }

    fn clear(&self) -> LedgerResult<()> {
        self.with_write_lock(|| self.clear_locked())
    }
}
