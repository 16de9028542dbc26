use std::collections::BTreeMap;

use parking_lot::RwLock;
use strata_types::{Block, Snapshot};

use crate::error::{LedgerError, LedgerResult};
use crate::traits::{BlockIter, Direction, LedgerReader, LedgerWriter, SnapshotIter};
use crate::validation::{check_snapshot_shape, validate_next_block};

/// In-memory ledger for tests and embedding.
///
/// Implements only the two iteration primitives, so every navigation query
/// runs through the trait defaults. That makes it the reference the
/// file-backed ledger's fast paths are checked against.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    blocks: BTreeMap<u64, Block>,
    /// Keyed by the first block number each snapshot does not cover.
    snapshots: BTreeMap<u64, Snapshot>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger holding just `genesis`.
    pub fn with_snapshot(genesis: Snapshot) -> LedgerResult<Self> {
        let ledger = Self::new();
        ledger.add_snapshot(genesis)?;
        Ok(ledger)
    }

    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.read().snapshots.len()
    }
}

impl LedgerReader for InMemoryLedger {
    fn iter_blocks(&self, direction: Direction) -> BlockIter<'_> {
        let blocks: Vec<Block> = self.inner.read().blocks.values().cloned().collect();
        match direction {
            Direction::Forward => Box::new(blocks.into_iter().map(Ok)),
            Direction::Backward => Box::new(blocks.into_iter().rev().map(Ok)),
        }
    }

    fn iter_snapshots(&self, direction: Direction) -> SnapshotIter<'_> {
        let snapshots: Vec<Snapshot> = self.inner.read().snapshots.values().cloned().collect();
        match direction {
            Direction::Forward => Box::new(snapshots.into_iter().map(Ok)),
            Direction::Backward => Box::new(snapshots.into_iter().rev().map(Ok)),
        }
    }
}

impl LedgerWriter for InMemoryLedger {
    fn add_block(&self, block: Block, validate: bool) -> LedgerResult<()> {
        if validate {
            validate_next_block(self, &block)?.into_result()?;
        } else {
            let next = self.get_next_block_number()?;
            if block.number() != next {
                return Err(LedgerError::validation(
                    "message.block_number",
                    format!("expected {next}, found {}", block.number()),
                ));
            }
        }
        self.inner.write().blocks.insert(block.number(), block);
        Ok(())
    }

    fn add_snapshot(&self, snapshot: Snapshot) -> LedgerResult<()> {
        check_snapshot_shape(&snapshot)?;
        let key = snapshot.next_block_number();
        let mut inner = self.inner.write();
        if inner.snapshots.contains_key(&key) {
            return Err(LedgerError::validation(
                "last_block_number",
                format!("a snapshot covering up to block {key} already exists"),
            ));
        }
        inner.snapshots.insert(key, snapshot);
        Ok(())
    }

    fn clear(&self) -> LedgerResult<()> {
        let mut inner = self.inner.write();
        inner.blocks.clear();
        inner.snapshots.clear();
        Ok(())
    }
}
