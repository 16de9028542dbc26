//! Chunked block storage.
//!
//! Blocks are appended to an *open* chunk file named
//! `{start}-xxxxxxxxxxxxxxxxxxxx-chunk.bin`. Once the chunk holds
//! `block_chunk_size` blocks, or a snapshot covers it, it is renamed to its
//! concrete `{start}-{end}-chunk.bin` and finalized (compressed, read-only).
//! Both numbers are zero-padded to 20 digits so names sort by block number,
//! with an open chunk sorting after every closed chunk sharing its start.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use lru::LruCache;
use parking_lot::Mutex;
use strata_fs::{Compression, FileStorage, SortOrder};
use strata_types::Block;
use tracing::{debug, info, warn};

use crate::codec::{decode_records, encode_record};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::traits::{BlockIter, Direction};

/// Directory holding chunk files, relative to the ledger base directory.
pub const BLOCK_CHUNKS_DIR: &str = "block-chunks";

const NUMBER_WIDTH: usize = 20;
const OPEN_END: &str = "xxxxxxxxxxxxxxxxxxxx";
const CHUNK_SUFFIX: &str = "-chunk.bin";

/// Block range a chunk file covers, as encoded in its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkName {
    pub start: u64,
    /// `None` while the chunk is still open for appends.
    pub end: Option<u64>,
}

impl ChunkName {
    pub fn open(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn closed(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn file_name(&self) -> String {
        match self.end {
            Some(end) => format!(
                "{:0w$}-{:0w$}{CHUNK_SUFFIX}",
                self.start,
                end,
                w = NUMBER_WIDTH
            ),
            None => format!("{:0w$}-{OPEN_END}{CHUNK_SUFFIX}", self.start, w = NUMBER_WIDTH),
        }
    }

    /// Parse a logical chunk file name. Anything else yields `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(CHUNK_SUFFIX)?;
        let (start, end) = stem.split_once('-')?;
        let start = parse_number(start)?;
        let end = if !end.is_empty() && end.bytes().all(|b| b == b'x') {
            None
        } else {
            Some(parse_number(end)?)
        };
        if end.is_some_and(|end| end < start) {
            return None;
        }
        Some(Self { start, end })
    }
}

fn parse_number(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Clone)]
struct CachedBlock {
    block: Block,
    chunk: ChunkName,
    compression: Option<Compression>,
}

/// Append-only block store over [`FileStorage`].
///
/// Decoded blocks are kept in a bounded LRU cache together with the chunk
/// they came from. The concrete end of an open chunk is found by decoding it
/// and cached against the file's modification time.
pub struct BlockChunkStore {
    storage: FileStorage,
    chunk_size: u64,
    block_cache: Mutex<LruCache<u64, CachedBlock>>,
    open_ends: Mutex<HashMap<String, (SystemTime, Option<u64>)>>,
    needs_healing: AtomicBool,
}

impl BlockChunkStore {
    pub fn new(config: &LedgerConfig) -> LedgerResult<Self> {
        let capacity = NonZeroUsize::new(config.effective_block_cache_size())
            .ok_or_else(|| LedgerError::Config("block cache size must be positive".into()))?;
        Ok(Self {
            storage: FileStorage::new(
                config.base_directory.join(BLOCK_CHUNKS_DIR),
                config.storage_config(),
            ),
            chunk_size: config.block_chunk_size,
            block_cache: Mutex::new(LruCache::new(capacity)),
            open_ends: Mutex::new(HashMap::new()),
            // Whatever a previous writer left behind is checked on first write.
            needs_healing: AtomicBool::new(true),
        })
    }

    pub fn base_dir(&self) -> &Path {
        self.storage.base_dir()
    }

    /// Every chunk, ascending by start block.
    pub fn chunks(&self) -> LedgerResult<Vec<ChunkName>> {
        let mut chunks = Vec::new();
        for name in self.storage.list(Some(SortOrder::Ascending))? {
            match ChunkName::parse(&name) {
                Some(chunk) => chunks.push(chunk),
                None => debug!(name, "ignoring unrecognized file in chunk store"),
            }
        }
        Ok(chunks)
    }

    /// Decode all blocks of `chunk`, in order.
    ///
    /// A torn tail is tolerated on an open chunk (the intact prefix is
    /// returned and the store is flagged for healing) but not on a finalized
    /// one.
    pub fn read_chunk(&self, chunk: ChunkName) -> LedgerResult<Vec<Block>> {
        let name = chunk.file_name();
        let data = self.storage.load(&name)?;
        let decoded = decode_records::<Block>(&data)?;
        if decoded.torn {
            if !chunk.is_open() {
                return Err(LedgerError::InternalConsistency(format!(
                    "finalized chunk {name} is corrupt"
                )));
            }
            warn!(chunk = %name, valid = decoded.valid_len, len = data.len(), "open chunk has a torn tail");
            self.needs_healing.store(true, Ordering::Release);
        }
        for (offset, block) in decoded.records.iter().enumerate() {
            let expected = chunk.start + offset as u64;
            let beyond_end = chunk.end.is_some_and(|end| block.number() > end);
            if block.number() != expected || beyond_end {
                return Err(LedgerError::InternalConsistency(format!(
                    "chunk {name} holds block {} where {expected} belongs",
                    block.number()
                )));
            }
        }
        if chunk.end.is_some_and(|end| end + 1 != chunk.start + decoded.records.len() as u64) {
            return Err(LedgerError::InternalConsistency(format!(
                "chunk {name} holds {} blocks",
                decoded.records.len()
            )));
        }

        let compression = self.storage.stored_compression(&name)?;
        let mut cache = self.block_cache.lock();
        for block in &decoded.records {
            cache.put(
                block.number(),
                CachedBlock {
                    block: block.clone(),
                    chunk,
                    compression,
                },
            );
        }
        debug!(chunk = %name, blocks = decoded.records.len(), "read chunk");
        Ok(decoded.records)
    }

    /// Last block number in `chunk`; `None` for an empty open chunk.
    pub fn resolve_end(&self, chunk: ChunkName) -> LedgerResult<Option<u64>> {
        if let Some(end) = chunk.end {
            return Ok(Some(end));
        }
        let name = chunk.file_name();
        let modified = self.storage.modified_at(&name)?;
        if let Some((seen, end)) = self.open_ends.lock().get(&name) {
            if *seen == modified {
                return Ok(*end);
            }
        }
        let end = self.read_chunk(chunk)?.last().map(Block::number);
        self.open_ends.lock().insert(name, (modified, end));
        Ok(end)
    }

    /// Chunk and codec block `block_number` was last read from, if cached.
    pub fn cached_location(&self, block_number: u64) -> Option<(ChunkName, Option<Compression>)> {
        self.block_cache
            .lock()
            .peek(&block_number)
            .map(|cached| (cached.chunk, cached.compression))
    }

    pub fn get_block(&self, block_number: u64) -> LedgerResult<Option<Block>> {
        if let Some(cached) = self.block_cache.lock().get(&block_number) {
            return Ok(Some(cached.block.clone()));
        }
        let chunks = self.chunks()?;
        let Some(chunk) = chunks.iter().rev().find(|c| c.start <= block_number) else {
            return Ok(None);
        };
        if chunk.end.is_some_and(|end| end < block_number) {
            return Ok(None);
        }
        let blocks = self.read_chunk(*chunk)?;
        let offset = usize::try_from(block_number - chunk.start).unwrap_or(usize::MAX);
        Ok(blocks.into_iter().nth(offset))
    }

    pub fn first_block_number(&self) -> LedgerResult<Option<u64>> {
        for chunk in self.chunks()? {
            if self.resolve_end(chunk)?.is_some() {
                return Ok(Some(chunk.start));
            }
        }
        Ok(None)
    }

    pub fn last_block_number(&self) -> LedgerResult<Option<u64>> {
        for chunk in self.chunks()?.into_iter().rev() {
            if let Some(end) = self.resolve_end(chunk)? {
                return Ok(Some(end));
            }
        }
        Ok(None)
    }

    /// Lazily decode `chunks` one at a time.
    fn iter_chunks(&self, chunks: Vec<ChunkName>, direction: Direction) -> BlockIter<'_> {
        Box::new(chunks.into_iter().flat_map(move |chunk| {
            let items: Vec<LedgerResult<Block>> = match self.read_chunk(chunk) {
                Ok(mut blocks) => {
                    if direction == Direction::Backward {
                        blocks.reverse();
                    }
                    blocks.into_iter().map(Ok).collect()
                }
                Err(err) => vec![Err(err)],
            };
            items
        }))
    }

    pub fn iter_blocks(&self, direction: Direction) -> BlockIter<'_> {
        match self.chunks() {
            Ok(mut chunks) => {
                if direction == Direction::Backward {
                    chunks.reverse();
                }
                self.iter_chunks(chunks, direction)
            }
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }

    /// Blocks from `block_number` upward, skipping chunks that end before it.
    pub fn iter_blocks_from(&self, block_number: u64) -> BlockIter<'_> {
        let chunks = match self.chunks() {
            Ok(chunks) => chunks,
            Err(err) => return Box::new(std::iter::once(Err(err))),
        };
        let chunks = chunks
            .into_iter()
            .filter(|c| c.end.map_or(true, |end| end >= block_number))
            .collect();
        Box::new(
            self.iter_chunks(chunks, Direction::Forward)
                .skip_while(move |item| matches!(item, Ok(b) if b.number() < block_number)),
        )
    }

    /// Blocks from `block_number` downward, skipping chunks that start after it.
    pub fn iter_blocks_backward_from(&self, block_number: u64) -> BlockIter<'_> {
        let chunks = match self.chunks() {
            Ok(chunks) => chunks,
            Err(err) => return Box::new(std::iter::once(Err(err))),
        };
        let chunks = chunks
            .into_iter()
            .rev()
            .filter(|c| c.start <= block_number)
            .collect();
        Box::new(
            self.iter_chunks(chunks, Direction::Backward)
                .skip_while(move |item| matches!(item, Ok(b) if b.number() > block_number)),
        )
    }

    /// Append `block` to the open chunk, finalizing it once full.
    ///
    /// The caller holds the write lock and has already validated the block.
    pub fn append(&self, block: &Block) -> LedgerResult<()> {
        let number = block.number();
        if let Some(last) = self.last_block_number()? {
            if number != last + 1 {
                return Err(LedgerError::InternalConsistency(format!(
                    "appending block {number} after block {last}"
                )));
            }
        }
        let chunk = match self.chunks()?.last() {
            Some(chunk) if chunk.is_open() => *chunk,
            _ => ChunkName::open(number),
        };
        let name = chunk.file_name();
        self.storage.append(&name, &encode_record(block)?)?;
        self.open_ends.lock().remove(&name);
        self.block_cache.lock().put(
            number,
            CachedBlock {
                block: block.clone(),
                chunk,
                compression: None,
            },
        );
        debug!(block_number = number, chunk = %name, "appended block");

        if number + 1 - chunk.start >= self.chunk_size {
            self.finalize_chunk(chunk, number)?;
        }
        Ok(())
    }

    /// Rename the open `chunk` to its concrete range and finalize it.
    fn finalize_chunk(&self, chunk: ChunkName, end: u64) -> LedgerResult<()> {
        let open_name = chunk.file_name();
        let closed = ChunkName::closed(chunk.start, end);
        let closed_name = closed.file_name();
        self.storage.rename(&open_name, &closed_name)?;
        self.storage.finalize(&closed_name)?;
        self.open_ends.lock().remove(&open_name);
        let mut cache = self.block_cache.lock();
        for number in chunk.start..=end {
            cache.pop(&number);
        }
        info!(chunk = %closed_name, blocks = end + 1 - chunk.start, "finalized chunk");
        Ok(())
    }

    /// Rewrite an open chunk without its torn tail. Returns the chunk's last
    /// block, `None` if nothing intact remained and the file was removed.
    fn truncate_torn(&self, chunk: ChunkName) -> LedgerResult<Option<u64>> {
        let name = chunk.file_name();
        let data = self.storage.load(&name)?;
        let decoded = decode_records::<Block>(&data)?;
        if decoded.torn {
            warn!(chunk = %name, dropped = data.len() - decoded.valid_len, "truncating torn chunk tail");
            if decoded.valid_len == 0 {
                self.storage.remove(&name)?;
            } else {
                self.storage.save(&name, &data[..decoded.valid_len], false)?;
            }
            self.open_ends.lock().remove(&name);
        } else if decoded.records.is_empty() {
            self.storage.remove(&name)?;
        }
        Ok(decoded.records.last().map(Block::number))
    }

    /// Finalize the open chunk if it holds block `last`.
    pub fn finalize_open_through(&self, last: u64) -> LedgerResult<()> {
        let Some(chunk) = self.chunks()?.into_iter().find(ChunkName::is_open) else {
            return Ok(());
        };
        if chunk.start > last {
            return Ok(());
        }
        if let Some(end) = self.truncate_torn(chunk)? {
            self.finalize_chunk(chunk, end)?;
        }
        Ok(())
    }

    /// Finalize every open chunk, and any closed chunk an interrupted
    /// finalize left writable. Idempotent.
    pub fn finalize_all_open(&self) -> LedgerResult<()> {
        for chunk in self.chunks()?.into_iter().filter(ChunkName::is_open) {
            if let Some(end) = self.truncate_torn(chunk)? {
                self.finalize_chunk(chunk, end)?;
            }
        }
        self.finalize_closed()?;
        Ok(())
    }

    /// Finalize closed chunks that were renamed but never finalized.
    fn finalize_closed(&self) -> LedgerResult<usize> {
        let mut finalized = 0;
        for chunk in self.chunks()?.into_iter().filter(|c| !c.is_open()) {
            let name = chunk.file_name();
            if !self.storage.is_finalized(&name)? {
                warn!(chunk = %name, "finalizing closed chunk left writable");
                self.storage.finalize(&name)?;
                finalized += 1;
            }
        }
        Ok(finalized)
    }

    pub fn needs_healing(&self) -> bool {
        self.needs_healing.load(Ordering::Acquire)
    }

    /// Repair what an interrupted writer left behind.
    ///
    /// Open chunks followed by a later chunk, or fully covered by the latest
    /// snapshot, are finalized. A torn tail on the live open chunk is cut.
    /// Closed chunks that are still writable are finalized.
    pub fn heal(&self, last_snapshot_block: Option<u64>) -> LedgerResult<()> {
        let chunks = self.chunks()?;
        let mut healed = 0usize;
        for (index, chunk) in chunks.iter().enumerate() {
            if !chunk.is_open() {
                continue;
            }
            let superseded = index + 1 < chunks.len();
            let Some(end) = self.truncate_torn(*chunk)? else {
                healed += 1;
                continue;
            };
            let covered = last_snapshot_block.is_some_and(|last| last >= end);
            if superseded || covered {
                self.finalize_chunk(*chunk, end)?;
                healed += 1;
            }
        }
        healed += self.finalize_closed()?;
        self.needs_healing.store(false, Ordering::Release);
        if healed > 0 {
            info!(healed, "healed chunk store");
        }
        Ok(())
    }

    /// Remove finalized chunks whose blocks all precede `first_kept`.
    pub fn remove_chunks_before(&self, first_kept: u64) -> LedgerResult<usize> {
        let mut removed = 0;
        for chunk in self.chunks()? {
            if chunk.end.is_some_and(|end| end < first_kept) {
                self.storage.remove(&chunk.file_name())?;
                removed += 1;
            }
        }
        if removed > 0 {
            self.invalidate_caches();
            info!(removed, first_kept, "removed block chunks");
        }
        Ok(removed)
    }

    pub fn clear(&self) -> LedgerResult<()> {
        self.storage.clear()?;
        self.invalidate_caches();
        Ok(())
    }

    pub fn invalidate_caches(&self) {
        self.block_cache.lock().clear();
        self.open_ends.lock().clear();
    }
}
