//! Single-writer, append-only ledger for Strata.
//!
//! This crate provides:
//! - `LedgerReader` / `LedgerWriter` trait boundaries, with every navigation
//!   query defined over two iteration primitives
//! - Account-state derivation shared by block creation and validation
//! - Block and chain validation that can be run in tiles over block ranges
//! - Snapshot generation by folding blocks onto the closest snapshot
//! - `FileLedger`: chunked, compressed block files and write-once snapshot
//!   files under a single-writer file lock
//! - `InMemoryLedger` for tests and embedding

pub mod block_store;
pub mod codec;
pub mod config;
pub mod error;
pub mod factory;
pub mod file_ledger;
pub mod lock;
pub mod memory;
pub mod snapshot;
pub mod snapshot_store;
pub mod state;
pub mod traits;
pub mod validation;

pub use block_store::{BlockChunkStore, ChunkName};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult, ValidationError};
pub use factory::{coin_transfer, node_declaration, validator_schedule, BlockFactory};
pub use file_ledger::{FileLedger, PruneReport};
pub use lock::{LockCoordinator, LockGuard};
pub use memory::InMemoryLedger;
pub use snapshot::{fold_snapshot, generate_snapshot, next_block_identifier};
pub use snapshot_store::{SnapshotName, SnapshotStore};
pub use state::{derive_updated_account_states, AccountStateSource, LedgerView};
pub use traits::{BlockIter, Direction, LedgerReader, LedgerWriter, SnapshotIter};
pub use validation::{
    validate_next_block, BlockValidationReport, BlockValidator, ChainPosition, ChainValidator,
    ValidationStage,
};
