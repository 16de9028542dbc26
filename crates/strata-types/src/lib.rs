//! Foundation types for the Strata ledger.
//!
//! This crate provides the entity model shared by every other Strata crate:
//! account identities, signed change requests, blocks, snapshots, and the two
//! encodings they travel in.
//!
//! # Key Types
//!
//! - [`AccountId`]: Ed25519 public key identifying an account
//! - [`HashValue`]: SHA3-256 digest (block hashes, identifiers, balance locks)
//! - [`AccountState`]: Partial per-account state carried by blocks and snapshots
//! - [`SignedChangeRequest`]: The change a block applies, as signed by its requester
//! - [`Block`]: One accepted change linked to its predecessor
//! - [`Snapshot`]: Full account-state checkpoint
//!
//! # Encodings
//!
//! - [`canonical`]: sorted-key, whitespace-free JSON used for hashing and signing
//! - [`compact`]: aliased, byte-packed storage form

pub mod account;
pub mod block;
pub mod canonical;
pub mod compact;
pub mod error;
pub mod identity;
pub mod request;
pub mod snapshot;

pub use account::{AccountState, NodeInfo, ValidatorSchedule};
pub use block::{AccountStates, Block, BlockMessage};
pub use error::TypeError;
pub use identity::{AccountId, HashValue, Signature};
pub use request::{
    BlockType, CoinTransferMessage, NodeDeclarationMessage, SignedChangeRequest, SignedMessage,
    Transaction, ValidatorScheduleMessage, MAX_MEMO_LENGTH,
};
pub use snapshot::{Snapshot, SnapshotMessage};
