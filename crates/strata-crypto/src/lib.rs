//! Cryptographic primitives for the Strata ledger.
//!
//! Provides SHA3-256 hashing over canonical bytes, Ed25519 signing and
//! verification, and the traits that tie both to ledger entities.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;
pub mod signable;
pub mod signer;

pub use hasher::{HasherError, Sha3Hasher};
pub use signable::{
    make_balance_lock, sign_block, sign_message, sign_snapshot, CanonicalMessage, SignedEntity,
};
pub use signer::{SignatureError, SigningKey, VerifyingKey};
