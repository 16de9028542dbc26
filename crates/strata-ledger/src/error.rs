use std::fmt;

use strata_crypto::{HasherError, SignatureError};
use strata_fs::FsError;
use strata_types::TypeError;

/// A structural or semantic rule a block, request, or snapshot broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `message.balance_lock`.
    pub field: String,
    pub reason: String,
    pub block_number: Option<u64>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
            block_number: None,
        }
    }

    /// Attach the block the error was found in, unless one is already set.
    pub fn at_block(mut self, block_number: u64) -> Self {
        self.block_number.get_or_insert(block_number);
        self
    }

    /// Prefix the field path with `parent`.
    pub fn within(mut self, parent: &str) -> Self {
        self.field = format!("{parent}.{}", self.field);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.block_number {
            write!(f, "block {n}: ")?;
        }
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ValidationError {}

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("ledger is locked by another writer")]
    Locked,

    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] FsError),

    #[error("codec error: {0}")]
    Codec(#[from] TypeError),

    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("hashing error: {0}")]
    Hashing(#[from] HasherError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(field, reason))
    }

    /// The validation failure behind this error, if it is one.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }

    /// Attach a block number to a validation failure; other errors pass through.
    pub fn at_block(self, block_number: u64) -> Self {
        match self {
            Self::Validation(err) => Self::Validation(err.at_block(block_number)),
            other => other,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_block_and_field() {
        let err = ValidationError::new("balance_lock", "stale lock")
            .within("message")
            .at_block(7);
        assert_eq!(err.to_string(), "block 7: message.balance_lock: stale lock");
    }

    #[test]
    fn first_block_number_wins() {
        let err = ValidationError::new("hash", "mismatch").at_block(3).at_block(9);
        assert_eq!(err.block_number, Some(3));
    }

    #[test]
    fn at_block_leaves_other_errors_alone() {
        let err = LedgerError::Locked.at_block(1);
        assert!(matches!(err, LedgerError::Locked));
        let err = LedgerError::validation("txs", "empty").at_block(1);
        assert_eq!(err.as_validation().and_then(|e| e.block_number), Some(1));
    }
}
