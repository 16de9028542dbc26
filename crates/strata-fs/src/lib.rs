//! Fan-out compressing file storage.
//!
//! The substrate under the Strata block and snapshot stores. Files are
//! addressed by name, nested under a short directory prefix derived from the
//! name, written atomically, and finalized once: compressed with the best of
//! the configured codecs and made read-only.

pub mod compression;
pub mod error;
pub mod fanout;
pub mod storage;

pub use compression::Compression;
pub use error::{FsError, Result};
pub use storage::{FileStorage, FileStorageConfig, SortOrder};
