use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::compression::Compression;
use crate::error::{FsError, Result};
use crate::fanout::fanout_path;

/// Prefix of in-flight temp files. Never visible through `list` or `load`.
const TEMP_PREFIX: &str = ".tmp-";

/// Ordering for [`FileStorage::list`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Configuration for [`FileStorage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStorageConfig {
    /// Number of fan-out directory levels.
    pub max_depth: usize,
    /// Codecs tried on finalize; the smallest output wins.
    pub compressors: Vec<Compression>,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            compressors: vec![Compression::Gzip, Compression::Bzip2, Compression::Xz],
        }
    }
}

/// A file as found on disk: where it is and which codec it is stored with.
#[derive(Clone, Debug)]
struct Located {
    path: PathBuf,
    compression: Option<Compression>,
}

/// Named-file storage with fan-out directories, atomic writes, and one-way
/// finalization.
///
/// A file is *open* while it is raw and writable. [`finalize`](Self::finalize)
/// makes it *finalized*: possibly compressed (a codec suffix is added to its
/// on-disk name) and read-only. Callers always use the logical name.
#[derive(Debug)]
pub struct FileStorage {
    base: PathBuf,
    config: FileStorageConfig,
}

impl FileStorage {
    pub fn new(base: impl Into<PathBuf>, config: FileStorageConfig) -> Self {
        Self {
            base: base.into(),
            config,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn config(&self) -> &FileStorageConfig {
        &self.config
    }

    /// On-disk path of the raw (uncompressed) file `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.starts_with(TEMP_PREFIX)
            || name.contains(['/', '\\'])
            || Compression::strip_suffix(name).1.is_some();
        if invalid {
            return Err(FsError::InvalidName(name.to_string()));
        }
        Ok(fanout_path(&self.base, name, self.config.max_depth))
    }

    /// Find `name` on disk, preferring a compressed copy over a raw one.
    fn locate(&self, name: &str) -> Result<Option<Located>> {
        let raw = self.path_for(name)?;
        for compression in Compression::ALL {
            let path = with_suffix(&raw, compression);
            if path.is_file() {
                return Ok(Some(Located {
                    path,
                    compression: Some(compression),
                }));
            }
        }
        if raw.is_file() {
            return Ok(Some(Located {
                path: raw,
                compression: None,
            }));
        }
        Ok(None)
    }

    fn require(&self, name: &str) -> Result<Located> {
        self.locate(name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    /// Write `data` as the full content of `name`, atomically.
    pub fn save(&self, name: &str, data: &[u8], finalize: bool) -> Result<()> {
        if let Some(found) = self.locate(name)? {
            if is_finalized(&found)? {
                return Err(FsError::Finalized(name.to_string()));
            }
        }
        let path = self.path_for(name)?;
        let temp = temp_file_beside(&path)?;
        write_and_sync(temp, data)?
            .persist(&path)
            .map_err(|e| FsError::Io(e.error))?;
        debug!(name, bytes = data.len(), "saved file");
        if finalize {
            self.finalize(name)?;
        }
        Ok(())
    }

    /// Append `data` to `name`, creating it if absent.
    ///
    /// The current content is copied into a temp file, extended, and renamed
    /// over the original, so a reader never sees a half-written append.
    pub fn append(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        let mut temp = temp_file_beside(&path)?;
        if let Some(found) = self.locate(name)? {
            if is_finalized(&found)? {
                return Err(FsError::Finalized(name.to_string()));
            }
            let mut current = File::open(&found.path)?;
            io::copy(&mut current, temp.as_file_mut())?;
        }
        write_and_sync(temp, data)?
            .persist(&path)
            .map_err(|e| FsError::Io(e.error))?;
        debug!(name, bytes = data.len(), "appended to file");
        Ok(())
    }

    /// Compress `name` with the best configured codec and make it read-only.
    ///
    /// Idempotent: a file that is already finalized is left untouched, apart
    /// from removing a raw copy left behind by an interrupted finalize.
    pub fn finalize(&self, name: &str) -> Result<()> {
        let found = self.require(name)?;
        let raw_path = self.path_for(name)?;
        if found.compression.is_some() {
            if raw_path.is_file() {
                warn!(name, "removing raw leftover of an interrupted finalize");
                fs::remove_file(&raw_path)?;
            }
            return Ok(());
        }
        if is_read_only(&found.path)? {
            return Ok(());
        }

        let data = fs::read(&raw_path)?;
        let mut best: Option<(Compression, Vec<u8>)> = None;
        for &compression in &self.config.compressors {
            let packed = compression.compress(&data)?;
            let smaller = best
                .as_ref()
                .map_or(packed.len() < data.len(), |(_, b)| packed.len() < b.len());
            if smaller {
                best = Some((compression, packed));
            }
        }

        match best {
            Some((compression, packed)) => {
                let target = with_suffix(&raw_path, compression);
                let temp = write_and_sync(temp_file_beside(&target)?, &packed)?;
                set_read_only(temp.as_file())?;
                temp.persist(&target).map_err(|e| FsError::Io(e.error))?;
                fs::remove_file(&raw_path)?;
                info!(
                    name,
                    %compression,
                    raw = data.len(),
                    compressed = packed.len(),
                    "finalized file"
                );
            }
            None => {
                set_read_only(&File::open(&raw_path)?)?;
                info!(name, raw = data.len(), "finalized file uncompressed");
            }
        }
        Ok(())
    }

    /// Full content of `name`, decompressed.
    pub fn load(&self, name: &str) -> Result<Vec<u8>> {
        let found = self.require(name)?;
        let data = fs::read(&found.path)?;
        match found.compression {
            Some(compression) => compression.decompress(&data),
            None => Ok(data),
        }
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.locate(name)?.is_some())
    }

    pub fn is_finalized(&self, name: &str) -> Result<bool> {
        is_finalized(&self.require(name)?)
    }

    /// Codec `name` is stored with, `None` when it is stored raw.
    pub fn stored_compression(&self, name: &str) -> Result<Option<Compression>> {
        Ok(self.require(name)?.compression)
    }

    /// Rename `from` to `to`, keeping its codec suffix.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let found = self.require(from)?;
        let mut target = self.path_for(to)?;
        if let Some(compression) = found.compression {
            target = with_suffix(&target, compression);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&found.path, &target)?;
        debug!(from, to, "renamed file");
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let found = self.require(name)?;
        fs::remove_file(&found.path)?;
        debug!(name, "removed file");
        Ok(())
    }

    pub fn modified_at(&self, name: &str) -> Result<SystemTime> {
        let found = self.require(name)?;
        Ok(fs::metadata(&found.path)?.modified()?)
    }

    /// Logical names of every stored file.
    ///
    /// With `order = None` names come back in directory-walk order.
    pub fn list(&self, order: Option<SortOrder>) -> Result<Vec<String>> {
        if !self.base.is_dir() {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.base) {
            let entry = entry.map_err(|e| FsError::Io(io::Error::other(e.to_string())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            if file_name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let (name, _) = Compression::strip_suffix(file_name);
            if seen.insert(name.to_string()) {
                names.push(name.to_string());
            }
        }
        match order {
            Some(SortOrder::Ascending) => names.sort(),
            Some(SortOrder::Descending) => names.sort_by(|a, b| b.cmp(a)),
            None => {}
        }
        Ok(names)
    }

    /// Remove every file and directory under the base directory.
    pub fn clear(&self) -> Result<()> {
        if self.base.exists() {
            fs::remove_dir_all(&self.base)?;
            info!(base = %self.base.display(), "cleared storage");
        }
        Ok(())
    }
}

fn with_suffix(raw: &Path, compression: Compression) -> PathBuf {
    let mut os = raw.as_os_str().to_owned();
    os.push(".");
    os.push(compression.extension());
    PathBuf::from(os)
}

fn temp_file_beside(path: &Path) -> Result<NamedTempFile> {
    let dir = path
        .parent()
        .ok_or_else(|| FsError::InvalidName(path.display().to_string()))?;
    fs::create_dir_all(dir)?;
    Ok(tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)?)
}

fn write_and_sync(mut temp: NamedTempFile, data: &[u8]) -> Result<NamedTempFile> {
    temp.write_all(data)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    Ok(temp)
}

fn is_read_only(path: &Path) -> Result<bool> {
    Ok(fs::metadata(path)?.permissions().readonly())
}

fn is_finalized(found: &Located) -> Result<bool> {
    Ok(found.compression.is_some() || is_read_only(&found.path)?)
}

fn set_read_only(file: &File) -> Result<()> {
    let mut permissions = file.metadata()?.permissions();
    permissions.set_readonly(true);
    file.set_permissions(permissions)?;
    Ok(())
}
