//! Local on-disk build cache
//!
//! Entries are opaque byte blobs keyed by [`CacheKey`] and stored as files
//! under `<root>/entries/`. All access goes through a [`CacheGatekeeper`], so
//! a store written by an incompatible layout version is never read.

mod gatekeeper;

pub use gatekeeper::{CacheGatekeeper, LOCK_FILE, StoreTag, TAG_FILE};

use crate::config::CacheConfig;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Subdirectory holding the entries
pub const ENTRIES_DIR: &str = "entries";

/// Identity of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Use a printable key as-is
    ///
    /// Only ASCII letters, digits, `-` and `_` are accepted, so a key is
    /// always a safe file name.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::configuration("cache key must not be empty"));
        }
        if !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::configuration(format!(
                "cache key '{key}' may only contain ASCII letters, digits, '-' and '_'"
            )));
        }
        Ok(Self(key))
    }

    /// Hex-encode a binary key such as a digest
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Key text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A version-guarded directory of cache entries
#[derive(Debug, Clone)]
pub struct LocalBuildCache {
    gatekeeper: CacheGatekeeper,
}

impl LocalBuildCache {
    /// Open the store at `root` expecting `layout_version`
    ///
    /// Nothing touches the disk until the first load or store.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>, layout_version: u32) -> Self {
        Self {
            gatekeeper: CacheGatekeeper::new(root, layout_version),
        }
    }

    /// Open the store described by `config`
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Ok(Self::open(config.resolve_root()?, config.layout_version))
    }

    /// Store directory
    #[must_use]
    pub fn root(&self) -> &Path {
        self.gatekeeper.root()
    }

    /// Layout version this cache reads and writes
    #[must_use]
    pub const fn layout_version(&self) -> u32 {
        self.gatekeeper.layout_version()
    }

    /// Hand the entry for `key` to `reader`
    ///
    /// Returns `Ok(None)` when there is no such entry or the store is
    /// incompatible. The shared lock is held while `reader` runs. I/O
    /// failures surface as [`Error::CacheUnavailable`].
    pub fn load<T>(
        &self,
        key: &CacheKey,
        reader: impl FnOnce(&mut dyn Read) -> Result<T>,
    ) -> Result<Option<T>> {
        let loaded = self.gatekeeper.with_read_access(|root| {
            let path = entry_path(root, key);
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(Error::io(e, &path, "open")),
            };
            tracing::trace!(key = %key, entry = %path.display(), "Reading cache entry");
            reader(&mut BufReader::new(file)).map(Some)
        });
        Ok(loaded.map_err(|e| e.into_unavailable(self.root()))?.flatten())
    }

    /// Write a new entry for `key` with `writer`
    ///
    /// The content goes to a temporary file that is renamed into place only
    /// after `writer` succeeds, so readers never see a partial entry and a
    /// failed write leaves no entry behind. I/O failures of the store itself
    /// surface as [`Error::CacheUnavailable`].
    pub fn store(
        &self,
        key: &CacheKey,
        writer: impl FnOnce(&mut dyn Write) -> Result<()>,
    ) -> Result<()> {
        self.gatekeeper.with_write_access(|root| {
            let dir = root.join(ENTRIES_DIR);
            fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;

            let path = entry_path(root, key);
            let temp_path = dir.join(format!(".{key}.{}.tmp", std::process::id()));
            let result = write_entry(&temp_path, writer)
                .and_then(|()| fs::rename(&temp_path, &path).map_err(|e| Error::io(e, &path, "rename")));
            if result.is_err() {
                let _ = fs::remove_file(&temp_path);
            }
            result
        })
        .map_err(|e| e.into_unavailable(self.root()))
    }

    /// Whether an entry for `key` exists in a compatible store
    pub fn contains(&self, key: &CacheKey) -> Result<bool> {
        Ok(self
            .gatekeeper
            .with_read_access(|root| Ok(entry_path(root, key).is_file()))
            .map_err(|e| e.into_unavailable(self.root()))?
            .unwrap_or(false))
    }
}

fn entry_path(root: &Path, key: &CacheKey) -> PathBuf {
    root.join(ENTRIES_DIR).join(key.as_str())
}

fn write_entry(path: &Path, writer: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(e, path, "create"))?;
    let mut out = BufWriter::new(file);
    writer(&mut out)?;
    let file = out
        .into_inner()
        .map_err(|e| Error::io(e.into_error(), path, "flush"))?;
    file.sync_all().map_err(|e| Error::io(e, path, "sync_all"))
}
