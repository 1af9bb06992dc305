//! Layout-version check and cross-process locking for a store directory

use crate::{Error, Result};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// File holding the store's [`StoreTag`]
pub const TAG_FILE: &str = "layout.json";

/// File the OS-level lock is taken on
pub const LOCK_FILE: &str = "store.lock";

/// Persisted marker of a store's on-disk layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreTag {
    /// Layout version the store was created with
    pub layout_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Holds the store lock until dropped
#[derive(Debug)]
struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    fn acquire(root: &Path, mode: LockMode) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::unavailable(root, format!("cannot open lock file: {e}")))?;

        tracing::trace!(lock = %path.display(), ?mode, "Waiting for store lock");
        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|e| Error::unavailable(root, format!("cannot lock store: {e}")))?;
        tracing::trace!(lock = %path.display(), ?mode, "Store lock acquired");

        Ok(Self { file, path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well; unlocking explicitly
        // just makes the release independent of when the fd is closed.
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release store lock");
        }
    }
}

/// Guards every access to a store directory
///
/// Reads run under a shared lock and only against a store whose tag matches
/// the expected layout version; anything else reads as empty. Writes run
/// under the exclusive lock and first bring an untagged or outdated store to
/// the expected layout by wiping it.
#[derive(Debug, Clone)]
pub struct CacheGatekeeper {
    root: PathBuf,
    layout_version: u32,
}

impl CacheGatekeeper {
    /// Guard the store at `root` for `layout_version`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, layout_version: u32) -> Self {
        Self {
            root: root.into(),
            layout_version,
        }
    }

    /// Store directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Expected layout version
    #[must_use]
    pub const fn layout_version(&self) -> u32 {
        self.layout_version
    }

    /// Run `action` under a shared lock
    ///
    /// Returns `Ok(None)` without calling `action` when the store does not
    /// exist or carries a different layout version.
    pub fn with_read_access<T>(&self, action: impl FnOnce(&Path) -> Result<T>) -> Result<Option<T>> {
        if !self.root.is_dir() {
            tracing::debug!(root = %self.root.display(), "Cache store does not exist yet");
            return Ok(None);
        }

        let _lock = StoreLock::acquire(&self.root, LockMode::Shared)?;
        match self.read_tag()? {
            Some(tag) if tag.layout_version == self.layout_version => action(&self.root).map(Some),
            Some(tag) => {
                tracing::debug!(
                    root = %self.root.display(),
                    found = tag.layout_version,
                    expected = self.layout_version,
                    "Cache store layout differs, treating it as empty"
                );
                Ok(None)
            }
            None => {
                tracing::debug!(root = %self.root.display(), "Cache store is untagged, treating it as empty");
                Ok(None)
            }
        }
    }

    /// Run `action` under the exclusive lock
    ///
    /// Creates the store if needed and resets it when its tag does not match
    /// the expected layout version. The lock is released on every exit path,
    /// including when `action` fails.
    pub fn with_write_access<T>(&self, action: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        fs::create_dir_all(&self.root)
            .map_err(|e| Error::unavailable(&self.root, format!("cannot create store: {e}")))?;

        let _lock = StoreLock::acquire(&self.root, LockMode::Exclusive)?;
        match self.read_tag()? {
            Some(tag) if tag.layout_version == self.layout_version => {}
            found => self.initialize(found)?,
        }
        action(&self.root)
    }

    /// Tag currently on disk; `None` when absent or unreadable
    fn read_tag(&self) -> Result<Option<StoreTag>> {
        let path = self.root.join(TAG_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, &path, "read").into_unavailable(&self.root)),
        };
        match serde_json::from_str(&contents) {
            Ok(tag) => Ok(Some(tag)),
            Err(e) => {
                tracing::warn!(tag = %path.display(), error = %e, "Ignoring malformed store tag");
                Ok(None)
            }
        }
    }

    /// Wipe the store and tag it with the expected layout version
    fn initialize(&self, found: Option<StoreTag>) -> Result<()> {
        self.reset(found)
            .map_err(|e| e.into_unavailable(&self.root))
    }

    fn reset(&self, found: Option<StoreTag>) -> Result<()> {
        tracing::info!(
            root = %self.root.display(),
            found = found.map(|t| t.layout_version),
            expected = self.layout_version,
            "Initializing cache store"
        );

        let entries =
            fs::read_dir(&self.root).map_err(|e| Error::io(e, &self.root, "read_dir"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &self.root, "read_dir"))?;
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| Error::io(e, &path, "stat"))?;
            let removed = if file_type.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| Error::io(e, &path, "remove"))?;
        }

        let tag = StoreTag {
            layout_version: self.layout_version,
        };
        let contents = serde_json::to_string_pretty(&tag)
            .map_err(|e| Error::configuration(format!("Failed to serialize store tag: {e}")))?;
        let path = self.root.join(TAG_FILE);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, contents).map_err(|e| Error::io(e, &temp_path, "write"))?;
        fs::rename(&temp_path, &path).map_err(|e| Error::io(e, &path, "rename"))?;
        Ok(())
    }
}
