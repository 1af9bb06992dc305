//! Storing and restoring a task's outputs through the local build cache
//!
//! [`TaskOutputCache`] ties the codec to the store: outputs are packed into a
//! [`StreamBuffer`] first and only then written under the exclusive lock, and
//! loads copy the entry into a buffer under the shared lock before unpacking,
//! so no lock is held while the task's output directories are touched.
//!
//! Capture, restore and availability problems never fail the caller. They
//! are logged, emitted as cache events and reported as a miss or a skipped
//! store, after which the task simply runs as if there were no cache.

use crate::archive::{ArchiveStats, FileAttributes, NativeAttributes, OutputProperties, TarTaskOutputPacker};
use crate::buffer::StreamBuffer;
use crate::config::CacheConfig;
use crate::store::{CacheKey, LocalBuildCache};
use crate::{Error, Result};
use outcache_events::{
    emit_cache_failed, emit_cache_hit, emit_cache_miss, emit_cache_stored, emit_cache_unavailable,
};

/// Result of looking up a task's outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Outputs were restored onto disk
    Hit(ArchiveStats),
    /// Nothing usable was cached; the task has to run
    Miss,
}

impl LoadOutcome {
    /// Whether outputs were restored
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Result of offering a task's outputs to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// An entry of `bytes` bytes was written
    Stored {
        /// Archive size
        bytes: u64,
    },
    /// Nothing was written
    Skipped,
}

/// Cache front end used by a task executor
#[derive(Debug, Clone)]
pub struct TaskOutputCache<A = NativeAttributes> {
    cache: LocalBuildCache,
    packer: TarTaskOutputPacker<A>,
    initial_chunk_size: usize,
    max_chunk_size: usize,
}

impl TaskOutputCache<NativeAttributes> {
    /// Cache outputs in `cache` using native file attributes
    #[must_use]
    pub fn new(cache: LocalBuildCache) -> Self {
        Self::with_packer(cache, TarTaskOutputPacker::new())
    }

    /// Build from configuration
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let mut output_cache = Self::new(LocalBuildCache::from_config(config)?);
        output_cache.initial_chunk_size = config.initial_chunk_size;
        output_cache.max_chunk_size = config.max_chunk_size;
        Ok(output_cache)
    }
}

impl<A: FileAttributes> TaskOutputCache<A> {
    /// Cache outputs in `cache` with a custom packer
    #[must_use]
    pub fn with_packer(cache: LocalBuildCache, packer: TarTaskOutputPacker<A>) -> Self {
        let defaults = CacheConfig::default();
        Self {
            cache,
            packer,
            initial_chunk_size: defaults.initial_chunk_size,
            max_chunk_size: defaults.max_chunk_size,
        }
    }

    /// Underlying store
    #[must_use]
    pub const fn cache(&self) -> &LocalBuildCache {
        &self.cache
    }

    /// Restore the outputs of `task` cached under `key`
    ///
    /// A [`LoadOutcome::Miss`] after a failed restore leaves the outputs in
    /// an undefined state; the task must run and overwrite them.
    pub fn load(&self, task: &str, key: &CacheKey, outputs: &OutputProperties) -> Result<LoadOutcome> {
        let loaded = self.cache.load(key, |input| {
            let mut buffer = self.new_buffer();
            buffer.read_fully(input).map_err(|e| Error::Restore {
                message: format!("reading cache entry {key} failed"),
                source: Some(e),
            })?;
            Ok(buffer)
        });

        let buffer = match loaded {
            Ok(Some(buffer)) => buffer,
            Ok(None) => {
                emit_cache_miss!(task, key);
                return Ok(LoadOutcome::Miss);
            }
            Err(e) => {
                degrade(task, "load", e)?;
                return Ok(LoadOutcome::Miss);
            }
        };

        match self.packer.unpack(outputs, buffer) {
            Ok(stats) => {
                emit_cache_hit!(task, key, stats.entries);
                Ok(LoadOutcome::Hit(stats))
            }
            Err(e) if e.is_cache_miss() => {
                tracing::warn!(task, cache_key = %key, error = %e, "Discarding cached outputs");
                emit_cache_miss!(task, key, e);
                Ok(LoadOutcome::Miss)
            }
            Err(e) => Err(e),
        }
    }

    /// Pack the outputs of `task` and store them under `key`
    pub fn store(&self, task: &str, key: &CacheKey, outputs: &OutputProperties) -> Result<StoreOutcome> {
        if !outputs.is_cacheable() {
            tracing::debug!(task, "Outputs are not cacheable, not storing");
            return Ok(StoreOutcome::Skipped);
        }

        let mut buffer = self.new_buffer();
        if let Err(e) = self.packer.pack(outputs, &mut buffer) {
            degrade(task, "pack", e)?;
            return Ok(StoreOutcome::Skipped);
        }

        let bytes = buffer.total_bytes_unread() as u64;
        match self
            .cache
            .store(key, |out| buffer.write_to(out).map(|_| ()))
        {
            Ok(()) => {
                emit_cache_stored!(task, key, bytes);
                Ok(StoreOutcome::Stored { bytes })
            }
            Err(e) => {
                degrade(task, "store", e)?;
                Ok(StoreOutcome::Skipped)
            }
        }
    }

    fn new_buffer(&self) -> StreamBuffer {
        StreamBuffer::with_chunk_limits(self.initial_chunk_size, self.max_chunk_size)
    }
}

/// Swallow errors that only cost this one cache operation
fn degrade(task: &str, operation: &str, error: Error) -> Result<()> {
    match failure_kind(&error) {
        Some("unavailable") => emit_cache_unavailable!(task, operation, error),
        Some(kind) => emit_cache_failed!(task, operation, kind, error),
        None => return Err(error),
    }
    Ok(())
}

/// Event kind of an error the cache recovers from, `None` for defects
const fn failure_kind(error: &Error) -> Option<&'static str> {
    match error {
        Error::Capture { .. } => Some("capture"),
        Error::Restore { .. } => Some("restore"),
        Error::CacheUnavailable { .. } => Some("unavailable"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::OutputProperty;
    use std::fs;
    use tempfile::TempDir;

    fn outputs(dir: &std::path::Path) -> OutputProperties {
        OutputProperties::new()
            .with(OutputProperty::directory("classes", dir.join("build/classes")))
            .unwrap()
            .with(OutputProperty::file("report", dir.join("build/report.txt")))
            .unwrap()
    }

    #[test]
    fn store_then_load_restores_outputs() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let props = outputs(work.path());
        fs::create_dir_all(work.path().join("build/classes/pkg")).unwrap();
        fs::write(work.path().join("build/classes/pkg/A.class"), "A").unwrap();
        fs::write(work.path().join("build/report.txt"), "ok").unwrap();

        let cache = TaskOutputCache::new(LocalBuildCache::open(store.path(), 1));
        let key = CacheKey::new("compile").unwrap();
        let stored = cache.store(":compile", &key, &props).unwrap();
        assert!(matches!(stored, StoreOutcome::Stored { bytes } if bytes > 0));

        fs::remove_dir_all(work.path().join("build")).unwrap();
        let loaded = cache.load(":compile", &key, &props).unwrap();
        assert!(loaded.is_hit());
        assert_eq!(
            fs::read_to_string(work.path().join("build/classes/pkg/A.class")).unwrap(),
            "A"
        );
        assert_eq!(
            fs::read_to_string(work.path().join("build/report.txt")).unwrap(),
            "ok"
        );
    }

    #[test]
    fn unknown_key_is_a_miss() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let cache = TaskOutputCache::new(LocalBuildCache::open(store.path(), 1));
        let loaded = cache
            .load(":compile", &CacheKey::new("nothing").unwrap(), &outputs(work.path()))
            .unwrap();
        assert_eq!(loaded, LoadOutcome::Miss);
    }

    #[test]
    fn capture_failure_skips_store() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        // declared as a file, but a directory is there
        fs::create_dir_all(work.path().join("build/report.txt")).unwrap();
        let cache = TaskOutputCache::new(LocalBuildCache::open(store.path(), 1));
        let key = CacheKey::new("broken").unwrap();

        let stored = cache.store(":compile", &key, &outputs(work.path())).unwrap();
        assert_eq!(stored, StoreOutcome::Skipped);
        assert!(!cache.cache().contains(&key).unwrap());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let cache = TaskOutputCache::new(LocalBuildCache::open(store.path(), 1));
        let key = CacheKey::new("garbage").unwrap();
        cache
            .cache()
            .store(&key, |out| {
                out.write_all(&[0x55; 1024])
                    .map_err(|e| Error::io_no_path(e, "write"))
            })
            .unwrap();

        let loaded = cache.load(":compile", &key, &outputs(work.path())).unwrap();
        assert_eq!(loaded, LoadOutcome::Miss);
    }

    #[test]
    fn non_cacheable_outputs_are_not_stored() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let props = OutputProperties::new()
            .with(OutputProperty::directory("misc", work.path()).non_cacheable())
            .unwrap();
        let cache = TaskOutputCache::new(LocalBuildCache::open(store.path(), 1));
        let stored = cache
            .store(":misc", &CacheKey::new("misc").unwrap(), &props)
            .unwrap();
        assert_eq!(stored, StoreOutcome::Skipped);
        assert!(!store.path().join("entries").exists());
    }

    #[test]
    fn broken_entries_directory_degrades_to_miss() {
        let work = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let props = outputs(work.path());
        fs::create_dir_all(work.path().join("build/classes")).unwrap();
        fs::write(work.path().join("build/report.txt"), "ok").unwrap();

        let cache = TaskOutputCache::new(LocalBuildCache::open(store.path(), 1));
        let first = CacheKey::new("first").unwrap();
        cache.store(":compile", &first, &props).unwrap();

        let entries = store.path().join("entries");
        fs::remove_dir_all(&entries).unwrap();
        fs::write(&entries, "not a directory").unwrap();

        let second = CacheKey::new("second").unwrap();
        assert_eq!(
            cache.store(":compile", &second, &props).unwrap(),
            StoreOutcome::Skipped
        );
        assert_eq!(
            cache.load(":compile", &first, &props).unwrap(),
            LoadOutcome::Miss
        );
    }

    #[test]
    fn store_root_that_is_a_file_degrades_to_miss() {
        let work = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let root = scratch.path().join("store");
        fs::write(&root, "occupied").unwrap();
        let props = outputs(work.path());
        fs::create_dir_all(work.path().join("build/classes")).unwrap();
        fs::write(work.path().join("build/report.txt"), "ok").unwrap();

        let cache = TaskOutputCache::new(LocalBuildCache::open(&root, 1));
        let key = CacheKey::new("k").unwrap();
        assert_eq!(cache.store(":compile", &key, &props).unwrap(), StoreOutcome::Skipped);
        assert_eq!(cache.load(":compile", &key, &props).unwrap(), LoadOutcome::Miss);
    }

    #[test]
    fn failures_are_classified_by_kind() {
        assert_eq!(failure_kind(&Error::capture("p", "m")), Some("capture"));
        assert_eq!(failure_kind(&Error::restore("m")), Some("restore"));
        assert_eq!(failure_kind(&Error::unavailable("/c", "r")), Some("unavailable"));
        assert_eq!(failure_kind(&Error::buffer_state("m")), None);
        assert!(degrade(":t", "load", Error::buffer_state("m")).is_err());
        assert!(degrade(":t", "load", Error::restore("m")).is_ok());
    }
}
