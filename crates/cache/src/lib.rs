//! Task output caching for outcache
//!
//! This crate stores the outputs of build tasks so a later run can restore
//! them instead of executing the task again:
//! - [`StreamBuffer`]: chunked in-memory byte buffer, written once and read once
//! - [`TarTaskOutputPacker`]: packs declared output properties into one tar
//!   stream and restores them with permissions and timestamps intact
//! - [`LocalBuildCache`]: on-disk store guarded by a layout version and an
//!   OS-level lock
//! - [`TaskOutputCache`]: front end combining the three, degrading every cache
//!   problem to a miss
//! - [`BuildRegistry`]: builds and projects taking part in a composite build
//!
//! # Overview
//!
//! ```rust,ignore
//! use outcache::{CacheKey, LocalBuildCache, OutputProperties, OutputProperty, TaskOutputCache};
//!
//! let outputs = OutputProperties::new()
//!     .with(OutputProperty::directory("classes", "build/classes"))?
//!     .with(OutputProperty::file("report", "build/report.txt"))?;
//! let cache = TaskOutputCache::new(LocalBuildCache::open("/var/cache/outcache", 1));
//! let key = CacheKey::from_bytes(&digest);
//!
//! if !cache.load(":compile", &key, &outputs)?.is_hit() {
//!     run_task();
//!     cache.store(":compile", &key, &outputs)?;
//! }
//! ```

// TODO(cache-docs): Add # Errors documentation to all fallible public functions
#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

pub mod archive;
pub mod buffer;
pub mod config;
mod error;
pub mod registry;
pub mod store;
pub mod task_cache;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use archive::{
    ArchiveStats, FileAttributes, NativeAttributes, OutputKind, OutputProperties, OutputProperty,
    TarTaskOutputPacker,
};
pub use buffer::{Charset, StreamBuffer};
pub use config::CacheConfig;
pub use registry::{BuildRegistry, IncludedBuild, MetadataProvider, ProjectMetadata};
pub use store::{CacheGatekeeper, CacheKey, LocalBuildCache};
pub use task_cache::{LoadOutcome, StoreOutcome, TaskOutputCache};
