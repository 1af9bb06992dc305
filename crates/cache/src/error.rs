//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Packing a task's outputs failed; the entry must not be stored
    #[error("Failed to capture output property '{property}': {message}")]
    #[diagnostic(
        code(outcache::archive::capture),
        help("The task result will not be cached; the task itself is unaffected")
    )]
    Capture {
        /// Output property being packed
        property: String,
        /// What went wrong
        message: String,
        /// Underlying I/O error, if any
        #[source]
        source: Option<std::io::Error>,
    },

    /// Unpacking an archive onto disk failed; restored outputs are invalid
    #[error("Failed to restore cached outputs: {message}")]
    #[diagnostic(
        code(outcache::archive::restore),
        help("Discard the partially restored outputs and execute the task instead")
    )]
    Restore {
        /// What went wrong
        message: String,
        /// Underlying I/O error, if any
        #[source]
        source: Option<std::io::Error>,
    },

    /// The cache store cannot be used right now
    #[error("Cache store {} is unavailable: {reason}", root.display())]
    #[diagnostic(code(outcache::store::unavailable))]
    CacheUnavailable {
        /// Root of the store
        root: Box<Path>,
        /// Why the store was rejected
        reason: String,
    },

    /// Internal bookkeeping of a stream buffer is inconsistent
    #[error("Stream buffer state is inconsistent: {message}")]
    #[diagnostic(code(outcache::buffer::state))]
    BufferState {
        /// Description of the inconsistency
        message: String,
    },

    /// I/O error during store operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(outcache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "lock")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(outcache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Two output properties share a name
    #[error("Output property '{name}' is declared more than once")]
    #[diagnostic(code(outcache::archive::duplicate_property))]
    DuplicateProperty {
        /// The repeated name
        name: String,
    },

    /// A project path was registered twice
    #[error("Project path '{path}' is not unique in composite")]
    #[diagnostic(code(outcache::registry::duplicate_project))]
    DuplicateProject {
        /// The repeated project path
        path: String,
    },

    /// A project was requested that no build ever registered
    #[error("Requested project '{path}' which was never registered")]
    #[diagnostic(code(outcache::registry::unknown_project))]
    UnknownProject {
        /// The requested project path
        path: String,
    },
}

impl Error {
    /// Create a capture failure without an underlying I/O error
    #[must_use]
    pub fn capture(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capture {
            property: property.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a capture failure caused by an I/O error at `path`
    #[must_use]
    pub fn capture_io(
        property: impl Into<String>,
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: &str,
    ) -> Self {
        Self::Capture {
            property: property.into(),
            message: format!("{operation} {} failed", path.as_ref().display()),
            source: Some(source),
        }
    }

    /// Create a restore failure without an underlying I/O error
    #[must_use]
    pub fn restore(message: impl Into<String>) -> Self {
        Self::Restore {
            message: message.into(),
            source: None,
        }
    }

    /// Create a restore failure caused by an I/O error at `path`
    #[must_use]
    pub fn restore_io(source: std::io::Error, path: impl AsRef<Path>, operation: &str) -> Self {
        Self::Restore {
            message: format!("{operation} {} failed", path.as_ref().display()),
            source: Some(source),
        }
    }

    /// Create a cache-unavailable error
    #[must_use]
    pub fn unavailable(root: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::CacheUnavailable {
            root: root.as_ref().into(),
            reason: reason.into(),
        }
    }

    /// Create a buffer state error
    #[must_use]
    pub fn buffer_state(message: impl Into<String>) -> Self {
        Self::BufferState {
            message: message.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Treat an I/O failure inside the store at `root` as the store being
    /// unavailable
    ///
    /// Every other variant is returned unchanged, so capture, restore and
    /// buffer failures raised by a caller's reader or writer keep their
    /// meaning.
    #[must_use]
    pub fn into_unavailable(self, root: impl AsRef<Path>) -> Self {
        match self {
            Self::Io {
                source,
                path,
                operation,
            } => {
                let reason = match path {
                    Some(path) => format!("{operation} {} failed: {source}", path.display()),
                    None => format!("{operation} failed: {source}"),
                };
                Self::unavailable(root, reason)
            }
            other => other,
        }
    }

    /// Whether the caller should fall back to executing the task
    ///
    /// Capture, restore and availability problems only invalidate a single
    /// cache operation; everything else points at a defect or a broken setup.
    #[must_use]
    pub const fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            Self::Capture { .. } | Self::Restore { .. } | Self::CacheUnavailable { .. }
        )
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io { source, .. } => source,
            other => Self::other(other),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
