//! Task outcome statistics and structured cache events for outcache.
//!
//! This crate holds the parts of the cache engine that describe what happened
//! during a build rather than doing the caching itself:
//!
//! - [`OutcomeAggregator`] counts task outcomes while a build runs
//! - [`CacheStatisticsReporter`] prints the summary when it finishes
//! - `emit_*` macros publish cache events as `tracing` events on
//!   `outcache::*` targets
//! - [`logging::init_tracing`] installs a subscriber for binaries
//!
//! # Usage
//!
//! ```rust,ignore
//! use outcache_events::{CacheStatisticsReporter, OutcomeAggregator, TaskOutcome};
//!
//! let aggregator = OutcomeAggregator::new();
//! aggregator.record(":compileJava", TaskOutcome::FromCache, true);
//! aggregator.record(":test", TaskOutcome::Executed, true);
//!
//! let mut reporter = CacheStatisticsReporter::new(std::io::stderr());
//! aggregator.finish(&mut reporter)?;
//! ```

pub mod logging;
pub mod outcome;
pub mod report;

pub use outcome::{OutcomeAggregator, StatisticsListener, TaskOutcome, TaskStatistics};
pub use report::{CacheStatisticsReporter, ReportError, render, rounded_percent_of};

// ============================================================================
// Emit Macros
// ============================================================================

/// Emit a cache hit event.
///
/// # Example
/// ```rust,ignore
/// emit_cache_hit!(":compileJava", "3f2a9c", 12_usize);
/// ```
#[macro_export]
macro_rules! emit_cache_hit {
    ($task:expr, $cache_key:expr, $entries:expr) => {
        ::tracing::info!(
            target: "outcache::cache",
            event_type = "cache.hit",
            task_name = %$task,
            cache_key = %$cache_key,
            entries = $entries,
        )
    };
}

/// Emit a cache miss event.
///
/// # Example
/// ```rust,ignore
/// emit_cache_miss!(":compileJava", "3f2a9c");
/// emit_cache_miss!(":compileJava", "3f2a9c", "archive is truncated");
/// ```
#[macro_export]
macro_rules! emit_cache_miss {
    ($task:expr, $cache_key:expr) => {
        ::tracing::info!(
            target: "outcache::cache",
            event_type = "cache.miss",
            task_name = %$task,
            cache_key = %$cache_key,
        )
    };
    ($task:expr, $cache_key:expr, $reason:expr) => {
        ::tracing::info!(
            target: "outcache::cache",
            event_type = "cache.miss",
            task_name = %$task,
            cache_key = %$cache_key,
            reason = %$reason,
        )
    };
}

/// Emit a cache store event.
#[macro_export]
macro_rules! emit_cache_stored {
    ($task:expr, $cache_key:expr, $bytes:expr) => {
        ::tracing::info!(
            target: "outcache::cache",
            event_type = "cache.stored",
            task_name = %$task,
            cache_key = %$cache_key,
            bytes = $bytes,
        )
    };
}

/// Emit an event for a cache operation that could not be carried out.
#[macro_export]
macro_rules! emit_cache_unavailable {
    ($task:expr, $operation:expr, $reason:expr) => {
        ::tracing::warn!(
            target: "outcache::cache",
            event_type = "cache.unavailable",
            task_name = %$task,
            operation = %$operation,
            reason = %$reason,
        )
    };
}

/// Emit an event for a cache operation abandoned because of its own failure.
///
/// `kind` names what failed, e.g. `"capture"` or `"restore"`.
///
/// # Example
/// ```rust,ignore
/// emit_cache_failed!(":compileJava", "pack", "capture", error);
/// ```
#[macro_export]
macro_rules! emit_cache_failed {
    ($task:expr, $operation:expr, $kind:expr, $reason:expr) => {
        ::tracing::warn!(
            target: "outcache::cache",
            event_type = "cache.failed",
            task_name = %$task,
            operation = %$operation,
            kind = %$kind,
            reason = %$reason,
        )
    };
}

/// Emit a task outcome event.
///
/// # Example
/// ```rust,ignore
/// emit_task_outcome!(":test", TaskOutcome::Executed, true);
/// ```
#[macro_export]
macro_rules! emit_task_outcome {
    ($task:expr, $outcome:expr, $cacheable:expr) => {
        ::tracing::info!(
            target: "outcache::task",
            event_type = "task.outcome",
            task_name = %$task,
            outcome = %$outcome,
            cacheable = $cacheable,
        )
    };
}
