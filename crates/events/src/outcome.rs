//! Per-build tally of task outcomes

use crate::report::ReportError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// How a task's work was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The task's actions ran
    Executed,
    /// Outputs were already current, nothing ran
    UpToDate,
    /// Outputs were restored from the build cache
    FromCache,
    /// The task did not need to run at all
    Skipped,
}

impl TaskOutcome {
    /// Every outcome, in declaration order
    pub const ALL: [Self; 4] = [Self::Executed, Self::UpToDate, Self::FromCache, Self::Skipped];

    /// Stable lowercase name used in events
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::UpToDate => "up_to_date",
            Self::FromCache => "from_cache",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts for one finished build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    /// Tasks that executed
    pub executed: usize,
    /// Tasks that were up to date
    pub up_to_date: usize,
    /// Tasks loaded from cache
    pub from_cache: usize,
    /// Tasks that were skipped
    pub skipped: usize,
    /// Tasks that were cacheable, whatever their outcome
    pub cacheable: usize,
}

impl TaskStatistics {
    /// Total number of tasks seen
    #[must_use]
    pub const fn all(&self) -> usize {
        self.executed + self.up_to_date + self.from_cache + self.skipped
    }

    /// Number of tasks with `outcome`
    #[must_use]
    pub const fn count(&self, outcome: TaskOutcome) -> usize {
        match outcome {
            TaskOutcome::Executed => self.executed,
            TaskOutcome::UpToDate => self.up_to_date,
            TaskOutcome::FromCache => self.from_cache,
            TaskOutcome::Skipped => self.skipped,
        }
    }
}

/// Receives the statistics once the build is over
pub trait StatisticsListener {
    /// Called exactly once per build
    fn build_finished(&mut self, statistics: &TaskStatistics) -> Result<(), ReportError>;
}

/// Thread-safe counters fed by task completions
///
/// Create one per build, share it by reference with whatever runs tasks, then
/// hand it to [`finish`](Self::finish). No per-task detail is kept.
#[derive(Debug, Default)]
pub struct OutcomeAggregator {
    executed: AtomicUsize,
    up_to_date: AtomicUsize,
    from_cache: AtomicUsize,
    skipped: AtomicUsize,
    cacheable: AtomicUsize,
}

impl OutcomeAggregator {
    /// Fresh tally for a new build
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one completed task and emit its outcome event
    pub fn record(&self, task: &str, outcome: TaskOutcome, cacheable: bool) {
        self.counter(outcome).fetch_add(1, Ordering::Relaxed);
        if cacheable {
            self.cacheable.fetch_add(1, Ordering::Relaxed);
        }
        crate::emit_task_outcome!(task, outcome, cacheable);
    }

    /// Current counts
    #[must_use]
    pub fn snapshot(&self) -> TaskStatistics {
        TaskStatistics {
            executed: self.executed.load(Ordering::Relaxed),
            up_to_date: self.up_to_date.load(Ordering::Relaxed),
            from_cache: self.from_cache.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cacheable: self.cacheable.load(Ordering::Relaxed),
        }
    }

    /// End the build: pass the final counts to `listener`
    pub fn finish(self, listener: &mut impl StatisticsListener) -> Result<TaskStatistics, ReportError> {
        let statistics = self.snapshot();
        tracing::debug!(
            all = statistics.all(),
            cacheable = statistics.cacheable,
            "Build finished"
        );
        listener.build_finished(&statistics)?;
        Ok(statistics)
    }

    const fn counter(&self, outcome: TaskOutcome) -> &AtomicUsize {
        match outcome {
            TaskOutcome::Executed => &self.executed,
            TaskOutcome::UpToDate => &self.up_to_date,
            TaskOutcome::FromCache => &self.from_cache,
            TaskOutcome::Skipped => &self.skipped,
        }
    }
}
