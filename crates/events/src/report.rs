//! End-of-build cache statistics summary

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use crate::outcome::{StatisticsListener, TaskOutcome, TaskStatistics};
use miette::Diagnostic;
use std::fmt::Write as _;
use std::io::Write;
use thiserror::Error;

/// Errors raised while producing the build summary
#[derive(Debug, Error, Diagnostic)]
pub enum ReportError {
    /// A percentage was requested for a negative count
    #[error("Unable to calculate percentage: {fraction} of {total}. All inputs must be >= 0")]
    #[diagnostic(code(outcache::report::negative_input))]
    NegativeInput {
        /// Numerator
        fraction: i64,
        /// Denominator
        total: i64,
    },

    /// The summary could not be written
    #[error("Failed to write build summary")]
    #[diagnostic(code(outcache::report::io))]
    Io(#[from] std::io::Error),
}

/// `fraction` as a whole-number percentage of `total`
///
/// A zero total yields 0. Halves round to the nearest even number.
pub fn rounded_percent_of(fraction: i64, total: i64) -> Result<u64, ReportError> {
    if fraction < 0 || total < 0 {
        return Err(ReportError::NegativeInput { fraction, total });
    }
    if total == 0 {
        return Ok(0);
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = (fraction as f64 * 100.0 / total as f64).round_ties_even() as u64;
    Ok(percent)
}

fn as_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Render the summary printed at the end of a build
///
/// ```text
///
/// 10 tasks in build, out of which 6 (60%) were cacheable
///  2  (20%) up-to-date
///  3  (30%) loaded from cache
///  5  (50%) executed
/// ```
///
/// Buckets with no tasks are left out.
pub fn render(statistics: &TaskStatistics) -> Result<String, ReportError> {
    let all = statistics.all();
    let mut out = String::from("\n");
    let _ = writeln!(
        out,
        "{all} tasks in build, out of which {} ({}%) were cacheable",
        statistics.cacheable,
        rounded_percent_of(as_count(statistics.cacheable), as_count(all))?
    );

    let width = all.to_string().len();
    for (outcome, description) in [
        (TaskOutcome::UpToDate, "up-to-date"),
        (TaskOutcome::FromCache, "loaded from cache"),
        (TaskOutcome::Skipped, "skipped"),
        (TaskOutcome::Executed, "executed"),
    ] {
        let count = statistics.count(outcome);
        if count == 0 {
            continue;
        }
        let percent = format!("({}%)", rounded_percent_of(as_count(count), as_count(all))?);
        let _ = writeln!(out, "{count:>width$} {percent:>6} {description}");
    }
    Ok(out)
}

/// Writes the summary to a sink when the build finishes
#[derive(Debug)]
pub struct CacheStatisticsReporter<W> {
    out: W,
}

impl<W: Write> CacheStatisticsReporter<W> {
    /// Report into `out`
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Give back the sink
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> StatisticsListener for CacheStatisticsReporter<W> {
    fn build_finished(&mut self, statistics: &TaskStatistics) -> Result<(), ReportError> {
        let summary = render(statistics)?;
        self.out.write_all(summary.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}
