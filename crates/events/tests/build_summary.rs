//! A whole build reported through the aggregator

use outcache_events::{
    CacheStatisticsReporter, OutcomeAggregator, ReportError, StatisticsListener, TaskOutcome,
    TaskStatistics,
};
use std::thread;

#[test]
fn parallel_build_prints_summary() {
    let aggregator = OutcomeAggregator::new();
    let tasks = [
        (":a:compile", TaskOutcome::FromCache, true),
        (":a:test", TaskOutcome::Executed, true),
        (":b:compile", TaskOutcome::FromCache, true),
        (":b:jar", TaskOutcome::UpToDate, false),
        (":b:docs", TaskOutcome::Skipped, false),
        (":c:compile", TaskOutcome::Executed, true),
        (":c:check", TaskOutcome::Executed, false),
        (":c:lint", TaskOutcome::Executed, false),
    ];
    thread::scope(|scope| {
        for (task, outcome, cacheable) in tasks {
            let aggregator = &aggregator;
            scope.spawn(move || aggregator.record(task, outcome, cacheable));
        }
    });

    let mut reporter = CacheStatisticsReporter::new(Vec::new());
    let statistics = aggregator.finish(&mut reporter).unwrap();
    assert_eq!(statistics.all(), 8);

    let printed = String::from_utf8(reporter.into_inner()).unwrap();
    assert_eq!(
        printed,
        "\n\
         8 tasks in build, out of which 4 (50%) were cacheable\n\
         1  (12%) up-to-date\n\
         2  (25%) loaded from cache\n\
         1  (12%) skipped\n\
         4  (50%) executed\n"
    );
}

#[test]
fn empty_build_reports_zero_percent() {
    let mut reporter = CacheStatisticsReporter::new(Vec::new());
    OutcomeAggregator::new().finish(&mut reporter).unwrap();
    let printed = String::from_utf8(reporter.into_inner()).unwrap();
    assert_eq!(printed, "\n0 tasks in build, out of which 0 (0%) were cacheable\n");
}

#[derive(Default)]
struct Recording {
    seen: Vec<TaskStatistics>,
}

impl StatisticsListener for Recording {
    fn build_finished(&mut self, statistics: &TaskStatistics) -> Result<(), ReportError> {
        self.seen.push(*statistics);
        Ok(())
    }
}

#[test]
fn listener_is_called_once_with_the_final_tally() {
    let aggregator = OutcomeAggregator::new();
    aggregator.record(":x", TaskOutcome::UpToDate, true);
    aggregator.record(":y", TaskOutcome::UpToDate, false);

    let mut listener = Recording::default();
    aggregator.finish(&mut listener).unwrap();
    assert_eq!(
        listener.seen,
        [TaskStatistics {
            up_to_date: 2,
            cacheable: 1,
            ..TaskStatistics::default()
        }]
    );
}
