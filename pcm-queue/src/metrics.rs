//! Stream health monitoring and diagnostics

use std::time::{Duration, Instant};

use tracing::debug;

/// How often [`StreamMetrics::maybe_log`] emits a summary
const LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Submission outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitCounters {
    /// Frames passed to submit while ready
    pub submitted: u64,
    /// Frames that reached the device queue
    pub admitted: u64,
    /// Frames discarded because the backlog was over the threshold
    pub dropped: u64,
    /// Device clears, policy-driven and retry-driven
    pub clears: u64,
    /// Second enqueue attempts after a failure
    pub retries: u64,
    /// Submissions that returned an error
    pub failures: u64,
    /// Bytes that reached the device queue
    pub bytes_admitted: u64,
}

/// Metrics for stream health monitoring and diagnostics
#[derive(Debug, Clone)]
pub struct StreamMetrics {
    totals: SubmitCounters,
    /// Counters since the last periodic log
    interval: SubmitCounters,
    /// Minimum backlog seen this interval
    backlog_min: u32,
    /// Maximum backlog seen this interval
    backlog_max: u32,
    /// Backlog at the most recent decision
    backlog: u32,
    /// Smallest and largest backlog ever seen
    lifetime_range: Option<(u32, u32)>,
    /// Admission ceiling, for percentage reporting
    threshold: u32,
    last_log_time: Instant,
}

impl StreamMetrics {
    pub fn new(threshold: u32) -> Self {
        Self {
            totals: SubmitCounters::default(),
            interval: SubmitCounters::default(),
            backlog_min: u32::MAX,
            backlog_max: 0,
            backlog: 0,
            lifetime_range: None,
            threshold,
            last_log_time: Instant::now(),
        }
    }

    /// Lifetime counters
    pub fn totals(&self) -> SubmitCounters {
        self.totals
    }

    /// Backlog observed at the most recent decision
    pub fn last_backlog(&self) -> u32 {
        self.backlog
    }

    /// Smallest and largest backlog seen over the stream's lifetime,
    /// or `None` before the first admission decision
    pub fn backlog_range(&self) -> Option<(u32, u32)> {
        self.lifetime_range
    }

    pub(crate) fn record_backlog(&mut self, queued: u32) {
        self.backlog = queued;
        self.lifetime_range = Some(match self.lifetime_range {
            Some((min, max)) => (min.min(queued), max.max(queued)),
            None => (queued, queued),
        });
        self.backlog_min = self.backlog_min.min(queued);
        self.backlog_max = self.backlog_max.max(queued);
    }

    pub(crate) fn record_submitted(&mut self) {
        self.totals.submitted += 1;
        self.interval.submitted += 1;
    }

    pub(crate) fn record_admitted(&mut self, bytes: u32) {
        self.totals.admitted += 1;
        self.interval.admitted += 1;
        self.totals.bytes_admitted += u64::from(bytes);
        self.interval.bytes_admitted += u64::from(bytes);
    }

    pub(crate) fn record_dropped(&mut self) {
        self.totals.dropped += 1;
        self.interval.dropped += 1;
    }

    pub(crate) fn record_clear(&mut self) {
        self.totals.clears += 1;
        self.interval.clears += 1;
    }

    pub(crate) fn record_retry(&mut self) {
        self.totals.retries += 1;
        self.interval.retries += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.totals.failures += 1;
        self.interval.failures += 1;
    }

    /// Log metrics if enough time has passed (every 1 second)
    pub fn maybe_log(&mut self) {
        if self.last_log_time.elapsed() < LOG_INTERVAL {
            return;
        }

        if self.interval.submitted > 0 {
            let pct = |bytes: u32| {
                if self.threshold == 0 {
                    0.0
                } else {
                    (f64::from(bytes) / f64::from(self.threshold)) * 100.0
                }
            };
            let min = if self.backlog_min == u32::MAX {
                self.backlog
            } else {
                self.backlog_min
            };

            debug!(
                "STREAM METRICS: backlog={:.1}% (min={:.1}%, max={:.1}%), \
                 submitted={}, admitted={}, dropped={}, clears={}, retries={}, failures={}, bytes={}",
                pct(self.backlog),
                pct(min),
                pct(self.backlog_max),
                self.interval.submitted,
                self.interval.admitted,
                self.interval.dropped,
                self.interval.clears,
                self.interval.retries,
                self.interval.failures,
                self.interval.bytes_admitted,
            );
        }

        // Reset counters for next interval (show per-second rates)
        self.interval = SubmitCounters::default();
        self.backlog_min = self.backlog;
        self.backlog_max = self.backlog;
        self.last_log_time = Instant::now();
    }
}
