//! Metric names and descriptions.
//!
//! The library records through the `metrics` facade and never installs a
//! recorder; the embedding application picks the exporter.

use metrics::{describe_counter, describe_histogram, Unit};

/// Jobs fired, labelled by `queue` and `outcome`.
pub const JOBS_FIRED_TOTAL: &str = "queueline_jobs_fired_total";
/// Handler failures, labelled by `queue` and `code`.
pub const JOBS_FAILED_TOTAL: &str = "queueline_jobs_failed_total";
/// Handler run time, labelled by `queue`.
pub const JOB_DURATION_SECONDS: &str = "queueline_job_duration_seconds";
/// Checkpoints emitted by the tracing monitor, labelled by `status`.
pub const CHECKPOINTS_TOTAL: &str = "queueline_checkpoints_total";
/// Errors constructed, labelled by `code` and `category`.
pub const ERRORS_TOTAL: &str = "queueline_errors_total";

/// Register descriptions for every metric the crate records.
///
/// Safe to call more than once; it is a no-op without an installed recorder.
pub fn describe_metrics() {
    describe_counter!(JOBS_FIRED_TOTAL, Unit::Count, "Jobs fired, by outcome");
    describe_counter!(JOBS_FAILED_TOTAL, Unit::Count, "Jobs whose handler failed");
    describe_histogram!(
        JOB_DURATION_SECONDS,
        Unit::Seconds,
        "Handler resolution and invocation time"
    );
    describe_counter!(CHECKPOINTS_TOTAL, Unit::Count, "Monitoring checkpoints emitted");
    describe_counter!(ERRORS_TOTAL, Unit::Count, "Errors by code");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
        describe_metrics();
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            JOBS_FIRED_TOTAL,
            JOBS_FAILED_TOTAL,
            JOB_DURATION_SECONDS,
            CHECKPOINTS_TOTAL,
            ERRORS_TOTAL,
        ] {
            assert!(name.starts_with("queueline_"), "{}", name);
        }
    }
}
