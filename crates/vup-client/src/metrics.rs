//! Status refresh metrics.
//!
//! Counters only; installing an exporter is left to the embedding binary.

use metrics::counter;

use vup_models::RemoteStatus;

/// Metric name constants for consistency.
pub mod names {
    /// Status polls issued.
    pub const POLLS_TOTAL: &str = "vup_status_polls_total";

    /// Poll cycles skipped because a poll was still outstanding.
    pub const POLLS_SKIPPED_TOTAL: &str = "vup_status_polls_skipped_total";

    /// Failed status polls by reason.
    pub const POLL_FAILURES_TOTAL: &str = "vup_status_poll_failures_total";

    /// Responses discarded after untrack or re-track.
    pub const STALE_RESPONSES_TOTAL: &str = "vup_status_stale_responses_total";

    /// Transition notifications by new status.
    pub const TRANSITIONS_TOTAL: &str = "vup_status_transitions_total";
}

pub fn record_poll() {
    counter!(names::POLLS_TOTAL).increment(1);
}

pub fn record_skipped() {
    counter!(names::POLLS_SKIPPED_TOTAL).increment(1);
}

pub fn record_poll_failure(retryable: bool) {
    counter!(
        names::POLL_FAILURES_TOTAL,
        "retryable" => retryable.to_string()
    )
    .increment(1);
}

pub fn record_stale_response() {
    counter!(names::STALE_RESPONSES_TOTAL).increment(1);
}

pub fn record_transition(new: RemoteStatus) {
    counter!(
        names::TRANSITIONS_TOTAL,
        "status" => new.as_str()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::POLLS_TOTAL.starts_with("vup_"));
        assert!(names::POLLS_SKIPPED_TOTAL.contains("skipped"));
        assert!(names::TRANSITIONS_TOTAL.contains("transitions"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_poll();
        record_skipped();
        record_poll_failure(true);
        record_transition(RemoteStatus::Ready);
    }
}
