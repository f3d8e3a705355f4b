//! Progress reporting.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic progress sink handed to stages and collaborators.
///
/// Values are clamped to `[0, 1]`, mapped into this reporter's sub-range, and
/// forwarded only when they exceed the last forwarded value.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(f64) + Send + Sync>,
    last: Arc<AtomicU64>,
    offset: f64,
    span: f64,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("last", &self.last())
            .field("offset", &self.offset)
            .field("span", &self.span)
            .finish()
    }
}

impl ProgressReporter {
    /// Create a reporter forwarding to `sink`.
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
            last: Arc::new(AtomicU64::new((-1.0f64).to_bits())),
            offset: 0.0,
            span: 1.0,
        }
    }

    /// Reporter that discards everything.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Derive a reporter covering `[offset, offset + span]` of this one.
    ///
    /// The derived reporter tracks its own high-water mark.
    pub fn scaled(&self, offset: f64, span: f64) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            last: Arc::new(AtomicU64::new((-1.0f64).to_bits())),
            offset: self.offset + offset * self.span,
            span: span * self.span,
        }
    }

    /// Report a fraction in `[0, 1]`.
    pub fn report(&self, fraction: f64) {
        if fraction.is_nan() {
            return;
        }
        let value = self.offset + fraction.clamp(0.0, 1.0) * self.span;

        let mut current = self.last.load(Ordering::Acquire);
        loop {
            if value <= f64::from_bits(current) {
                return;
            }
            match self.last.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        (self.sink)(value);
    }

    /// Last forwarded value, if any.
    pub fn last(&self) -> Option<f64> {
        let value = f64::from_bits(self.last.load(Ordering::Acquire));
        (value >= 0.0).then_some(value)
    }
}

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fraction of the output written, given total duration in milliseconds.
    pub fn fraction(&self, total_duration_ms: i64) -> f64 {
        if self.is_complete {
            return 1.0;
        }
        if total_duration_ms <= 0 {
            return 0.0;
        }
        (self.out_time_ms as f64 / total_duration_ms as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (ProgressReporter, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(move |v| sink.lock().unwrap().push(v));
        (reporter, seen)
    }

    #[test]
    fn test_reporter_is_monotonic_and_clamped() {
        let (reporter, seen) = recording();

        reporter.report(0.0);
        reporter.report(0.4);
        reporter.report(0.2);
        reporter.report(0.4);
        reporter.report(7.0);
        reporter.report(f64::NAN);

        assert_eq!(*seen.lock().unwrap(), vec![0.0, 0.4, 1.0]);
        assert_eq!(reporter.last(), Some(1.0));
    }

    #[test]
    fn test_scaled_reporters_cover_sub_ranges() {
        let (reporter, seen) = recording();
        let first = reporter.scaled(0.0, 0.5);
        let second = reporter.scaled(0.5, 0.5);

        first.report(1.0);
        second.report(0.0);
        second.report(0.5);

        assert_eq!(*seen.lock().unwrap(), vec![0.5, 0.5, 0.75]);
    }

    #[test]
    fn test_ffmpeg_fraction() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.fraction(10000) - 0.5).abs() < 0.001);
        assert_eq!(progress.fraction(0), 0.0);

        let done = FfmpegProgress {
            is_complete: true,
            ..Default::default()
        };
        assert_eq!(done.fraction(10000), 1.0);
    }
}
