//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory that receives exported files
    pub work_dir: PathBuf,
    /// Share of overall progress covered by the fetch stage
    pub fetch_weight: f64,
    /// x264 preset used by the FFmpeg exporter
    pub export_preset: String,
    /// x264 CRF used by the FFmpeg exporter
    pub export_crf: u8,
    /// Upper bound for a single export
    pub export_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("vup"),
            fetch_weight: 0.5,
            export_preset: "veryfast".to_string(),
            export_crf: 23,
            export_timeout: Duration::from_secs(1800), // 30 minutes
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("VUP_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            fetch_weight: std::env::var("VUP_FETCH_WEIGHT")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|w| (0.0..=1.0).contains(w))
                .unwrap_or(defaults.fetch_weight),
            export_preset: std::env::var("VUP_EXPORT_PRESET")
                .unwrap_or(defaults.export_preset),
            export_crf: std::env::var("VUP_EXPORT_CRF")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.export_crf),
            export_timeout: Duration::from_secs(
                std::env::var("VUP_EXPORT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.export_timeout.as_secs()),
            ),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Clamped into `[0, 1]`.
    pub fn with_fetch_weight(mut self, weight: f64) -> Self {
        self.fetch_weight = if weight.is_nan() { 0.5 } else { weight.clamp(0.0, 1.0) };
        self
    }
}
