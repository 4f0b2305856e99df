//! Mapping of phase progress into the overall 0-100 job progress.

use serde::{Deserialize, Serialize};

/// Overall progress reported at each phase boundary.
///
/// Setup and probe take 0-20, transcoding owns the 40-80 window, finalizing
/// sits at 90 and completion is always 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPlan {
    pub source_ready: u8,
    pub probed: u8,
    pub transcode_start: u8,
    pub transcode_end: u8,
    pub finalizing: u8,
}

impl Default for ProgressPlan {
    fn default() -> Self {
        Self {
            source_ready: 10,
            probed: 20,
            transcode_start: 40,
            transcode_end: 80,
            finalizing: 90,
        }
    }
}

impl ProgressPlan {
    /// Map the adapter's 0-100 transcode progress into the transcode window.
    pub fn map_transcode(&self, percent: f64) -> u8 {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        let span = f64::from(self.transcode_end.saturating_sub(self.transcode_start));
        let mapped = f64::from(self.transcode_start) + percent / 100.0 * span;
        mapped.round().min(f64::from(self.transcode_end)) as u8
    }

    /// Phase boundaries must be strictly increasing and below completion.
    pub fn is_valid(&self) -> bool {
        self.source_ready < self.probed
            && self.probed < self.transcode_start
            && self.transcode_start < self.transcode_end
            && self.transcode_end < self.finalizing
            && self.finalizing < 100
    }
}
