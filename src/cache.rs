//! Skip-frame caching.
//!
//! Detectors are expensive; trackers are not. When the frame barely changed
//! since the last full detection, each detector may reuse its cached boxes
//! (usually tracking boxes refined from the previous frame's landmarks) for a
//! bounded number of frames and a bounded time.

use ndarray::{s, Array4};

use crate::config::DetectorConfig;

/// Per-detector cache. Owned by exactly one pipeline.
#[derive(Debug, Clone)]
pub struct DetectorState<T> {
    pub boxes: Vec<T>,
    skipped: u32,
    last_run_ms: Option<u64>,
}

impl<T> Default for DetectorState<T> {
    fn default() -> Self {
        Self {
            boxes: Vec::new(),
            skipped: 0,
            last_run_ms: None,
        }
    }
}

impl<T> DetectorState<T> {
    /// Whether the detector can be skipped for the frame at `now_ms`.
    pub fn can_skip(&self, config: &DetectorConfig, now_ms: u64, frame_unchanged: bool) -> bool {
        let Some(last_run_ms) = self.last_run_ms else {
            return false;
        };
        let within_time = now_ms.saturating_sub(last_run_ms) < config.skip_time_ms;
        let within_frames = self.skipped < config.skip_frames;
        frame_unchanged && within_time && within_frames && !self.boxes.is_empty()
    }

    /// Counts a reuse of the cached boxes.
    pub fn mark_skipped(&mut self) {
        self.skipped = self.skipped.saturating_add(1);
    }

    /// Replaces the cache with fresh detector output.
    pub fn refresh(&mut self, boxes: Vec<T>, now_ms: u64) {
        self.boxes = boxes;
        self.skipped = 0;
        self.last_run_ms = Some(now_ms);
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Whole-frame change detector. Compares the channel-2 sum of a coarse
/// subsample (every 32nd pixel) against the previous frame.
#[derive(Debug, Clone)]
pub struct FrameChangeDetector {
    /// Percent change under which frames count as unchanged; zero disables.
    sensitivity: f32,
    last_sum: Option<f32>,
    last_diff: f32,
}

impl FrameChangeDetector {
    const STRIDE: isize = 32;

    pub fn new(sensitivity: f32) -> Self {
        Self {
            sensitivity,
            last_sum: None,
            last_diff: 0.0,
        }
    }

    /// Feeds a `[1, H, W, C]` frame; returns true when it is close enough to
    /// the previous one for cached boxes to be reused.
    pub fn is_unchanged(&mut self, frame: &Array4<f32>) -> bool {
        if self.sensitivity <= 0.0 || frame.dim().3 < 3 {
            return false;
        }

        let sum: f32 = frame
            .slice(s![0, ..;Self::STRIDE, ..;Self::STRIDE, 2])
            .sum();
        let Some(last_sum) = self.last_sum.replace(sum) else {
            return false;
        };

        let diff = 100.0 * (sum.max(last_sum) / sum.min(last_sum) - 1.0);
        if !diff.is_finite() {
            self.last_diff = 0.0;
            return false;
        }

        let unchanged = diff < self.sensitivity.max(self.last_diff);
        self.last_diff = if diff > 10.0 * self.sensitivity { 0.0 } else { diff };
        let unchanged = unchanged && self.last_diff > 0.0;
        tracing::trace!(diff, unchanged, "frame change");
        unchanged
    }

    pub fn reset(&mut self) {
        self.last_sum = None;
        self.last_diff = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: f32) -> Array4<f32> {
        Array4::from_elem((1, 64, 64, 3), value)
    }

    #[test]
    fn test_detector_state_skips_within_budget() {
        let config = DetectorConfig {
            skip_frames: 2,
            skip_time_ms: 1000,
            ..DetectorConfig::default()
        };
        let mut state = DetectorState::default();
        assert!(!state.can_skip(&config, 0, true));

        state.refresh(vec![1], 100);
        assert!(state.can_skip(&config, 200, true));
        assert!(!state.can_skip(&config, 200, false));
        state.mark_skipped();
        state.mark_skipped();
        assert!(!state.can_skip(&config, 200, true));

        state.refresh(vec![1], 300);
        assert!(!state.can_skip(&config, 1300, true));
    }

    #[test]
    fn test_detector_state_needs_boxes() {
        let config = DetectorConfig::default();
        let mut state: DetectorState<u8> = DetectorState::default();
        state.refresh(Vec::new(), 0);
        assert!(!state.can_skip(&config, 1, true));
    }

    #[test]
    fn test_frame_change_disabled() {
        let mut detector = FrameChangeDetector::new(0.0);
        assert!(!detector.is_unchanged(&frame(0.5)));
        assert!(!detector.is_unchanged(&frame(0.5)));
    }

    #[test]
    fn test_frame_change_small_drift() {
        let mut detector = FrameChangeDetector::new(0.7);
        assert!(!detector.is_unchanged(&frame(0.5)));
        // identical frame: diff 0 never counts as unchanged on its own
        assert!(!detector.is_unchanged(&frame(0.5)));
        // 0.2% drift is under the sensitivity
        assert!(detector.is_unchanged(&frame(0.501)));
        // a large jump resets
        assert!(!detector.is_unchanged(&frame(0.9)));
    }
}
