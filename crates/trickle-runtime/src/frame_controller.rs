#![forbid(unsafe_code)]

//! Frame-time feedback controller for batch sizing.
//!
//! Keeps each batch's wall-clock cost near one interactive frame. After every
//! batch the controller folds the measured duration into an exponential
//! moving average; before every batch it turns that average into a size.
//!
//! # Mathematical Model
//!
//! ```text
//! avg_t   = α · sample_t + (1 − α) · avg_{t−1}          (α = 0.18)
//! ratio   = clamp(target / avg, 0.25, 4)
//! batch   = clamp(round(base · ratio), min, max)
//! batch   = max(floor(batch · 0.6), min)                 (low-memory only)
//! batch   = min(batch, hard_ceiling)
//! ```
//!
//! The average starts at `target`, so the first batch is exactly `base`.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | sample is NaN, infinite, or negative | ignored |
//! | average is zero (all-zero samples) | ratio = 4 (max) |
//! | `hard_ceiling < min` | ceiling wins |
//! | every bound is zero | batch = 1 |

use std::collections::VecDeque;
use std::time::Duration;

/// Sizing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSizing {
    /// Target wall-clock cost of one batch (ms).
    pub target_frame_ms: f64,
    /// Batch size when batches cost exactly `target_frame_ms`.
    pub base_batch: usize,
    pub min_batch: usize,
    pub max_batch: usize,
    /// Externally configurable ceiling applied last.
    pub hard_ceiling: usize,
    /// EMA weight of the newest sample.
    pub alpha: f64,
    pub min_ratio: f64,
    pub max_ratio: f64,
    /// Multiplier applied on low-memory devices.
    pub low_memory_factor: f64,
    /// Samples kept in [`FrameStats`].
    pub sample_window: usize,
}

impl Default for BatchSizing {
    fn default() -> Self {
        Self {
            target_frame_ms: 14.0,
            base_batch: 6,
            min_batch: 3,
            max_batch: 18,
            hard_ceiling: 12,
            alpha: 0.18,
            min_ratio: 0.25,
            max_ratio: 4.0,
            low_memory_factor: 0.6,
            sample_window: 30,
        }
    }
}

/// Snapshot of recent batch timings.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStats {
    /// Most recent samples (ms), oldest first.
    pub samples: Vec<f64>,
    /// Smoothed average (ms).
    pub smoothed_ms: f64,
    /// Samples accepted since creation or reset.
    pub observations: u64,
}

/// EMA-driven batch size controller.
#[derive(Debug, Clone)]
pub struct FrameController {
    sizing: BatchSizing,
    samples: VecDeque<f64>,
    smoothed_ms: f64,
    observations: u64,
}

impl FrameController {
    #[must_use]
    pub fn new(sizing: BatchSizing) -> Self {
        let smoothed_ms = sizing.target_frame_ms;
        Self {
            samples: VecDeque::with_capacity(sizing.sample_window),
            sizing,
            smoothed_ms,
            observations: 0,
        }
    }

    /// Fold a batch duration into the average.
    pub fn record(&mut self, duration: Duration) {
        self.record_ms(duration.as_secs_f64() * 1000.0);
    }

    /// Fold a batch duration (ms) into the average.
    pub fn record_ms(&mut self, sample_ms: f64) {
        if !sample_ms.is_finite() || sample_ms < 0.0 {
            tracing::trace!(sample_ms, "ignoring invalid batch duration sample");
            return;
        }
        let alpha = self.sizing.alpha.clamp(0.0, 1.0);
        self.smoothed_ms = alpha * sample_ms + (1.0 - alpha) * self.smoothed_ms;
        self.observations += 1;

        if self.sizing.sample_window > 0 {
            if self.samples.len() == self.sizing.sample_window {
                self.samples.pop_front();
            }
            self.samples.push_back(sample_ms);
        }
    }

    /// Current speed ratio `target / avg`, clamped.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        let (lo, hi) = (self.sizing.min_ratio, self.sizing.max_ratio.max(self.sizing.min_ratio));
        if !(self.smoothed_ms.is_finite() && self.smoothed_ms > 0.0) {
            return hi;
        }
        let ratio = self.sizing.target_frame_ms / self.smoothed_ms;
        if ratio.is_finite() { ratio.clamp(lo, hi) } else { hi }
    }

    /// Size of the next batch.
    #[must_use]
    pub fn batch_size(&self, low_memory: bool) -> usize {
        let s = &self.sizing;
        let max = s.max_batch.max(s.min_batch);
        let raw = (s.base_batch as f64 * self.ratio()).round();
        let mut batch = (raw.max(0.0) as usize).max(s.min_batch).min(max);

        if low_memory {
            let scaled = (batch as f64 * s.low_memory_factor).floor();
            batch = (scaled.max(0.0) as usize).max(s.min_batch);
        }

        batch.min(s.hard_ceiling).max(1)
    }

    /// Largest batch the controller will ever hand out.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.sizing
            .max_batch
            .max(self.sizing.min_batch)
            .min(self.sizing.hard_ceiling)
            .max(1)
    }

    /// Change the hard ceiling at runtime.
    pub fn set_hard_ceiling(&mut self, ceiling: usize) {
        self.sizing.hard_ceiling = ceiling;
    }

    #[must_use]
    pub fn smoothed_ms(&self) -> f64 {
        self.smoothed_ms
    }

    #[must_use]
    pub fn sizing(&self) -> &BatchSizing {
        &self.sizing
    }

    #[must_use]
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            samples: self.samples.iter().copied().collect(),
            smoothed_ms: self.smoothed_ms,
            observations: self.observations,
        }
    }

    /// Forget every sample.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.smoothed_ms = self.sizing.target_frame_ms;
        self.observations = 0;
    }
}

impl Default for FrameController {
    fn default() -> Self {
        Self::new(BatchSizing::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_batch_is_base() {
        let fc = FrameController::default();
        assert_eq!(fc.batch_size(false), 6);
    }

    #[test]
    fn fast_batches_grow_to_ceiling() {
        let mut fc = FrameController::default();
        for _ in 0..40 {
            fc.record_ms(1.0);
        }
        // base 6 * ratio 4 = 24 -> max 18 -> ceiling 12
        assert_eq!(fc.batch_size(false), 12);
    }

    #[test]
    fn slow_batches_shrink_to_min() {
        let mut fc = FrameController::default();
        for _ in 0..40 {
            fc.record_ms(200.0);
        }
        assert!((fc.ratio() - 0.25).abs() < 1e-9);
        // round(6 * 0.25) = 2 -> floored to min 3
        assert_eq!(fc.batch_size(false), 3);
    }

    #[test]
    fn ema_weight() {
        let mut fc = FrameController::default();
        fc.record_ms(114.0);
        // 0.18 * 114 + 0.82 * 14 = 20.52 + 11.48 = 32
        assert!((fc.smoothed_ms() - 32.0).abs() < 1e-9);
    }

    #[test]
    fn low_memory_scales_down() {
        let mut fc = FrameController::new(BatchSizing {
            hard_ceiling: 18,
            ..BatchSizing::default()
        });
        for _ in 0..40 {
            fc.record_ms(1.0);
        }
        assert_eq!(fc.batch_size(false), 18);
        // floor(18 * 0.6) = 10
        assert_eq!(fc.batch_size(true), 10);

        let fresh = FrameController::default();
        // floor(6 * 0.6) = 3 (== min)
        assert_eq!(fresh.batch_size(true), 3);
    }

    #[test]
    fn zero_durations_are_max_ratio() {
        let mut fc = FrameController::default();
        for _ in 0..500 {
            fc.record_ms(0.0);
        }
        assert_eq!(fc.ratio(), 4.0);
        assert_eq!(fc.batch_size(false), 12);
    }

    #[test]
    fn invalid_samples_ignored() {
        let mut fc = FrameController::default();
        fc.record_ms(f64::NAN);
        fc.record_ms(-5.0);
        fc.record_ms(f64::INFINITY);
        assert_eq!(fc.stats().observations, 0);
        assert_eq!(fc.smoothed_ms(), 14.0);
    }

    #[test]
    fn sample_window_is_bounded() {
        let mut fc = FrameController::default();
        for i in 0..100 {
            fc.record(Duration::from_millis(i));
        }
        let stats = fc.stats();
        assert_eq!(stats.samples.len(), 30);
        assert_eq!(stats.samples[0], 70.0);
        assert_eq!(stats.observations, 100);
    }

    #[test]
    fn ceiling_below_min_wins() {
        let mut fc = FrameController::default();
        fc.set_hard_ceiling(2);
        assert_eq!(fc.batch_size(false), 2);
        assert_eq!(fc.ceiling(), 2);
    }

    #[test]
    fn reset_restores_base() {
        let mut fc = FrameController::default();
        fc.record_ms(500.0);
        fc.reset();
        assert_eq!(fc.batch_size(false), 6);
        assert!(fc.stats().samples.is_empty());
    }
}
