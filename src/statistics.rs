//! Rendering statistics
//!
//! Tracks how long frames take to render and how far apart vblanks are, for
//! frame pacing and for the periodic performance log.
//!
//! # Estimators
//!
//! - [`RollingWindow`]: fixed size FIFO that overwrites its oldest sample
//! - [`RollingMax`]: maximum of the samples in a rolling window
//! - [`RollingQuantile`]: lazy quantile estimate over a rolling window
//! - [`CumulativeMeanVar`]: Welford's online mean and variance
//!
//! # Usage
//!
//! ```
//! use lucent::statistics::RenderStatistics;
//!
//! let mut stats = RenderStatistics::new(4);
//! for _ in 0..4 {
//!     stats.add_render_time_sample(120);
//! }
//! assert_eq!(stats.render_budget(), Some(120));
//! ```

use log::debug;
use std::collections::VecDeque;

/// Number of render time samples the budget is estimated from.
pub const DEFAULT_RENDER_TIME_WINDOW: usize = 128;

/// Quantile of the render time used as the render budget.
const RENDER_TIME_QUANTILE: f64 = 0.98;
const RENDER_TIME_QUANTILE_TOLERANCE: f64 = 0.01;

/// Vblank intervals below this many microseconds are not trusted.
const MIN_VBLANK_TIME_US: f64 = 100.0;
/// Samples needed before the vblank estimate is used.
const MIN_VBLANK_SAMPLES: u32 = 20;

/// Fixed capacity FIFO. Pushing into a full window evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    elems: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            elems: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `value`, returning the evicted front element if the window
    /// was full.
    pub fn push_back(&mut self, value: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(value);
        }
        let front = if self.is_full() {
            self.elems.pop_front()
        } else {
            None
        };
        self.elems.push_back(value);
        front
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.elems.pop_front()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.elems.len() == self.capacity
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.elems.iter()
    }

    pub fn reset(&mut self) {
        self.elems.clear();
    }
}

/// Tracks the maximum of a FIFO queue whose elements are pushed to the back
/// and popped from the front. The caller owns the queue itself, usually a
/// [`RollingWindow`], and reports every push and pop.
#[derive(Debug, Clone)]
pub struct RollingMax<T> {
    /// Maximum candidates, decreasing from front to back. The front is the
    /// current maximum.
    candidates: VecDeque<T>,
}

impl<T: Copy + Ord> RollingMax<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            candidates: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push_back(&mut self, value: T) {
        // Anything smaller than the new value can never become the maximum
        // again since it leaves the queue first. Equal values are kept, each
        // one is popped separately.
        while matches!(self.candidates.back(), Some(&back) if back < value) {
            self.candidates.pop_back();
        }
        self.candidates.push_back(value);
    }

    /// Reports that `front`, the oldest element of the queue, was removed.
    pub fn pop_front(&mut self, front: T) {
        if self.candidates.front() == Some(&front) {
            self.candidates.pop_front();
        }
    }

    pub fn max(&self) -> Option<T> {
        self.candidates.front().copied()
    }

    pub fn reset(&mut self) {
        self.candidates.clear();
    }
}

/// A naive quantile estimator over a sliding window.
///
/// The estimate is only recomputed, by selection over the whole window,
/// when the estimate's rank in the window drifts out of the tolerated range.
#[derive(Debug, Clone)]
pub struct RollingQuantile {
    current_rank: i64,
    min_target_rank: i64,
    max_target_rank: i64,
    estimate: u32,
    scratch: Vec<u32>,
}

impl RollingQuantile {
    pub fn new(capacity: usize, min_target_rank: i64, max_target_rank: i64) -> Self {
        Self {
            current_rank: 0,
            min_target_rank,
            max_target_rank,
            estimate: 0,
            scratch: Vec::with_capacity(capacity),
        }
    }

    /// Estimator for quantile `target` of a window of `window_size`,
    /// accepting estimates whose quantile is within `tolerance` of it.
    pub fn with_tolerance(window_size: usize, target: f64, tolerance: f64) -> Self {
        let size = window_size as f64;
        Self::new(
            window_size,
            ((target - tolerance) * size) as i64,
            ((target + tolerance) * size) as i64,
        )
    }

    /// Current estimate. `None` while the window is not full and no
    /// estimate within tolerance exists.
    pub fn estimate(&mut self, window: &RollingWindow<u32>) -> Option<u32> {
        if self.current_rank < self.min_target_rank || self.current_rank > self.max_target_rank {
            if !window.is_full() {
                return None;
            }
            self.scratch.clear();
            self.scratch.extend(window.iter().copied());
            let target_rank =
                self.min_target_rank + (self.max_target_rank - self.min_target_rank) / 2;
            let k = (target_rank.max(0) as usize).min(self.scratch.len().saturating_sub(1));
            let (_, &mut estimate, _) = self.scratch.select_nth_unstable(k);
            self.estimate = estimate;
            self.current_rank = target_rank;
        }
        Some(self.estimate)
    }

    pub fn push_back(&mut self, x: u32) {
        if x <= self.estimate {
            self.current_rank += 1;
        }
    }

    pub fn pop_front(&mut self, x: u32) {
        if x <= self.estimate {
            self.current_rank -= 1;
        }
    }

    pub fn reset(&mut self) {
        self.current_rank = 0;
        self.estimate = 0;
    }
}

/// Welford's online algorithm for mean and sample variance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CumulativeMeanVar {
    pub mean: f64,
    m2: f64,
    pub n: u32,
}

impl CumulativeMeanVar {
    pub fn update(&mut self, x: f64) {
        if self.n == u32::MAX {
            // Saturated, keep the current estimate.
            return;
        }
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / f64::from(self.n);
        self.m2 += delta * (x - self.mean);
    }

    pub fn variance(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        self.m2 / f64::from(self.n - 1)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Render time and vblank interval statistics used to pace frames.
#[derive(Debug, Clone)]
pub struct RenderStatistics {
    render_times: RollingWindow<u32>,
    render_time_quantile: RollingQuantile,
    render_time_max: RollingMax<u32>,
    vblank_time_us: CumulativeMeanVar,
}

impl Default for RenderStatistics {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_TIME_WINDOW)
    }
}

impl RenderStatistics {
    pub fn new(window_size: usize) -> Self {
        Self {
            render_times: RollingWindow::new(window_size),
            render_time_quantile: RollingQuantile::with_tolerance(
                window_size,
                RENDER_TIME_QUANTILE,
                RENDER_TIME_QUANTILE_TOLERANCE,
            ),
            render_time_max: RollingMax::new(window_size),
            vblank_time_us: CumulativeMeanVar::default(),
        }
    }

    /// Records the interval between two vblanks.
    ///
    /// A sample more than three standard deviations away from the current
    /// estimate resets the estimator, since it usually means the refresh
    /// rate changed. Once about ten seconds worth of samples are collected
    /// the estimate is frozen until the next outlier.
    pub fn add_vblank_time_sample(&mut self, time_us: u32) {
        let sample_sd = self.vblank_time_us.variance().sqrt();
        if let Some(current) = self.vblank_time() {
            if (f64::from(time_us) - f64::from(current)).abs() > sample_sd * 3.0 {
                debug!(
                    "vblank time outlier: {} {} {}",
                    time_us,
                    self.vblank_time_us.mean,
                    self.vblank_time_us.variance()
                );
                self.vblank_time_us.reset();
            }
        }

        if self.vblank_time_us.mean != 0.0 {
            let frames_in_10_seconds = (10_000_000.0 / self.vblank_time_us.mean) as u32;
            if self.vblank_time_us.n > MIN_VBLANK_SAMPLES
                && self.vblank_time_us.n > frames_in_10_seconds
            {
                return;
            }
        }
        self.vblank_time_us.update(f64::from(time_us));
    }

    /// Records how long one frame took to render.
    pub fn add_render_time_sample(&mut self, time_us: u32) {
        if let Some(oldest) = self.render_times.push_back(time_us) {
            self.render_time_quantile.pop_front(oldest);
            self.render_time_max.pop_front(oldest);
        }
        self.render_time_quantile.push_back(time_us);
        self.render_time_max.push_back(time_us);
    }

    /// Time budget, in microseconds, to give the backend for rendering a
    /// frame. `None` until the render time window has filled up.
    pub fn render_budget(&mut self) -> Option<u32> {
        if !self.render_times.is_full() {
            return None;
        }
        self.render_time_quantile.estimate(&self.render_times)
    }

    /// Longest render time in the current window.
    pub fn max_render_time(&self) -> Option<u32> {
        self.render_time_max.max()
    }

    /// Estimated vblank interval in microseconds. `None` with too few
    /// samples or an implausibly short interval.
    pub fn vblank_time(&self) -> Option<u32> {
        if self.vblank_time_us.n <= MIN_VBLANK_SAMPLES || self.vblank_time_us.mean < MIN_VBLANK_TIME_US
        {
            return None;
        }
        Some(self.vblank_time_us.mean as u32)
    }

    pub fn reset(&mut self) {
        self.render_times.reset();
        self.render_time_quantile.reset();
        self.render_time_max.reset();
        self.vblank_time_us.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rolling_window_evicts_oldest() {
        let mut window = RollingWindow::new(2);
        assert_eq!(window.push_back(1), None);
        assert_eq!(window.push_back(2), None);
        assert!(window.is_full());
        assert_eq!(window.push_back(3), Some(1));
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), [2, 3]);
        assert_eq!(window.pop_front(), Some(2));
        window.reset();
        assert!(window.is_empty());
    }

    #[test]
    fn test_rolling_max() {
        let data = [1, 2, 3, 1, 4, 5, 2, 3, 6, 5, 4, 3, 2, 0, 0];
        let expected = [1, 2, 3, 3, 4, 5, 5, 5, 6, 6, 6, 5, 4, 3, 2];
        let mut window = RollingWindow::new(3);
        let mut max = RollingMax::new(3);
        let mut result = Vec::new();
        for value in data {
            if let Some(front) = window.push_back(value) {
                max.pop_front(front);
            }
            max.push_back(value);
            result.push(max.max().unwrap());
        }
        assert_eq!(result, expected);
    }

    #[test]
    fn test_rolling_max_keeps_equal_maxima() {
        let mut window = RollingWindow::new(2);
        let mut max = RollingMax::new(2);
        for value in [938, 938, 0] {
            if let Some(front) = window.push_back(value) {
                max.pop_front(front);
            }
            max.push_back(value);
        }
        assert_eq!(max.max(), Some(938));
    }

    #[test]
    fn test_quantile_needs_full_window() {
        let mut stats = RenderStatistics::new(8);
        for _ in 0..7 {
            stats.add_render_time_sample(100);
        }
        assert_eq!(stats.render_budget(), None);
        stats.add_render_time_sample(100);
        assert_eq!(stats.render_budget(), Some(100));
    }

    #[test]
    fn test_constant_render_times_give_constant_budget() {
        let mut stats = RenderStatistics::default();
        for _ in 0..(DEFAULT_RENDER_TIME_WINDOW * 3) {
            stats.add_render_time_sample(100);
        }
        assert_eq!(stats.render_budget(), Some(100));
        assert_eq!(stats.max_render_time(), Some(100));
    }

    #[test]
    fn test_budget_tracks_high_quantile() {
        let mut stats = RenderStatistics::new(100);
        for i in 0..100 {
            stats.add_render_time_sample(i);
        }
        let budget = stats.render_budget().unwrap();
        assert!((97..=99).contains(&budget), "budget {}", budget);
    }

    #[test]
    fn test_welford() {
        let mut acc = CumulativeMeanVar::default();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.update(x);
        }
        assert!((acc.mean - 5.0).abs() < 1e-12);
        assert!((acc.variance() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_vblank_estimate_needs_samples() {
        let mut stats = RenderStatistics::default();
        for _ in 0..20 {
            stats.add_vblank_time_sample(16_667);
        }
        assert_eq!(stats.vblank_time(), None);
        stats.add_vblank_time_sample(16_667);
        assert_eq!(stats.vblank_time(), Some(16_667));
    }

    #[test]
    fn test_short_vblank_is_ignored() {
        let mut stats = RenderStatistics::default();
        for _ in 0..100 {
            stats.add_vblank_time_sample(50);
        }
        assert_eq!(stats.vblank_time(), None);
    }

    #[test]
    fn test_vblank_outlier_resets() {
        let mut stats = RenderStatistics::default();
        for i in 0..40 {
            stats.add_vblank_time_sample(16_660 + (i % 3) * 5);
        }
        assert!(stats.vblank_time().is_some());
        // Refresh rate changed from 60Hz to 144Hz.
        stats.add_vblank_time_sample(6_944);
        assert_eq!(stats.vblank_time(), None);
    }

    proptest! {
        #[test]
        fn prop_rolling_max_matches_naive(data in prop::collection::vec(0u32..1000, 1..64), size in 1usize..8) {
            let mut window = RollingWindow::new(size);
            let mut max = RollingMax::new(size);
            for value in data {
                if let Some(front) = window.push_back(value) {
                    max.pop_front(front);
                }
                max.push_back(value);
                prop_assert_eq!(max.max(), window.iter().copied().max());
            }
        }
    }
}
