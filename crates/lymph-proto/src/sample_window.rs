//! Fixed-capacity rolling sample window used by connection heartbeat RTTs.
//!
//! The source (`lymph.utils.SampleWindow`) keeps the last N samples and
//! derives a phi-accrual-style survival probability from their mean and
//! standard deviation. This is a ring-buffer reimplementation of the same
//! idea: O(1) insert, running mean/variance via Welford's method so `p` never
//! has to rescan the buffer.

use std::collections::VecDeque;

/// A bounded window of recent samples with an online mean/stddev estimate.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    capacity: usize,
    /// Scales inserted values, matching the source's `factor` (e.g. RTTs in
    /// seconds get `factor=1000` to report milliseconds).
    factor: f64,
    samples: VecDeque<f64>,
    mean: f64,
    m2: f64,
}

impl SampleWindow {
    pub fn new(capacity: usize, factor: f64) -> Self {
        Self {
            capacity,
            factor,
            samples: VecDeque::with_capacity(capacity),
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Record a new sample, evicting the oldest if the window is full.
    pub fn add(&mut self, value_secs: f64) {
        let value = value_secs * self.factor;
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.remove_from_stats(oldest);
            }
        }
        self.samples.push_back(value);
        self.add_to_stats(value);
    }

    fn add_to_stats(&mut self, value: f64) {
        let n = self.samples.len() as f64;
        let delta = value - self.mean;
        self.mean += delta / n;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    fn remove_from_stats(&mut self, value: f64) {
        let n = self.samples.len() as f64;
        if n == 0.0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let delta = value - self.mean;
        self.mean -= delta / n;
        let delta2 = value - self.mean;
        self.m2 -= delta * delta2;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stddev(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        (self.m2 / (self.samples.len() as f64 - 1.0)).sqrt()
    }

    /// Survival probability of observing a gap of `dt_secs` given the
    /// recorded samples: `P(dt) = exp(-((dt - mean) / stddev))` clamped to
    /// `[0, 1]`, falling back to 1.0 with no samples (nothing is overdue yet).
    pub fn p(&self, dt_secs: f64) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        let dt = dt_secs * self.factor;
        let stddev = self.stddev().max(1e-9);
        let y = (dt - self.mean) / stddev;
        (1.0 / (1.0 + y.exp())).clamp(0.0, 1.0)
    }

    /// `phi = -log10(P(dt))`, `f64::INFINITY` when `P(dt) == 0`.
    pub fn phi(&self, dt_secs: f64) -> f64 {
        let p = self.p(dt_secs);
        if p <= 0.0 {
            f64::INFINITY
        } else {
            -p.log10()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_treats_everything_as_alive() {
        let window = SampleWindow::new(10, 1.0);
        assert_eq!(window.p(100.0), 1.0);
        assert_eq!(window.phi(100.0), 0.0);
    }

    #[test]
    fn phi_increases_as_gap_grows_past_mean() {
        let mut window = SampleWindow::new(10, 1.0);
        for _ in 0..20 {
            window.add(0.01);
        }
        let near = window.phi(0.01);
        let far = window.phi(1.0);
        assert!(far > near, "phi({}) should exceed phi({})", 1.0, 0.01);
    }

    #[test]
    fn window_evicts_oldest_beyond_capacity() {
        let mut window = SampleWindow::new(3, 1.0);
        window.add(1.0);
        window.add(1.0);
        window.add(1.0);
        window.add(100.0);
        assert_eq!(window.len(), 3);
        assert!(window.mean() > 1.0);
    }

    #[test]
    fn mean_matches_simple_average() {
        let mut window = SampleWindow::new(10, 1.0);
        for v in [1.0, 2.0, 3.0] {
            window.add(v);
        }
        assert!((window.mean() - 2.0).abs() < 1e-9);
    }
}
