//! Sliding statistical window
//!
//! Fixed-capacity ring buffer with running sum and sum-of-squares, so the
//! aggregates the pipeline reads each tick are O(1) amortized instead of a
//! rescan of the buffer.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    buf: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be positive");
        Self {
            capacity,
            buf: VecDeque::with_capacity(capacity),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.buf.len() == self.capacity {
            if let Some(evicted) = self.buf.pop_front() {
                self.sum -= evicted;
                self.sum_sq -= evicted * evicted;
            }
        }
        self.buf.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn mean(&self) -> f64 {
        if self.buf.is_empty() {
            return 0.0;
        }
        self.sum / self.buf.len() as f64
    }

    /// Sample standard deviation (ddof = 1); zero below two samples.
    pub fn std(&self) -> f64 {
        let n = self.buf.len();
        if n < 2 {
            return 0.0;
        }
        let n_f = n as f64;
        let var = (self.sum_sq - self.sum * self.sum / n_f) / (n_f - 1.0);
        // Running sums can drift a hair below zero on near-constant input.
        var.max(0.0).sqrt()
    }

    /// Change across the window: newest minus oldest buffered value.
    pub fn gradient(&self) -> f64 {
        match (self.buf.back(), self.buf.front()) {
            (Some(last), Some(first)) if self.buf.len() > 1 => last - first,
            _ => 0.0,
        }
    }

    pub fn latest(&self) -> Option<f64> {
        self.buf.back().copied()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn naive_std(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }
        let m = naive_mean(values);
        let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>()
            / (values.len() - 1) as f64;
        var.sqrt()
    }

    #[test]
    fn test_incremental_matches_naive() {
        let mut window = SlidingWindow::new(5);
        let stream: Vec<f64> = (0..40).map(|i| (i as f64 * 0.73).sin() * 100.0 + 400.0).collect();

        for (i, &v) in stream.iter().enumerate() {
            window.push(v);
            let tail_start = (i + 1).saturating_sub(5);
            let tail = &stream[tail_start..=i];

            assert!((window.mean() - naive_mean(tail)).abs() < 1e-9);
            assert!((window.std() - naive_std(tail)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_eviction_keeps_capacity() {
        let mut window = SlidingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert!((window.mean() - 4.0).abs() < 1e-12);
        assert!((window.gradient() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_needs_two_samples() {
        let mut window = SlidingWindow::new(4);
        window.push(10.0);
        assert_eq!(window.gradient(), 0.0);
        window.push(14.0);
        assert!((window.gradient() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_clear_resets_aggregates() {
        let mut window = SlidingWindow::new(4);
        window.push(2.0);
        window.push(8.0);
        window.clear();

        assert!(window.is_empty());
        assert_eq!(window.mean(), 0.0);
        assert_eq!(window.std(), 0.0);
    }

    #[test]
    fn test_std_near_constant_input_stays_finite() {
        let mut window = SlidingWindow::new(8);
        for _ in 0..100 {
            window.push(520.000001);
        }
        assert!(window.std() >= 0.0);
        assert!(window.std() < 1e-3);
    }
}
