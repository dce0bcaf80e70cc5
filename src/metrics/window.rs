//! Fixed-capacity sample windows.
//!
//! A [`SampleWindow`] keeps the most recent `capacity` observations in a ring
//! buffer: pushing never reallocates once full, and percentiles are computed
//! by selection in O(capacity).

/// Default number of samples kept per window.
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Ring buffer of the most recent samples.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: Vec<u64>,
    next: usize,
    capacity: usize,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl SampleWindow {
    /// Creates an empty window. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SampleWindow {
            samples: Vec::with_capacity(capacity),
            next: 0,
            capacity,
        }
    }

    /// Records a sample, overwriting the oldest once full.
    pub fn push(&mut self, sample: u64) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.next] = sample;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The retained samples, in no particular order.
    pub fn samples(&self) -> &[u64] {
        &self.samples
    }

    /// Arithmetic mean; `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        mean(&self.samples)
    }

    /// Nearest-rank percentile (`sorted[floor(n * p)]`); 0 when empty.
    pub fn percentile(&self, p: f64) -> u64 {
        percentile(&self.samples, p)
    }
}

/// Arithmetic mean of a slice; `None` when empty.
pub fn mean(samples: &[u64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: u64 = samples.iter().sum();
    Some(sum as f64 / samples.len() as f64)
}

/// Nearest-rank percentile of an unsorted slice; 0 when empty.
pub fn percentile(samples: &[u64], p: f64) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let mut scratch = samples.to_vec();
    let rank = ((scratch.len() as f64 * p).floor() as usize).min(scratch.len() - 1);
    *scratch.select_nth_unstable(rank).1
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_window_reports_zero() {
        let window = SampleWindow::default();
        assert_eq!(window.mean(), None);
        assert_eq!(window.percentile(0.5), 0);
    }

    #[test]
    fn keeps_only_most_recent_samples() {
        let mut window = SampleWindow::new(3);
        for s in [1, 2, 3, 4, 5] {
            window.push(s);
        }
        let mut kept = window.samples().to_vec();
        kept.sort_unstable();
        assert_eq!(kept, vec![3, 4, 5]);
    }

    #[test]
    fn percentiles_match_nearest_rank_floor() {
        let mut window = SampleWindow::new(100);
        for s in (1..=100).rev() {
            window.push(s);
        }
        // sorted[50] = 51, sorted[95] = 96, sorted[99] = 100
        assert_eq!(window.percentile(0.5), 51);
        assert_eq!(window.percentile(0.95), 96);
        assert_eq!(window.percentile(0.99), 100);
        assert_eq!(window.mean(), Some(50.5));
    }

    #[test]
    fn zero_capacity_behaves_as_one() {
        let mut window = SampleWindow::new(0);
        window.push(7);
        window.push(9);
        assert_eq!(window.samples(), &[9]);
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity(
            capacity in 1usize..64,
            samples in prop::collection::vec(any::<u32>(), 0..200),
        ) {
            let mut window = SampleWindow::new(capacity);
            for s in &samples {
                window.push(u64::from(*s));
            }
            prop_assert_eq!(window.len(), samples.len().min(capacity));
        }

        #[test]
        fn percentile_is_a_retained_sample(
            samples in prop::collection::vec(0u64..10_000, 1..150),
            p in 0.0f64..1.0,
        ) {
            let mut window = SampleWindow::default();
            for s in &samples {
                window.push(*s);
            }
            let value = window.percentile(p);
            prop_assert!(window.samples().contains(&value));
        }
    }
}
