//! Adaptive batch sizing and concurrency control.
//!
//! Once per load window the shard compares what it observed (average
//! processing time, normalized event volume, average queue depth) against
//! fixed thresholds and nudges its two control parameters. The first matching
//! rule wins:
//!
//! | Condition                                   | Adjustment                          |
//! |---------------------------------------------|-------------------------------------|
//! | processing < 100ms and volume > 1000/min    | concurrency + 1, batch size × 1.1   |
//! | processing > 500ms                          | batch size × 0.8                    |
//! | queue depth > 5                             | batch size × 1.2                    |
//! | queue depth == 0 and volume < 100/min       | batch size × 0.9, concurrency − 1   |
//!
//! Scaling uses integer arithmetic (`⌊n × k / 10⌋`) and every result is
//! clamped to its bounds, so the parameters can never leave
//! `[MIN_BATCH_SIZE, MAX_BATCH_SIZE]` and `[MIN_CONCURRENCY, MAX_CONCURRENCY]`.

pub const MIN_BATCH_SIZE: usize = 10;
pub const MAX_BATCH_SIZE: usize = 200;
pub const INITIAL_BATCH_SIZE: usize = 50;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 10;
pub const INITIAL_CONCURRENCY: usize = 5;

const FAST_PROCESSING_MS: f64 = 100.0;
const SLOW_PROCESSING_MS: f64 = 500.0;
const HIGH_VOLUME_PER_MIN: f64 = 1000.0;
const LOW_VOLUME_PER_MIN: f64 = 100.0;
const BACKLOG_QUEUE_DEPTH: f64 = 5.0;

/// The two knobs a shard tunes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlParameters {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
}

impl Default for ControlParameters {
    fn default() -> Self {
        ControlParameters {
            batch_size: INITIAL_BATCH_SIZE,
            max_concurrent_batches: INITIAL_CONCURRENCY,
        }
    }
}

/// What the shard saw during one load window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadObservation {
    /// Mean batch processing time in milliseconds (0 with no samples).
    pub avg_processing_ms: f64,
    /// Events received, normalized to a per-minute rate.
    pub events_per_minute: f64,
    /// Mean queue depth recorded at flush time (0 with no samples).
    pub avg_queue_depth: f64,
}

/// Which rule fired for a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    ScaleUp,
    ShrinkForLatency,
    GrowForBacklog,
    ScaleDown,
    Hold,
}

impl ControlParameters {
    /// Creates parameters clamped to their bounds.
    pub fn new(batch_size: usize, max_concurrent_batches: usize) -> Self {
        ControlParameters {
            batch_size: clamp_batch(batch_size),
            max_concurrent_batches: max_concurrent_batches.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY),
        }
    }

    /// Applies the first matching rule for `load` and reports which one fired.
    pub fn adjust(&mut self, load: &LoadObservation) -> Adjustment {
        let adjustment = classify(load);
        match adjustment {
            Adjustment::ScaleUp => {
                self.max_concurrent_batches = (self.max_concurrent_batches + 1).min(MAX_CONCURRENCY);
                self.batch_size = scale(self.batch_size, 11);
            }
            Adjustment::ShrinkForLatency => {
                self.batch_size = scale(self.batch_size, 8);
            }
            Adjustment::GrowForBacklog => {
                self.batch_size = scale(self.batch_size, 12);
            }
            Adjustment::ScaleDown => {
                self.batch_size = scale(self.batch_size, 9);
                self.max_concurrent_batches = self
                    .max_concurrent_batches
                    .saturating_sub(1)
                    .max(MIN_CONCURRENCY);
            }
            Adjustment::Hold => {}
        }
        adjustment
    }
}

fn classify(load: &LoadObservation) -> Adjustment {
    if load.avg_processing_ms < FAST_PROCESSING_MS && load.events_per_minute > HIGH_VOLUME_PER_MIN {
        Adjustment::ScaleUp
    } else if load.avg_processing_ms > SLOW_PROCESSING_MS {
        Adjustment::ShrinkForLatency
    } else if load.avg_queue_depth > BACKLOG_QUEUE_DEPTH {
        Adjustment::GrowForBacklog
    } else if load.avg_queue_depth == 0.0 && load.events_per_minute < LOW_VOLUME_PER_MIN {
        Adjustment::ScaleDown
    } else {
        Adjustment::Hold
    }
}

/// `⌊n × tenths / 10⌋`, clamped to the batch size bounds.
fn scale(n: usize, tenths: usize) -> usize {
    clamp_batch(n * tenths / 10)
}

fn clamp_batch(n: usize) -> usize {
    n.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn load(avg_processing_ms: f64, events_per_minute: f64, avg_queue_depth: f64) -> LoadObservation {
        LoadObservation {
            avg_processing_ms,
            events_per_minute,
            avg_queue_depth,
        }
    }

    #[test]
    fn defaults_match_initial_values() {
        let params = ControlParameters::default();
        assert_eq!(params.batch_size, 50);
        assert_eq!(params.max_concurrent_batches, 5);
    }

    #[test]
    fn fast_high_volume_scales_up() {
        let mut params = ControlParameters::default();
        assert_eq!(params.adjust(&load(20.0, 1500.0, 0.0)), Adjustment::ScaleUp);
        assert_eq!(params, ControlParameters::new(55, 6));
    }

    #[test]
    fn slow_processing_shrinks_batches() {
        let mut params = ControlParameters::default();
        assert_eq!(params.adjust(&load(800.0, 50.0, 9.0)), Adjustment::ShrinkForLatency);
        assert_eq!(params, ControlParameters::new(40, 5));
    }

    #[test]
    fn backlog_grows_batches() {
        let mut params = ControlParameters::default();
        assert_eq!(params.adjust(&load(200.0, 500.0, 6.0)), Adjustment::GrowForBacklog);
        assert_eq!(params, ControlParameters::new(60, 5));
    }

    #[test]
    fn idle_scales_down() {
        let mut params = ControlParameters::default();
        assert_eq!(params.adjust(&load(0.0, 10.0, 0.0)), Adjustment::ScaleDown);
        assert_eq!(params, ControlParameters::new(45, 4));
    }

    #[test]
    fn first_matching_rule_wins() {
        // Both the scale-up and backlog rules match; scale-up comes first.
        let mut params = ControlParameters::default();
        assert_eq!(params.adjust(&load(10.0, 5000.0, 50.0)), Adjustment::ScaleUp);
    }

    #[test]
    fn moderate_load_holds() {
        let mut params = ControlParameters::default();
        assert_eq!(params.adjust(&load(200.0, 500.0, 2.0)), Adjustment::Hold);
        assert_eq!(params, ControlParameters::default());
    }

    #[test]
    fn bounds_saturate() {
        let mut params = ControlParameters::new(MAX_BATCH_SIZE, MAX_CONCURRENCY);
        params.adjust(&load(1.0, 10_000.0, 0.0));
        assert_eq!(params, ControlParameters::new(MAX_BATCH_SIZE, MAX_CONCURRENCY));

        let mut params = ControlParameters::new(MIN_BATCH_SIZE, MIN_CONCURRENCY);
        params.adjust(&load(0.0, 0.0, 0.0));
        assert_eq!(params, ControlParameters::new(MIN_BATCH_SIZE, MIN_CONCURRENCY));
    }

    #[test]
    fn new_clamps_out_of_range_values() {
        assert_eq!(ControlParameters::new(0, 0), ControlParameters::new(10, 1));
        assert_eq!(ControlParameters::new(1000, 99), ControlParameters::new(200, 10));
    }

    fn arb_load() -> impl Strategy<Value = LoadObservation> {
        (0.0f64..2000.0, 0.0f64..10_000.0, prop_oneof![Just(0.0), 0.0f64..50.0])
            .prop_map(|(p, v, q)| load(p, v, q))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn adjustments_stay_in_bounds(
            batch in MIN_BATCH_SIZE..=MAX_BATCH_SIZE,
            concurrency in MIN_CONCURRENCY..=MAX_CONCURRENCY,
            loads in prop::collection::vec(arb_load(), 1..30),
        ) {
            let mut params = ControlParameters::new(batch, concurrency);
            for l in &loads {
                params.adjust(l);
                prop_assert!((MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&params.batch_size));
                prop_assert!((MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&params.max_concurrent_batches));
            }
        }
    }
}
