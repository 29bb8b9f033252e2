use serde::Serialize;

/// Running min/max/sum/count over a stream of optional samples.
///
/// Uses O(1) space regardless of how many samples are recorded. Absent
/// samples are skipped without touching any field, so an accumulator fed
/// only `None` stays in its empty state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricAccumulator {
    minimum: f64,
    maximum: f64,
    sum: f64,
    count: u64,
}

impl MetricAccumulator {
    /// Creates an empty accumulator with min at +inf and max at -inf.
    pub fn new() -> Self {
        Self {
            minimum: f64::INFINITY,
            maximum: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }

    /// Records a sample. `None` is a no-op.
    pub fn add(&mut self, value: Option<f64>) {
        let Some(value) = value else {
            return;
        };

        if value < self.minimum {
            self.minimum = value;
        }
        if value > self.maximum {
            self.maximum = value;
        }
        self.sum += value;
        self.count += 1;
    }

    /// Number of samples recorded so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn minimum(&self) -> f64 {
        self.minimum
    }

    pub fn maximum(&self) -> f64 {
        self.maximum
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Returns min/max/mean, or all zeros when nothing was recorded.
    pub fn summarize(&self) -> Summary {
        if self.count == 0 {
            return Summary::default();
        }

        Summary {
            min: self.minimum,
            max: self.maximum,
            avg: self.sum / self.count as f64,
        }
    }
}

impl Default for MetricAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time min/max/avg view of a [`MetricAccumulator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl Summary {
    /// Divides every field by `divisor`, e.g. to turn bytes into MiB.
    pub fn scaled(self, divisor: f64) -> Self {
        Self {
            min: self.min / divisor,
            max: self.max / divisor,
            avg: self.avg / divisor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_empty() {
        let acc = MetricAccumulator::new();
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.minimum(), f64::INFINITY);
        assert_eq!(acc.maximum(), f64::NEG_INFINITY);
        assert_eq!(acc.sum(), 0.0);
    }

    #[test]
    fn test_add_tracks_min_max_sum() {
        let mut acc = MetricAccumulator::new();
        acc.add(Some(50.0));
        acc.add(Some(100.0));
        acc.add(Some(75.0));

        assert_eq!(acc.count(), 3);
        assert_eq!(acc.minimum(), 50.0);
        assert_eq!(acc.maximum(), 100.0);
        assert_eq!(acc.sum(), 225.0);
        assert_eq!(
            acc.summarize(),
            Summary {
                min: 50.0,
                max: 100.0,
                avg: 75.0,
            }
        );
    }

    #[test]
    fn test_absent_sample_is_noop() {
        let mut acc = MetricAccumulator::new();
        acc.add(None);
        assert_eq!(acc, MetricAccumulator::new());

        acc.add(Some(3.0));
        let before = acc;
        acc.add(None);
        assert_eq!(acc, before);
    }

    #[test]
    fn test_summarize_empty_is_zero() {
        let mut acc = MetricAccumulator::new();
        acc.add(None);
        assert_eq!(acc.summarize(), Summary::default());
    }

    #[test]
    fn test_single_sample() {
        let mut acc = MetricAccumulator::new();
        acc.add(Some(0.0));
        assert_eq!(acc.count(), 1);
        assert_eq!(acc.summarize(), Summary::default());
    }

    #[test]
    fn test_scaled() {
        let s = Summary {
            min: 1_048_576.0,
            max: 2_097_152.0,
            avg: 1_572_864.0,
        }
        .scaled(1_048_576.0);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 2.0);
        assert_eq!(s.avg, 1.5);
    }
}
