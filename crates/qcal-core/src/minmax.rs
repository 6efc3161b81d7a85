//! Running min/max statistics.

/// Running `(min, max)` over every finite value observed so far.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinMaxTracker {
    min: f32,
    max: f32,
}

impl Default for MinMaxTracker {
    fn default() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }
}

impl MinMaxTracker {
    /// Empty tracker; [`Self::range`] is `None` until a finite value arrives.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker covering the finite values of `values`.
    pub fn from_values(values: &[f32]) -> Self {
        let mut tracker = Self::default();
        tracker.observe(values);
        tracker
    }

    /// Tracker with an explicit range.
    pub fn from_range(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Widen the range to cover the finite values of `values`.
    pub fn observe(&mut self, values: &[f32]) {
        for &v in values.iter().filter(|v| v.is_finite()) {
            if v < self.min {
                self.min = v;
            }
            if v > self.max {
                self.max = v;
            }
        }
    }

    /// Widen the range to cover another tracker's range.
    pub fn merge_from(&mut self, other: &MinMaxTracker) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Smallest value seen, `+inf` while empty.
    pub fn min(&self) -> f32 {
        self.min
    }

    /// Largest value seen, `-inf` while empty.
    pub fn max(&self) -> f32 {
        self.max
    }

    /// The observed range, or `None` before the first finite value.
    pub fn range(&self) -> Option<(f32, f32)> {
        (self.min <= self.max).then_some((self.min, self.max))
    }
}
