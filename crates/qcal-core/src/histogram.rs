//! Fixed-bin histograms of observed tensor values.
//!
//! A [`Histogram`] keeps a constant number of equal-width bins over a range
//! that grows as new values arrive. When the range widens, existing counts are
//! redistributed onto the new bins (see [`Histogram::observe`]), so early
//! batches that underestimate the eventual range are not discarded.

use crate::CalibrationError;

/// Default number of histogram bins.
pub const DEFAULT_NUM_BINS: usize = 2048;

/// Histogram of values for a single tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    min: f32,
    max: f32,
    bins: Vec<u64>,
}

impl Histogram {
    /// Create an empty histogram with `num_bins` bins.
    ///
    /// # Panics
    ///
    /// Panics if `num_bins` is zero.
    pub fn new(num_bins: usize) -> Self {
        assert!(num_bins > 0, "histogram needs at least one bin");
        Self {
            min: 0.0,
            max: 0.0,
            bins: vec![0; num_bins],
        }
    }

    /// Create a histogram covering the finite values of `values`.
    pub fn from_values(values: &[f32], num_bins: usize) -> Self {
        let mut hist = Self::new(num_bins);
        hist.observe(values);
        hist
    }

    /// Build a histogram from an explicit description.
    ///
    /// The bin counts must sum to at most `u64::MAX`.
    pub fn from_parts(min: f32, max: f32, bins: Vec<u64>) -> Result<Self, CalibrationError> {
        if bins.is_empty() {
            return Err(CalibrationError::NoBins);
        }
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(CalibrationError::InvalidRange { min, max });
        }
        bins.iter()
            .try_fold(0u64, |acc, &c| acc.checked_add(c))
            .ok_or(CalibrationError::CountOverflow)?;
        Ok(Self { min, max, bins })
    }

    /// Lower edge of the first bin.
    pub fn min(&self) -> f32 {
        self.min
    }

    /// Upper edge of the last bin.
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Bin counts.
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Number of bins, fixed at construction.
    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    /// Total number of values accumulated, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.bins.iter().fold(0u64, |acc, &c| acc.saturating_add(c))
    }

    /// Returns `true` if no value has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.bins.iter().all(|&c| c == 0)
    }

    /// Width of a single bin.
    pub fn bin_width(&self) -> f32 {
        self.width() as f32
    }

    pub(crate) fn width(&self) -> f64 {
        (f64::from(self.max) - f64::from(self.min)) / self.bins.len() as f64
    }

    /// Accumulate a batch of values.
    ///
    /// Non-finite values are skipped. If the batch falls outside the current
    /// range, the range is widened first and the existing counts are moved
    /// onto the new bins. An empty histogram adopts the batch's range.
    pub fn observe(&mut self, values: &[f32]) {
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        let mut skipped = 0usize;
        for &v in values {
            if !v.is_finite() {
                skipped += 1;
                continue;
            }
            lo = lo.min(v);
            hi = hi.max(v);
        }
        if skipped > 0 {
            log::warn!("histogram skipped {skipped} non-finite values");
        }
        if lo > hi {
            return;
        }

        if self.is_empty() {
            self.min = lo;
            self.max = hi;
        } else if lo < self.min || hi > self.max {
            let new_min = self.min.min(lo);
            let new_max = self.max.max(hi);
            self.bins = self.redistribute(new_min, new_max, self.bins.len());
            self.min = new_min;
            self.max = new_max;
        }

        for &v in values.iter().filter(|v| v.is_finite()) {
            let idx = self.bin_index(v);
            self.bins[idx] = self.bins[idx].saturating_add(1);
        }
    }

    /// Merge another histogram's counts into this one.
    ///
    /// The result covers the union of both ranges with this histogram's bin
    /// count; its total is the sum of both totals.
    pub fn merge_from(&mut self, other: &Histogram) {
        if other.is_empty() {
            return;
        }
        let num_bins = self.bins.len();
        if self.is_empty() {
            self.bins = other.redistribute(other.min, other.max, num_bins);
            self.min = other.min;
            self.max = other.max;
            return;
        }

        let new_min = self.min.min(other.min);
        let new_max = self.max.max(other.max);
        let mut bins = self.redistribute(new_min, new_max, num_bins);
        for (a, b) in bins
            .iter_mut()
            .zip(other.redistribute(new_min, new_max, num_bins))
        {
            *a = a.saturating_add(b);
        }
        self.min = new_min;
        self.max = new_max;
        self.bins = bins;
    }

    /// Return a new histogram holding the counts of both inputs.
    pub fn merge(&self, other: &Histogram) -> Histogram {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// Value below which `fraction` (0.0 to 1.0) of the mass lies,
    /// interpolated linearly inside the bin.
    pub fn percentile(&self, fraction: f64) -> f32 {
        let total = self.total();
        if total == 0 {
            return self.min;
        }
        let target = fraction.clamp(0.0, 1.0) * total as f64;
        let width = self.width();

        let mut cumulative = 0.0f64;
        for (i, &count) in self.bins.iter().enumerate() {
            let next = cumulative + count as f64;
            if count > 0 && next >= target {
                let frac = ((target - cumulative) / count as f64).clamp(0.0, 1.0);
                return (f64::from(self.min) + width * (i as f64 + frac)) as f32;
            }
            cumulative = next;
        }
        self.max
    }

    fn bin_index(&self, v: f32) -> usize {
        let width = self.width();
        if width <= 0.0 {
            return 0;
        }
        // Saturating cast: values left of `min` land in bin 0.
        let idx = ((f64::from(v) - f64::from(self.min)) / width) as usize;
        idx.min(self.bins.len() - 1)
    }

    /// Move the counts onto `num_bins` bins spanning `[min, max]`, which must
    /// contain this histogram's range.
    ///
    /// With `F` the cumulative count (linear inside each bin, a point mass at
    /// `min` for a zero-width histogram), new bin `j` gets
    /// `round(F(e[j+1])) - round(F(e[j]))`. The sum telescopes to the total.
    fn redistribute(&self, min: f32, max: f32, num_bins: usize) -> Vec<u64> {
        if min == self.min && max == self.max && num_bins == self.bins.len() {
            return self.bins.clone();
        }
        let total = self.total();
        let mut prefix = Vec::with_capacity(self.bins.len() + 1);
        prefix.push(0u64);
        let mut acc = 0u64;
        for &c in &self.bins {
            acc = acc.saturating_add(c);
            prefix.push(acc);
        }

        let new_width = (f64::from(max) - f64::from(min)) / num_bins as f64;
        let mut bins = Vec::with_capacity(num_bins);
        let mut prev = 0u64;
        for j in 1..=num_bins {
            let edge = f64::from(min) + new_width * j as f64;
            let cumulative = if j == num_bins {
                total
            } else {
                (self.cumulative_at(&prefix, edge).round() as u64).clamp(prev, total)
            };
            bins.push(cumulative - prev);
            prev = cumulative;
        }
        bins
    }

    fn cumulative_at(&self, prefix: &[u64], x: f64) -> f64 {
        let total = prefix[prefix.len() - 1] as f64;
        let min = f64::from(self.min);
        let width = self.width();
        if width <= 0.0 {
            return if x > min { total } else { 0.0 };
        }
        let pos = (x - min) / width;
        if pos <= 0.0 {
            return 0.0;
        }
        if pos >= self.bins.len() as f64 {
            return total;
        }
        let k = pos.floor() as usize;
        prefix[k] as f64 + (pos - k as f64) * self.bins[k] as f64
    }
}
