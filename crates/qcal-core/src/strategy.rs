//! Range-selection strategies behind a common trait.

use std::fmt::Debug;

use crate::CalibrationError;
use crate::histogram::Histogram;
use crate::kl::KlMinimization;
use crate::norm::{Norm, NormMinimization, Search};
use crate::params::{MappingOptions, TensorQuantizationParams, choose_from_range};
use crate::scheme::QuantizationScheme;

/// Default fraction of mass kept by the percentile strategy.
pub const DEFAULT_PERCENTILE_THRESHOLD: f32 = 0.99;

/// A way of turning a finalized histogram into quantization parameters.
pub trait QuantizationStrategy: Debug + Send + Sync {
    /// Human-readable name of the strategy.
    fn name(&self) -> &str;

    /// Select parameters for `hist`. Never fails; degenerate inputs fall back
    /// to the min/max mapping.
    fn choose(&self, hist: &Histogram, options: &MappingOptions) -> TensorQuantizationParams;
}

/// Maps the full observed range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MinMax;

impl QuantizationStrategy for MinMax {
    fn name(&self) -> &str {
        "min-max"
    }

    fn choose(&self, hist: &Histogram, options: &MappingOptions) -> TensorQuantizationParams {
        choose_from_range(hist.min(), hist.max(), options)
    }
}

/// Clips both tails of the distribution at a mass threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Percentile {
    threshold: f32,
}

impl Percentile {
    /// `threshold` is the fraction of mass kept below the upper edge and
    /// must lie in `(0.5, 1.0]`.
    pub fn new(threshold: f32) -> Result<Self, CalibrationError> {
        validate_threshold(threshold)?;
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for Percentile {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_PERCENTILE_THRESHOLD,
        }
    }
}

impl QuantizationStrategy for Percentile {
    fn name(&self) -> &str {
        "percentile"
    }

    fn choose(&self, hist: &Histogram, options: &MappingOptions) -> TensorQuantizationParams {
        if hist.is_empty() {
            return choose_from_range(hist.min(), hist.max(), options);
        }
        let t = f64::from(self.threshold);
        let low = hist.percentile(1.0 - t);
        let high = hist.percentile(t);
        log::debug!(
            "percentile {t} selected [{low}, {high}] of [{}, {}]",
            hist.min(),
            hist.max()
        );
        choose_from_range(low, high, options)
    }
}

impl QuantizationStrategy for NormMinimization {
    fn name(&self) -> &str {
        match (self.norm, self.search) {
            (Norm::L2, Search::Exact) => "l2-exact",
            (Norm::L2, Search::Approx) => "l2-approx",
            (Norm::L1, Search::Exact) => "l1-exact",
            (Norm::L1, Search::Approx) => "l1-approx",
        }
    }

    fn choose(&self, hist: &Histogram, options: &MappingOptions) -> TensorQuantizationParams {
        NormMinimization::choose(self, hist, options)
    }
}

impl QuantizationStrategy for KlMinimization {
    fn name(&self) -> &str {
        "kl-divergence"
    }

    fn choose(&self, hist: &Histogram, options: &MappingOptions) -> TensorQuantizationParams {
        KlMinimization::choose(self, hist, options)
    }
}

/// Check a percentile threshold.
pub fn validate_threshold(threshold: f32) -> Result<f32, CalibrationError> {
    if threshold > 0.5 && threshold <= 1.0 {
        Ok(threshold)
    } else {
        Err(CalibrationError::InvalidThreshold(threshold))
    }
}

/// Build the strategy for `scheme`. `percentile_threshold` is only used by
/// [`QuantizationScheme::Percentile`].
pub fn strategy_for(
    scheme: QuantizationScheme,
    percentile_threshold: f32,
) -> Result<Box<dyn QuantizationStrategy>, CalibrationError> {
    Ok(match scheme {
        QuantizationScheme::MinMax => Box::new(MinMax),
        QuantizationScheme::L2Exact => Box::new(NormMinimization::new(Norm::L2, Search::Exact)),
        QuantizationScheme::L2Approx => Box::new(NormMinimization::new(Norm::L2, Search::Approx)),
        QuantizationScheme::KlDivergence => Box::new(KlMinimization),
        QuantizationScheme::Percentile => Box::new(Percentile::new(percentile_threshold)?),
        QuantizationScheme::L1 => Box::new(NormMinimization::new(Norm::L1, Search::Exact)),
    })
}
