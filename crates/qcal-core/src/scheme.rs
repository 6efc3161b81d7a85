//! Quantization scheme selection.

use std::fmt;
use std::str::FromStr;

use crate::CalibrationError;

/// Error criterion used to pick the quantized range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum QuantizationScheme {
    /// Use the observed min/max directly.
    #[default]
    MinMax,
    /// Minimize squared error over every truncation range.
    L2Exact,
    /// Minimize squared error over a coarse-to-fine candidate grid.
    L2Approx,
    /// Minimize the KL divergence between the clipped and quantized
    /// distributions.
    KlDivergence,
    /// Clip both tails at a percentile threshold.
    Percentile,
    /// Minimize absolute error over every truncation range.
    L1,
}

impl QuantizationScheme {
    /// Every scheme, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::MinMax,
        Self::L2Exact,
        Self::L2Approx,
        Self::KlDivergence,
        Self::Percentile,
        Self::L1,
    ];

    /// Canonical name, as written in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Self::MinMax => "MIN_MAX_QUANTIZATION",
            Self::L2Exact => "L2_MIN_QUANTIZATION",
            Self::L2Approx => "L2_MIN_QUANTIZATION_APPROX",
            Self::KlDivergence => "KL_MIN_QUANTIZATION",
            Self::Percentile => "P99_QUANTIZATION",
            Self::L1 => "L1_MIN_QUANTIZATION",
        }
    }

    /// Parse a scheme name (canonical or short alias, case-insensitive).
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "min_max_quantization" | "min_max" | "minmax" => Some(Self::MinMax),
            "l2_min_quantization" | "l2" => Some(Self::L2Exact),
            "l2_min_quantization_approx" | "l2_approx" | "l2-approx" => Some(Self::L2Approx),
            "kl_min_quantization" | "kl" | "kl-divergence" | "entropy" => {
                Some(Self::KlDivergence)
            }
            "p99_quantization" | "p99" | "percentile" => Some(Self::Percentile),
            "l1_min_quantization" | "l1" => Some(Self::L1),
            _ => None,
        }
    }

    /// Parse a scheme name, falling back to [`QuantizationScheme::MinMax`]
    /// for anything unrecognized.
    pub fn from_name_or_default(s: &str) -> Self {
        Self::from_str_name(s).unwrap_or_else(|| {
            log::info!("unknown quantization scheme '{s}', using default MIN_MAX_QUANTIZATION");
            Self::MinMax
        })
    }

    /// Whether the scheme needs a full histogram rather than min/max.
    pub fn needs_histogram(self) -> bool {
        !matches!(self, Self::MinMax)
    }
}

impl fmt::Display for QuantizationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QuantizationScheme {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_name(s).ok_or_else(|| CalibrationError::UnknownScheme(s.to_string()))
    }
}
