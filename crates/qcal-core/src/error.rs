//! Error types for quantization parameter selection.

/// Errors that can occur while building statistics or choosing parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    /// A histogram was described with no bins.
    #[error("histogram must have at least one bin")]
    NoBins,

    /// A histogram range was not finite or had `min > max`.
    #[error("invalid histogram range [{min}, {max}]")]
    InvalidRange { min: f32, max: f32 },

    /// The bin counts of a histogram sum past `u64::MAX`.
    #[error("histogram bin counts overflow a 64-bit total")]
    CountOverflow,

    /// Target bit-width outside the supported range.
    #[error("unsupported precision {0} (expected 1..=16 bits)")]
    InvalidPrecision(u8),

    /// Percentile threshold outside `(0.5, 1.0]`.
    #[error("percentile threshold {0} out of range (expected 0.5 < t <= 1.0)")]
    InvalidThreshold(f32),

    /// A quantization scheme name that is not recognized.
    #[error("unknown quantization scheme '{0}'")]
    UnknownScheme(String),
}
