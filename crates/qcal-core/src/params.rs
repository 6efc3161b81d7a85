//! Affine quantization parameters and the range-to-grid mapping.
//!
//! A float `x` is represented by the unsigned code
//! `q = clamp(round(x / scale) + zero_point, 0, 2^precision - 1)` and
//! reconstructed as `scale * (q - zero_point)`.

use crate::CalibrationError;

/// Largest supported target bit-width.
pub const MAX_PRECISION: u8 = 16;

/// Default target bit-width.
pub const DEFAULT_PRECISION: u8 = 8;

/// Scale used when the observed range is too narrow to produce a usable step.
pub const DEGENERATE_SCALE: f32 = 0.1;

/// Parameters describing how floating-point values are quantized to integers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TensorQuantizationParams {
    /// Width of one integer step.
    pub scale: f32,
    /// Integer code representing `0.0`.
    pub zero_point: i32,
    /// Target bit-width.
    pub precision: u8,
}

impl TensorQuantizationParams {
    /// Largest integer code for this precision.
    pub fn qmax(&self) -> i32 {
        qmax(self.precision)
    }

    /// Smallest representable float value.
    pub fn min(&self) -> f32 {
        -(self.zero_point as f32) * self.scale
    }

    /// Largest representable float value.
    pub fn max(&self) -> f32 {
        self.min() + self.scale * self.qmax() as f32
    }

    /// Quantize a single value (round half to even, clamped to the grid).
    pub fn quantize(&self, value: f32) -> i32 {
        let q = (f64::from(value) / f64::from(self.scale)).round_ties_even()
            + f64::from(self.zero_point);
        q.clamp(0.0, f64::from(self.qmax())) as i32
    }

    /// Reconstruct the float value of an integer code.
    pub fn dequantize(&self, code: i32) -> f32 {
        self.scale * (code - self.zero_point) as f32
    }
}

/// Largest integer code for `precision` bits.
pub fn qmax(precision: u8) -> i32 {
    (1i32 << precision) - 1
}

/// Number of integer codes for `precision` bits.
pub fn levels(precision: u8) -> usize {
    1usize << precision
}

/// Check that a bit-width is supported.
pub fn validate_precision(precision: u8) -> Result<u8, CalibrationError> {
    if (1..=MAX_PRECISION).contains(&precision) {
        Ok(precision)
    } else {
        Err(CalibrationError::InvalidPrecision(precision))
    }
}

/// Options controlling how a float range is mapped onto the integer grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappingOptions {
    /// Target bit-width.
    pub precision: u8,
    /// Keep `0.0` exactly representable with a range symmetric around it.
    pub preserve_sparsity: bool,
    /// Round the scale to a power of two.
    pub force_scale_power_of_two: bool,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            preserve_sparsity: false,
            force_scale_power_of_two: false,
        }
    }
}

/// Compute quantization parameters covering `[min, max]`.
///
/// The range is always extended to include `0.0`. With `preserve_sparsity`
/// and a range straddling zero, the grid is made symmetric and the zero point
/// fixed at the middle code:
///   scale = max(|min| / (qmax/2 + 1), |max| / (qmax/2))
///   zero_point = round(qmax / 2)
/// Otherwise:
///   scale = (max - min) / qmax
///   zero_point = round(-min / scale)
pub fn choose_from_range(min: f32, max: f32, options: &MappingOptions) -> TensorQuantizationParams {
    let precision = options.precision;
    debug_assert!(validate_precision(precision).is_ok());
    let qmax = qmax(precision);

    let (mut min, mut max) = (f64::from(min), f64::from(max));
    if !min.is_finite() || !max.is_finite() {
        log::warn!("non-finite range [{min}, {max}], using degenerate parameters");
        min = 0.0;
        max = 0.0;
    }
    if min > max {
        std::mem::swap(&mut min, &mut max);
    }

    let symmetric = options.preserve_sparsity && qmax >= 2 && min < 0.0 && max > 0.0;
    if symmetric {
        let sym_qmin = -(qmax / 2 + 1);
        let sym_qmax = qmax / 2;
        let step = (min / f64::from(sym_qmin))
            .abs()
            .max((max / f64::from(sym_qmax)).abs());
        min = step * f64::from(sym_qmin);
        max = step * f64::from(sym_qmax);
    }

    min = min.min(0.0);
    max = max.max(0.0);

    let mut scale = ((max - min) / f64::from(qmax)).min(f64::from(f32::MAX)) as f32;
    if scale == 0.0 || !(1.0 / scale).is_finite() {
        scale = DEGENERATE_SCALE;
    }
    if options.force_scale_power_of_two {
        scale = round_up_to_power_of_two(scale);
    }

    let zero_point = if symmetric {
        (f64::from(qmax) / 2.0).round_ties_even() as i32
    } else {
        (-min / f64::from(scale))
            .round_ties_even()
            .clamp(0.0, f64::from(qmax)) as i32
    };

    TensorQuantizationParams {
        scale,
        zero_point,
        precision,
    }
}

fn round_up_to_power_of_two(scale: f32) -> f32 {
    if scale < 1.0 {
        1.0 / 2f32.powi((1.0 / scale).log2().floor() as i32)
    } else {
        2f32.powi(scale.log2().ceil() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(precision: u8, preserve_sparsity: bool) -> MappingOptions {
        MappingOptions {
            precision,
            preserve_sparsity,
            force_scale_power_of_two: false,
        }
    }

    #[test]
    fn positive_range() {
        let params = choose_from_range(0.0, 6.0, &opts(8, false));
        assert!((params.scale - 6.0 / 255.0).abs() < 1e-7);
        assert_eq!(params.zero_point, 0);
    }

    #[test]
    fn straddling_range() {
        let params = choose_from_range(-1.0, 1.0, &opts(8, false));
        assert!((params.scale - 2.0 / 255.0).abs() < 1e-7);
        // -(-1.0) / (2/255) = 127.5, ties to even.
        assert_eq!(params.zero_point, 128);
    }

    #[test]
    fn range_is_extended_to_zero() {
        let params = choose_from_range(2.0, 4.0, &opts(8, false));
        assert!((params.scale - 4.0 / 255.0).abs() < 1e-7);
        assert_eq!(params.zero_point, 0);

        let params = choose_from_range(-4.0, -2.0, &opts(8, false));
        assert_eq!(params.zero_point, 255);
        assert!((params.max()).abs() < 1e-6);
    }

    #[test]
    fn symmetric_when_preserving_sparsity() {
        let params = choose_from_range(-3.0, 1.0, &opts(8, true));
        assert!((params.scale - 3.0 / 128.0).abs() < 1e-7);
        assert_eq!(params.zero_point, 128);
        assert_eq!(params.dequantize(params.quantize(0.0)), 0.0);
        assert!(params.min() <= -3.0 + 1e-5);
    }

    #[test]
    fn sparsity_on_one_sided_range_is_asymmetric() {
        let params = choose_from_range(0.0, 1.0, &opts(8, true));
        assert!((params.scale - 1.0 / 255.0).abs() < 1e-7);
        assert_eq!(params.zero_point, 0);
    }

    #[test]
    fn degenerate_range() {
        let params = choose_from_range(0.0, 0.0, &opts(8, false));
        assert_eq!(params.scale, DEGENERATE_SCALE);
        assert_eq!(params.zero_point, 0);

        let params = choose_from_range(f32::NAN, 1.0, &opts(8, false));
        assert_eq!(params.scale, DEGENERATE_SCALE);
    }

    #[test]
    fn constant_nonzero_range() {
        let params = choose_from_range(5.0, 5.0, &opts(8, false));
        assert!((params.scale - 5.0 / 255.0).abs() < 1e-7);
        assert_eq!(params.zero_point, 0);
    }

    #[test]
    fn power_of_two_scale() {
        let options = MappingOptions {
            force_scale_power_of_two: true,
            ..opts(8, false)
        };
        let params = choose_from_range(0.0, 10.0, &options);
        assert_eq!(params.scale, 0.0625);

        let params = choose_from_range(0.0, 1000.0, &options);
        assert_eq!(params.scale, 4.0);
    }

    #[test]
    fn derived_min_max() {
        let params = TensorQuantizationParams {
            scale: 0.5,
            zero_point: 10,
            precision: 8,
        };
        assert_eq!(params.min(), -5.0);
        assert_eq!(params.max(), -5.0 + 0.5 * 255.0);
    }

    #[test]
    fn quantize_clamps() {
        let params = choose_from_range(-1.0, 1.0, &opts(8, false));
        assert_eq!(params.quantize(100.0), 255);
        assert_eq!(params.quantize(-100.0), 0);
        assert_eq!(params.quantize(0.0), params.zero_point);
    }

    #[test]
    fn low_precision() {
        let params = choose_from_range(-1.0, 1.0, &opts(2, true));
        assert_eq!(params.zero_point, 2);
        assert_eq!(params.dequantize(params.quantize(0.0)), 0.0);

        let params = choose_from_range(-1.0, 1.0, &opts(1, true));
        assert!(params.zero_point >= 0 && params.zero_point <= 1);
    }

    #[test]
    fn precision_validation() {
        assert!(validate_precision(0).is_err());
        assert!(validate_precision(17).is_err());
        assert_eq!(validate_precision(8), Ok(8));
    }

    #[test]
    fn huge_range_keeps_finite_scale() {
        let params = choose_from_range(-f32::MAX, f32::MAX, &opts(4, false));
        assert!(params.scale.is_finite());
        assert!((0..=15).contains(&params.zero_point));
    }
}
