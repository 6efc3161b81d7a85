use std::path::Path;

use qcal_core::Histogram;

/// `count` evenly spaced values covering `[lo, hi]`.
#[allow(dead_code)]
pub fn uniform(lo: f32, hi: f32, count: usize) -> Vec<f32> {
    (0..count)
        .map(|i| lo + (hi - lo) * i as f32 / (count - 1) as f32)
        .collect()
}

/// Deterministic bell-shaped sample over roughly `[-4, 4]` with a few
/// outliers at +-20.
#[allow(dead_code)]
pub fn bell_with_outliers() -> Vec<f32> {
    let mut values = Vec::new();
    for i in 0..8000 {
        let x = (i as f32 - 4000.0) / 1000.0;
        let count = ((-x * x / 2.0).exp() * 8.0).round() as usize;
        values.extend(std::iter::repeat_n(x, count));
    }
    values.extend([-20.0, 20.0]);
    values
}

/// Histogram of `values` with `num_bins` bins.
#[allow(dead_code)]
pub fn histogram(values: &[f32], num_bins: usize) -> Histogram {
    Histogram::from_values(values, num_bins)
}

/// Write `values` as a little-endian f32 sample file.
#[allow(dead_code)]
pub fn write_sample(path: &Path, values: &[f32]) {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(path, bytes)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
}
