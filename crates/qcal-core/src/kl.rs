//! KL-divergence minimizing range selection.
//!
//! For a candidate bin range `[s, e)`, the reference distribution `P` is the
//! histogram clipped to the range with outlier mass folded into the boundary
//! bins. The candidate distribution `Q` merges the in-range bins into
//! `2^precision` groups and spreads each group's mass uniformly over its
//! non-empty bins. The range minimizing `KL(P || Q)` wins.

use rayon::prelude::*;

use crate::histogram::Histogram;
use crate::params::{MappingOptions, TensorQuantizationParams, choose_from_range, levels};

/// Approximate number of grid steps over the histogram for candidate edges.
const KL_GRID_STEPS: usize = 128;

/// Probability substituted for empty `Q` bins where `P` has mass.
const EPSILON: f64 = 1e-12;

/// Chooses the range whose quantized distribution best preserves the
/// observed one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KlMinimization;

impl KlMinimization {
    /// Compute quantization parameters for a finalized histogram.
    pub fn choose(&self, hist: &Histogram, options: &MappingOptions) -> TensorQuantizationParams {
        let n = hist.num_bins();
        let target = levels(options.precision);
        let width = hist.width();
        if hist.is_empty() || width <= 0.0 || n < target {
            // Not enough bins to truncate; fall back to MinMax.
            log::debug!("KL calibration needs at least {target} bins (have {n}), using min/max");
            return choose_from_range(hist.min(), hist.max(), options);
        }

        let counts = hist.bins();
        let mut prefix = Vec::with_capacity(n + 1);
        prefix.push(0u64);
        let mut acc = 0u64;
        for &c in counts {
            acc = acc.saturating_add(c);
            prefix.push(acc);
        }

        let stride = n.div_ceil(KL_GRID_STEPS);
        let points: Vec<usize> = (0..=n).filter(|p| p % stride == 0 || *p == n).collect();

        let per_start: Vec<Option<(usize, usize, f64)>> = points
            .par_iter()
            .map(|&s| {
                let mut best: Option<(usize, usize, f64)> = None;
                for &e in points.iter().filter(|&&e| e >= s + target) {
                    let divergence = clipped_divergence(counts, &prefix, s, e, target);
                    if best.is_none_or(|(_, _, d)| divergence < d) {
                        best = Some((s, e, divergence));
                    }
                }
                best
            })
            .collect();

        let mut best = (0, n, f64::INFINITY);
        for (s, e, divergence) in per_start.into_iter().flatten() {
            if divergence < best.2 {
                best = (s, e, divergence);
            }
        }

        let (s, e, divergence) = best;
        let min = f64::from(hist.min());
        let lo = (min + s as f64 * width) as f32;
        let hi = (min + e as f64 * width) as f32;
        log::debug!(
            "KL selected [{lo}, {hi}] of [{}, {}] (divergence {divergence:.6e})",
            hist.min(),
            hist.max()
        );
        choose_from_range(lo, hi, options)
    }
}

/// `KL(P || Q)` for the candidate range `[s, e)`.
fn clipped_divergence(counts: &[u64], prefix: &[u64], s: usize, e: usize, target: usize) -> f64 {
    let total = prefix[prefix.len() - 1] as f64;
    let in_range = (prefix[e] - prefix[s]) as f64;
    let left = prefix[s] as f64;
    let right = total - prefix[e] as f64;
    let k = e - s;

    let mut divergence = 0.0;
    for group in 0..target {
        let g_lo = s + group * k / target;
        let g_hi = s + (group + 1) * k / target;
        let bins = &counts[g_lo..g_hi];
        let mass = bins.iter().fold(0u64, |acc, &c| acc.saturating_add(c));
        let nonzero = bins.iter().filter(|&&c| c > 0).count();

        for (offset, &c) in bins.iter().enumerate() {
            let i = g_lo + offset;
            let mut p = c as f64;
            if i == s {
                p += left;
            }
            if i == e - 1 {
                p += right;
            }
            if p <= 0.0 {
                continue;
            }
            let p = p / total;
            let q = if c > 0 && in_range > 0.0 {
                mass as f64 / nonzero as f64 / in_range
            } else {
                0.0
            };
            divergence += p * (p / q.max(EPSILON)).ln();
        }
    }
    divergence
}
