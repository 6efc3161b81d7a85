//! Quantization-error minimization (L1 / L2) over histogram truncation ranges.
//!
//! Positions are measured in bin units: bin `i` covers `[i, i + 1)` and its
//! mass is spread uniformly over it. A candidate range `[start, start + width)`
//! places `2^precision` reconstruction levels evenly across it. Each value is
//! charged its distance to the nearest level, so mass outside the range is
//! charged to the boundary levels.

use rayon::prelude::*;

use crate::histogram::Histogram;
use crate::params::{MappingOptions, TensorQuantizationParams, choose_from_range, levels};

/// Coarse grid steps per axis used by [`Search::Approx`].
const APPROX_GRID_STEPS: usize = 64;

/// Error norm to minimize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Norm {
    /// Sum of absolute errors.
    L1,
    /// Sum of squared errors.
    L2,
}

/// Candidate search strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Search {
    /// Every bin-aligned truncation range.
    Exact,
    /// Coarse grid of stride `ceil(bins / 64)`, refined at unit stride
    /// around the best coarse candidate.
    Approx,
}

/// Chooses the truncation range minimizing the selected error norm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormMinimization {
    /// Error measure.
    pub norm: Norm,
    /// How candidate ranges are enumerated.
    pub search: Search,
}

impl NormMinimization {
    /// Strategy minimizing `norm` over candidates enumerated by `search`.
    pub fn new(norm: Norm, search: Search) -> Self {
        Self { norm, search }
    }

    /// Compute quantization parameters for a finalized histogram.
    pub fn choose(&self, hist: &Histogram, options: &MappingOptions) -> TensorQuantizationParams {
        let n = hist.num_bins();
        let width = hist.width();
        if hist.is_empty() || width <= 0.0 {
            return choose_from_range(hist.min(), hist.max(), options);
        }

        let model = ErrorModel::new(hist.bins(), self.norm, levels(options.precision));
        let stride = match self.search {
            Search::Exact => 1,
            Search::Approx => n.div_ceil(APPROX_GRID_STEPS),
        };
        // Position of 0.0 in bin units.
        let zero = -f64::from(hist.min()) / width;

        let (lo, hi, err) = if options.preserve_sparsity && hist.min() < 0.0 && hist.max() > 0.0 {
            // Symmetric around zero, half-widths in half-bin steps.
            let count = (2.0 * zero.max(n as f64 - zero)).ceil() as usize;
            let (i, err) = search_1d(count, stride, |i| {
                let half = i as f64 / 2.0;
                model.range_error(zero - half, 2.0 * half)
            });
            let half = i as f64 / 2.0;
            (zero - half, zero + half, err)
        } else if options.preserve_sparsity && hist.min() >= 0.0 {
            // Lower edge pinned at zero.
            let (e, err) = search_1d(n, stride, |e| model.range_error(zero, e as f64 - zero));
            (zero, e as f64, err)
        } else if options.preserve_sparsity {
            // Upper edge pinned at zero.
            let (i, err) = search_1d(n, stride, |i| {
                let start = (n - i) as f64;
                model.range_error(start, zero - start)
            });
            ((n - i) as f64, zero, err)
        } else {
            let (s, e, err) = search_pairs(n, stride, |s, e| {
                model.range_error(s as f64, (e - s) as f64)
            });
            (s as f64, e as f64, err)
        };

        let scaled_err = match self.norm {
            Norm::L1 => err * width,
            Norm::L2 => err * width * width,
        };
        let min = f64::from(hist.min());
        let (lo, hi) = ((min + lo * width) as f32, (min + hi * width) as f32);
        log::debug!(
            "{:?}/{:?} selected [{lo}, {hi}] of [{}, {}] (error {scaled_err:.6e})",
            self.norm,
            self.search,
            hist.min(),
            hist.max()
        );
        choose_from_range(lo, hi, options)
    }
}

/// Per-bin prefix moments used to evaluate candidate ranges.
struct ErrorModel<'a> {
    counts: &'a [u64],
    /// Prefix sums of `c`, `c * m` and `c * m^2` with `m = i + 0.5`.
    m0: Vec<f64>,
    m1: Vec<f64>,
    m2: Vec<f64>,
    norm: Norm,
    levels: usize,
}

impl<'a> ErrorModel<'a> {
    fn new(counts: &'a [u64], norm: Norm, levels: usize) -> Self {
        let mut m0 = Vec::with_capacity(counts.len() + 1);
        let mut m1 = Vec::with_capacity(counts.len() + 1);
        let mut m2 = Vec::with_capacity(counts.len() + 1);
        let (mut s0, mut s1, mut s2) = (0.0f64, 0.0f64, 0.0f64);
        m0.push(s0);
        m1.push(s1);
        m2.push(s2);
        for (i, &c) in counts.iter().enumerate() {
            let c = c as f64;
            let m = i as f64 + 0.5;
            s0 += c;
            s1 += c * m;
            s2 += c * m * m;
            m0.push(s0);
            m1.push(s1);
            m2.push(s2);
        }
        Self {
            counts,
            m0,
            m1,
            m2,
            norm,
            levels,
        }
    }

    fn len(&self) -> f64 {
        self.counts.len() as f64
    }

    /// Total error of quantizing the histogram onto `[start, start + width)`.
    ///
    /// Costs `O(min(levels, width))`: when levels are denser than bins the
    /// interior cells are summed per bin instead of per level.
    fn range_error(&self, start: f64, width: f64) -> f64 {
        let last = self.levels - 1;
        let step = width / last as f64;
        if step > 0.0 && step < 1.0 {
            self.per_bin_error(start, step, last)
        } else {
            self.per_level_error(start, step, last)
        }
    }

    fn per_level_error(&self, start: f64, step: f64, last: usize) -> f64 {
        let half = step / 2.0;
        // Only levels whose cells intersect [0, n) contribute.
        let first = ((-start / step) - 0.5).floor().clamp(0.0, last as f64) as usize;
        let end = (((self.len() - start) / step) + 0.5)
            .ceil()
            .clamp(0.0, last as f64) as usize;

        let mut err = 0.0;
        for j in first..=end {
            let r = start + j as f64 * step;
            let lo = if j == 0 { f64::NEG_INFINITY } else { r - half };
            let hi = if j == last { f64::INFINITY } else { r + half };
            err += self.interval(lo, hi, r);
        }
        err
    }

    /// The two edge cells are unbounded and evaluated directly. Interior
    /// cells tile `[start + step / 2, end - step / 2)`; inside a bin every
    /// whole cell carries the same error, so only the cells cut by the bin
    /// edges need their own pieces.
    fn per_bin_error(&self, start: f64, step: f64, last: usize) -> f64 {
        let half = step / 2.0;
        let end = start + last as f64 * step;
        let mut err = self.interval(f64::NEG_INFINITY, start + half, start)
            + self.interval(end - half, f64::INFINITY, end);

        let a = (start + half).max(0.0);
        let z = (end - half).min(self.len());
        if last < 2 || a >= z {
            return err;
        }
        let full_cell = self.antiderivative(half) - self.antiderivative(-half);
        // Interior cell `j` covers `[start + half + (j - 1) * step, start + half + j * step)`.
        let offset = |x: f64| (x - start - half) / step;
        let center = |j: i64| start + j as f64 * step;
        let max_cell = last as i64 - 1;

        for b in (a.floor() as usize)..(z.ceil() as usize).min(self.counts.len()) {
            let u = a.max(b as f64);
            let v = z.min(b as f64 + 1.0);
            if u >= v || self.counts[b] == 0 {
                continue;
            }
            let ju = (offset(u).floor() as i64 + 1).clamp(1, max_cell);
            let jv = (offset(v).ceil() as i64).clamp(ju, max_cell);
            if ju == jv {
                err += self.piece(b, u, v, center(ju));
                continue;
            }
            let u_hi = (center(ju) + half).clamp(u, v);
            let v_lo = (center(jv) - half).clamp(u, v);
            err += self.piece(b, u, u_hi, center(ju));
            err += self.piece(b, v_lo, v, center(jv));
            err += self.counts[b] as f64 * (jv - ju - 1) as f64 * full_cell;
        }
        err
    }

    /// Error of the mass in `[lo, hi)` reconstructed as `r`.
    fn interval(&self, lo: f64, hi: f64, r: f64) -> f64 {
        let lo = lo.max(0.0);
        let hi = hi.min(self.len());
        if lo >= hi {
            return 0.0;
        }
        if r > lo && r < hi {
            self.one_sided(lo, r, r) + self.one_sided(r, hi, r)
        } else {
            self.one_sided(lo, hi, r)
        }
    }

    /// Same as [`Self::interval`] for `r` outside `(lo, hi)`.
    fn one_sided(&self, lo: f64, hi: f64, r: f64) -> f64 {
        let first_full = lo.ceil();
        let last_full = hi.floor();
        if first_full > last_full {
            return self.piece(lo.floor() as usize, lo, hi, r);
        }

        let mut err = 0.0;
        if lo < first_full {
            err += self.piece(lo.floor() as usize, lo, first_full, r);
        }
        if first_full < last_full {
            err += self.full_bins(first_full as usize, last_full as usize, r);
        }
        if hi > last_full {
            err += self.piece(last_full as usize, last_full, hi, r);
        }
        err
    }

    /// Error of the part `[lo, hi)` of a single bin.
    fn piece(&self, bin: usize, lo: f64, hi: f64, r: f64) -> f64 {
        let c = self.counts[bin];
        if c == 0 {
            return 0.0;
        }
        c as f64 * (self.antiderivative(hi - r) - self.antiderivative(lo - r))
    }

    /// Error of whole bins `first..last`, all on one side of `r`.
    fn full_bins(&self, first: usize, last: usize, r: f64) -> f64 {
        let s0 = self.m0[last] - self.m0[first];
        let s1 = self.m1[last] - self.m1[first];
        match self.norm {
            Norm::L1 => (s1 - r * s0).abs(),
            Norm::L2 => {
                let s2 = self.m2[last] - self.m2[first];
                (s2 - 2.0 * r * s1 + r * r * s0 + s0 / 12.0).max(0.0)
            }
        }
    }

    fn antiderivative(&self, x: f64) -> f64 {
        match self.norm {
            Norm::L1 => x * x.abs() / 2.0,
            Norm::L2 => x * x * x / 3.0,
        }
    }
}

/// First strict minimum; NaN scores never win.
fn argmin<T>(scored: impl IntoIterator<Item = (T, f64)>) -> Option<(T, f64)> {
    let mut best: Option<(T, f64)> = None;
    for (candidate, err) in scored {
        if err.is_nan() {
            continue;
        }
        if best.as_ref().is_none_or(|(_, best_err)| err < *best_err) {
            best = Some((candidate, err));
        }
    }
    best
}

/// Minimize `eval(i)` over `i` in `1..=count`.
fn search_1d<F>(count: usize, stride: usize, eval: F) -> (usize, f64)
where
    F: Fn(usize) -> f64 + Sync,
{
    let coarse: Vec<(usize, f64)> = (1..=count)
        .into_par_iter()
        .filter(|i| i % stride == 0 || *i == count)
        .map(|i| (i, eval(i)))
        .collect();
    let (best, best_err) = argmin(coarse).unwrap_or((count, f64::INFINITY));
    if stride == 1 {
        return (best, best_err);
    }

    let lo = best.saturating_sub(stride - 1).max(1);
    let hi = (best + stride - 1).min(count);
    let refined: Vec<(usize, f64)> = (lo..=hi).into_par_iter().map(|i| (i, eval(i))).collect();
    argmin(refined).unwrap_or((best, best_err))
}

/// Minimize `eval(s, e)` over bin ranges `0 <= s < e <= n`.
fn search_pairs<F>(n: usize, stride: usize, eval: F) -> (usize, usize, f64)
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    let points: Vec<usize> = (0..=n).filter(|p| p % stride == 0 || *p == n).collect();
    let per_start: Vec<Option<((usize, usize), f64)>> = points[..points.len() - 1]
        .par_iter()
        .enumerate()
        .map(|(k, &s)| argmin(points[k + 1..].iter().map(|&e| ((s, e), eval(s, e)))))
        .collect();
    let ((s, e), err) = argmin(per_start.into_iter().flatten()).unwrap_or(((0, n), f64::INFINITY));
    if stride == 1 {
        return (s, e, err);
    }

    let refined: Vec<Option<((usize, usize), f64)>> = (s.saturating_sub(stride - 1)
        ..=(s + stride - 1).min(n - 1))
        .into_par_iter()
        .map(|s| {
            let e_lo = e.saturating_sub(stride - 1).max(s + 1);
            let e_hi = (e + stride - 1).min(n);
            argmin((e_lo..=e_hi).map(|e| ((s, e), eval(s, e))))
        })
        .collect();
    let ((s, e), err) = argmin(refined.into_iter().flatten()).unwrap_or(((s, e), err));
    (s, e, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(preserve_sparsity: bool) -> MappingOptions {
        MappingOptions {
            precision: 8,
            preserve_sparsity,
            force_scale_power_of_two: false,
        }
    }

    /// 256 bins over [0, 256]: 16 heavy bins followed by a thin tail.
    fn heavy_head_thin_tail() -> Histogram {
        let mut bins = vec![1u64; 256];
        for c in &mut bins[..16] {
            *c = 1_000_000;
        }
        Histogram::from_parts(0.0, 256.0, bins).unwrap()
    }

    #[test]
    fn error_model_matches_direct_integration() {
        let counts = [3u64, 0, 5, 2];
        for norm in [Norm::L1, Norm::L2] {
            let model = ErrorModel::new(&counts, norm, 4);
            // Reconstruct [0.25, 3.6) as a single level at r = 1.7.
            let got = model.interval(0.25, 3.6, 1.7);

            let mut expected = 0.0;
            let steps = 200_000;
            for k in 0..steps {
                let u = 0.25 + (3.6 - 0.25) * (k as f64 + 0.5) / steps as f64;
                let c = counts[u.floor() as usize] as f64;
                let d = (u - 1.7).abs();
                let e = if norm == Norm::L2 { d * d } else { d };
                expected += c * e * (3.6 - 0.25) / steps as f64;
            }
            assert!(
                (got - expected).abs() < 1e-3 * expected.max(1.0),
                "{norm:?}: {got} vs {expected}"
            );
        }
    }

    #[test]
    fn per_bin_error_matches_per_level_error() {
        let counts: Vec<u64> = (0..40u64).map(|i| (i * 7919) % 23).collect();
        for norm in [Norm::L1, Norm::L2] {
            for levels in [2usize, 3, 16, 256, 65536] {
                let model = ErrorModel::new(&counts, norm, levels);
                let last = levels - 1;
                let ranges = [(0.0, 40.0), (3.25, 7.5), (-2.0, 50.0), (10.0, 1.0), (17.3, 0.9)];
                for (start, width) in ranges {
                    let step = width / last as f64;
                    let dense = model.per_bin_error(start, step, last);
                    let sparse = model.per_level_error(start, step, last);
                    assert!(
                        (dense - sparse).abs() <= 1e-9 * sparse.max(1.0),
                        "{norm:?} levels {levels} [{start}, +{width}): {dense} vs {sparse}"
                    );
                }
            }
        }
    }

    #[test]
    fn sixteen_bit_search_stays_bin_bounded() {
        let hist = heavy_head_thin_tail();
        let options = MappingOptions {
            precision: 16,
            ..opts(false)
        };
        let params = NormMinimization::new(Norm::L2, Search::Approx).choose(&hist, &options);
        assert!(params.scale > 0.0 && params.scale.is_finite());
        assert!(params.max() <= hist.max() + params.scale);
    }

    #[test]
    fn uniform_keeps_full_range() {
        let values: Vec<f32> = (0..12800).map(|i| i as f32 / 12799.0).collect();
        let hist = Histogram::from_values(&values, 128);
        let params = NormMinimization::new(Norm::L2, Search::Exact).choose(&hist, &opts(false));
        assert!(
            (params.scale - 1.0 / 255.0).abs() < 0.02 / 255.0,
            "scale {}",
            params.scale
        );
        assert_eq!(params.zero_point, 0);
    }

    #[test]
    fn empty_tail_is_trimmed() {
        let mut bins = vec![0u64; 256];
        for c in &mut bins[..16] {
            *c = 100;
        }
        let hist = Histogram::from_parts(0.0, 256.0, bins).unwrap();
        for search in [Search::Exact, Search::Approx] {
            let params = NormMinimization::new(Norm::L2, search).choose(&hist, &opts(false));
            assert!(params.max() <= 17.0, "{search:?}: max {}", params.max());
            assert!(params.max() >= 15.0, "{search:?}: max {}", params.max());
        }
    }

    #[test]
    fn l1_clips_more_than_l2() {
        let hist = heavy_head_thin_tail();
        let l1 = NormMinimization::new(Norm::L1, Search::Approx).choose(&hist, &opts(false));
        let l2 = NormMinimization::new(Norm::L2, Search::Approx).choose(&hist, &opts(false));
        let full = choose_from_range(hist.min(), hist.max(), &opts(false));
        assert!(l1.scale < l2.scale, "l1 {} l2 {}", l1.scale, l2.scale);
        assert!(l2.scale < full.scale, "l2 {} full {}", l2.scale, full.scale);
    }

    #[test]
    fn approx_never_beats_exact() {
        let hist = heavy_head_thin_tail();
        let model = ErrorModel::new(hist.bins(), Norm::L2, 256);
        let eval = |s: usize, e: usize| model.range_error(s as f64, (e - s) as f64);
        let (_, _, exact) = search_pairs(hist.num_bins(), 1, eval);
        let (_, _, approx) = search_pairs(hist.num_bins(), 4, eval);
        assert!(exact <= approx);
        // Within one percent of the optimum.
        assert!(approx <= exact * 1.01, "approx {approx} exact {exact}");
    }

    #[test]
    fn approx_equals_exact_at_unit_stride() {
        // 64 bins gives an approx stride of 1.
        let values: Vec<f32> = (0..640).map(|i| ((i * 37) % 640) as f32 / 64.0 - 3.0).collect();
        let hist = Histogram::from_values(&values, 64);
        let exact = NormMinimization::new(Norm::L2, Search::Exact).choose(&hist, &opts(false));
        let approx = NormMinimization::new(Norm::L2, Search::Approx).choose(&hist, &opts(false));
        assert_eq!(exact, approx);
    }

    #[test]
    fn preserve_sparsity_maps_zero_exactly() {
        let values: Vec<f32> = (0..1000).map(|i| -1.0 + 4.0 * i as f32 / 999.0).collect();
        let hist = Histogram::from_values(&values, 128);
        for norm in [Norm::L1, Norm::L2] {
            for search in [Search::Exact, Search::Approx] {
                let params = NormMinimization::new(norm, search).choose(&hist, &opts(true));
                assert_eq!(params.zero_point, 128);
                assert_eq!(params.dequantize(params.quantize(0.0)), 0.0);
            }
        }
    }

    #[test]
    fn preserve_sparsity_one_sided() {
        let values: Vec<f32> = (0..1000).map(|i| 1.0 + i as f32 / 999.0).collect();
        let hist = Histogram::from_values(&values, 64);
        let params = NormMinimization::new(Norm::L2, Search::Exact).choose(&hist, &opts(true));
        assert_eq!(params.zero_point, 0);
        assert!(params.max() > 1.9);

        let negated: Vec<f32> = values.iter().map(|v| -v).collect();
        let hist = Histogram::from_values(&negated, 64);
        let params = NormMinimization::new(Norm::L2, Search::Exact).choose(&hist, &opts(true));
        assert_eq!(params.zero_point, 255);
        assert!(params.min() < -1.9);
    }

    #[test]
    fn empty_histogram_falls_back() {
        let hist = Histogram::new(32);
        let params = NormMinimization::new(Norm::L2, Search::Exact).choose(&hist, &opts(false));
        assert!(params.scale > 0.0);
        assert_eq!(params.zero_point, 0);
    }

    #[test]
    fn deterministic() {
        let hist = heavy_head_thin_tail();
        let strategy = NormMinimization::new(Norm::L1, Search::Approx);
        assert_eq!(
            strategy.choose(&hist, &opts(false)),
            strategy.choose(&hist, &opts(false))
        );
    }

    #[test]
    fn argmin_prefers_first() {
        assert_eq!(argmin([(1, 2.0), (2, 1.0), (3, 1.0)]), Some((2, 1.0)));
        assert_eq!(argmin([(1, f64::NAN), (2, 1.0)]).map(|(c, _)| c), Some(2));
        assert_eq!(argmin(Vec::<(u8, f64)>::new()), None);
    }
}
