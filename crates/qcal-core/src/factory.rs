//! Calibration dispatch and per-kind defaults.
//!
//! A [`QuantizationFactory`] owns a [`FactoryConfig`] snapshot holding the
//! defaults for weight and activation tensors and routes each request to the
//! strategy selected by its [`QuantizationScheme`].

use crate::CalibrationError;
use crate::histogram::Histogram;
use crate::minmax::MinMaxTracker;
use crate::params::{
    DEFAULT_PRECISION, MappingOptions, TensorQuantizationParams, choose_from_range,
    validate_precision,
};
use crate::scheme::QuantizationScheme;
use crate::strategy::{DEFAULT_PERCENTILE_THRESHOLD, strategy_for, validate_threshold};

/// Process defaults, split by tensor kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FactoryConfig {
    /// Bit-width for activation tensors.
    pub activation_precision: u8,
    /// Bit-width for weight tensors.
    pub weight_precision: u8,
    /// Keep 0.0 exact for activations.
    pub preserve_activation_sparsity: bool,
    /// Keep 0.0 exact for weights.
    pub preserve_weight_sparsity: bool,
    /// Scheme used by [`QuantizationFactory::choose_params_for_kind`] for activations.
    pub activation_scheme: QuantizationScheme,
    /// Scheme used by [`QuantizationFactory::choose_params_for_kind`] for weights.
    pub weight_scheme: QuantizationScheme,
    /// Mass kept by the percentile scheme for activations.
    pub activation_percentile_threshold: f32,
    /// Mass kept by the percentile scheme for weights.
    pub weight_percentile_threshold: f32,
    /// Round every scale up to a power of two.
    pub force_scale_power_of_two: bool,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            activation_precision: DEFAULT_PRECISION,
            weight_precision: DEFAULT_PRECISION,
            preserve_activation_sparsity: false,
            preserve_weight_sparsity: false,
            activation_scheme: QuantizationScheme::MinMax,
            weight_scheme: QuantizationScheme::MinMax,
            activation_percentile_threshold: DEFAULT_PERCENTILE_THRESHOLD,
            weight_percentile_threshold: DEFAULT_PERCENTILE_THRESHOLD,
            force_scale_power_of_two: false,
        }
    }
}

/// Options for a single calibration call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationConfig {
    pub precision: u8,
    pub preserve_sparsity: bool,
    /// Overrides the factory's threshold for the tensor kind when set.
    pub percentile_threshold: Option<f32>,
    pub is_weight: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            preserve_sparsity: false,
            percentile_threshold: None,
            is_weight: false,
        }
    }
}

/// Accumulated statistics handed to the factory.
#[derive(Clone, Copy, Debug)]
pub enum Statistics<'a> {
    Histogram(&'a Histogram),
    MinMax(&'a MinMaxTracker),
}

/// Routes calibration requests to strategies.
#[derive(Clone, Debug, Default)]
pub struct QuantizationFactory {
    config: FactoryConfig,
}

impl QuantizationFactory {
    /// Factory with the given defaults.
    pub fn new(config: FactoryConfig) -> Self {
        Self { config }
    }

    /// Current defaults.
    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Set the percentile threshold used for weight tensors.
    pub fn set_weight_percentile_threshold(
        &mut self,
        threshold: f32,
    ) -> Result<(), CalibrationError> {
        self.config.weight_percentile_threshold = validate_threshold(threshold)?;
        Ok(())
    }

    /// Set the percentile threshold used for activation tensors.
    pub fn set_activation_percentile_threshold(
        &mut self,
        threshold: f32,
    ) -> Result<(), CalibrationError> {
        self.config.activation_percentile_threshold = validate_threshold(threshold)?;
        Ok(())
    }

    /// Default call options for a tensor kind.
    pub fn calibration_config(&self, is_weight: bool) -> CalibrationConfig {
        let (precision, preserve_sparsity) = if is_weight {
            (self.config.weight_precision, self.config.preserve_weight_sparsity)
        } else {
            (
                self.config.activation_precision,
                self.config.preserve_activation_sparsity,
            )
        };
        CalibrationConfig {
            precision,
            preserve_sparsity,
            percentile_threshold: None,
            is_weight,
        }
    }

    /// Select parameters for `stats` with the given scheme.
    ///
    /// Histogram-based schemes given only min/max statistics fall back to the
    /// min/max mapping.
    pub fn choose_params(
        &self,
        stats: Statistics<'_>,
        scheme: QuantizationScheme,
        config: &CalibrationConfig,
    ) -> Result<TensorQuantizationParams, CalibrationError> {
        let options = self.mapping_options(config)?;
        // Only the percentile strategy reads the threshold, and validates it.
        let threshold = config
            .percentile_threshold
            .unwrap_or_else(|| self.default_threshold(config.is_weight));

        match stats {
            Statistics::Histogram(hist) => {
                let strategy = strategy_for(scheme, threshold)?;
                let params = strategy.choose(hist, &options);
                log::debug!(
                    "{} chose scale {} zero point {} for [{}, {}]",
                    strategy.name(),
                    params.scale,
                    params.zero_point,
                    hist.min(),
                    hist.max()
                );
                Ok(params)
            }
            Statistics::MinMax(tracker) => {
                if scheme.needs_histogram() {
                    log::warn!("{scheme} needs a histogram, only min/max available; using min/max");
                }
                let (min, max) = tracker.range().unwrap_or((0.0, 0.0));
                Ok(choose_from_range(min, max, &options))
            }
        }
    }

    /// Min/max parameters straight from raw samples, using the kind's
    /// precision and sparsity defaults.
    pub fn choose_params_from_samples(
        &self,
        values: &[f32],
        is_weight: bool,
    ) -> TensorQuantizationParams {
        let config = self.calibration_config(is_weight);
        let tracker = MinMaxTracker::from_values(values);
        let (min, max) = tracker.range().unwrap_or((0.0, 0.0));
        let options = MappingOptions {
            precision: config.precision,
            preserve_sparsity: config.preserve_sparsity,
            force_scale_power_of_two: self.config.force_scale_power_of_two,
        };
        choose_from_range(min, max, &options)
    }

    /// Select parameters with the kind's default scheme and options.
    pub fn choose_params_for_kind(
        &self,
        stats: Statistics<'_>,
        is_weight: bool,
    ) -> Result<TensorQuantizationParams, CalibrationError> {
        let scheme = if is_weight {
            self.config.weight_scheme
        } else {
            self.config.activation_scheme
        };
        self.choose_params(stats, scheme, &self.calibration_config(is_weight))
    }

    fn default_threshold(&self, is_weight: bool) -> f32 {
        if is_weight {
            self.config.weight_percentile_threshold
        } else {
            self.config.activation_percentile_threshold
        }
    }

    fn mapping_options(
        &self,
        config: &CalibrationConfig,
    ) -> Result<MappingOptions, CalibrationError> {
        Ok(MappingOptions {
            precision: validate_precision(config.precision)?,
            preserve_sparsity: config.preserve_sparsity,
            force_scale_power_of_two: self.config.force_scale_power_of_two,
        })
    }
}

/// Options for [`choose_static_quantization_params`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaticOptions {
    pub preserve_sparsity: bool,
    pub precision: u8,
    pub scheme: QuantizationScheme,
    pub percentile_threshold: f32,
    pub is_weight: bool,
}

impl Default for StaticOptions {
    fn default() -> Self {
        Self {
            preserve_sparsity: true,
            precision: DEFAULT_PRECISION,
            scheme: QuantizationScheme::MinMax,
            percentile_threshold: DEFAULT_PERCENTILE_THRESHOLD,
            is_weight: false,
        }
    }
}

/// Select parameters for an explicit histogram description.
///
/// The threshold in `options` applies to this call only; a fresh default
/// factory is used for everything else.
pub fn choose_static_quantization_params(
    min: f32,
    max: f32,
    bins: &[u64],
    options: &StaticOptions,
) -> Result<TensorQuantizationParams, CalibrationError> {
    let hist = Histogram::from_parts(min, max, bins.to_vec())?;
    let factory = QuantizationFactory::default();
    let config = CalibrationConfig {
        precision: options.precision,
        preserve_sparsity: options.preserve_sparsity,
        percentile_threshold: Some(options.percentile_threshold),
        is_weight: options.is_weight,
    };
    factory.choose_params(Statistics::Histogram(&hist), options.scheme, &config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_bins(count: usize, per_bin: u64) -> Vec<u64> {
        vec![per_bin; count]
    }

    #[test]
    fn defaults() {
        let factory = QuantizationFactory::default();
        assert_eq!(factory.config().weight_percentile_threshold, 0.99);
        let config = factory.calibration_config(true);
        assert_eq!(config.precision, 8);
        assert!(config.is_weight);
        assert_eq!(config.percentile_threshold, None);
    }

    #[test]
    fn static_min_max_unit_range() {
        let bins = uniform_bins(2048, 10);
        let params =
            choose_static_quantization_params(0.0, 1.0, &bins, &StaticOptions::default()).unwrap();
        assert!((params.scale - 1.0 / 255.0).abs() < 1e-6);
        assert_eq!(params.zero_point, 0);
    }

    #[test]
    fn bogus_scheme_matches_min_max() {
        let bins: Vec<u64> = (0..2048).map(|i| (i % 7) as u64).collect();
        let bogus = StaticOptions {
            scheme: QuantizationScheme::from_name_or_default("bogus"),
            ..StaticOptions::default()
        };
        let explicit = StaticOptions {
            scheme: QuantizationScheme::from_name_or_default("min_max"),
            ..StaticOptions::default()
        };
        assert_eq!(
            choose_static_quantization_params(-3.0, 5.0, &bins, &bogus).unwrap(),
            choose_static_quantization_params(-3.0, 5.0, &bins, &explicit).unwrap()
        );
    }

    #[test]
    fn p99_narrows_uniform_range() {
        let bins = uniform_bins(2048, 50);
        let p99 = StaticOptions {
            scheme: QuantizationScheme::from_name_or_default("P99_QUANTIZATION"),
            preserve_sparsity: false,
            ..StaticOptions::default()
        };
        let min_max = StaticOptions {
            preserve_sparsity: false,
            ..StaticOptions::default()
        };
        let narrow = choose_static_quantization_params(-10.0, 10.0, &bins, &p99).unwrap();
        let full = choose_static_quantization_params(-10.0, 10.0, &bins, &min_max).unwrap();
        assert!(narrow.scale < full.scale);
        assert!(narrow.min() > -10.0);
        assert!(narrow.max() < 10.0);
    }

    #[test]
    fn preserve_sparsity_keeps_zero_exact() {
        let bins: Vec<u64> = (0..512).map(|i| 1 + (i % 13) as u64).collect();
        for scheme in QuantizationScheme::ALL {
            let options = StaticOptions {
                scheme,
                ..StaticOptions::default()
            };
            let params = choose_static_quantization_params(-1.3, 2.7, &bins, &options).unwrap();
            assert_eq!(params.dequantize(params.quantize(0.0)), 0.0, "{scheme}");
        }
    }

    #[test]
    fn every_scheme_is_deterministic_and_in_range() {
        let bins: Vec<u64> = (0..256).map(|i| ((i * 37) % 101) as u64).collect();
        for scheme in QuantizationScheme::ALL {
            for precision in [4u8, 8] {
                let options = StaticOptions {
                    scheme,
                    precision,
                    preserve_sparsity: false,
                    ..StaticOptions::default()
                };
                let a = choose_static_quantization_params(-0.5, 4.0, &bins, &options).unwrap();
                let b = choose_static_quantization_params(-0.5, 4.0, &bins, &options).unwrap();
                assert_eq!(a.scale.to_bits(), b.scale.to_bits(), "{scheme}");
                assert_eq!(a.zero_point, b.zero_point, "{scheme}");
                assert!(a.scale > 0.0 && a.scale.is_finite(), "{scheme}");
                assert!((0..=a.qmax()).contains(&a.zero_point), "{scheme}");
            }
        }
    }

    #[test]
    fn degenerate_histogram() {
        let params =
            choose_static_quantization_params(2.0, 2.0, &[5, 0, 0], &StaticOptions::default())
                .unwrap();
        assert!(params.scale > 0.0 && params.scale.is_finite());
    }

    #[test]
    fn invalid_inputs() {
        let options = StaticOptions {
            precision: 0,
            ..StaticOptions::default()
        };
        assert_eq!(
            choose_static_quantization_params(0.0, 1.0, &[1], &options),
            Err(CalibrationError::InvalidPrecision(0))
        );
        assert_eq!(
            choose_static_quantization_params(0.0, 1.0, &[], &StaticOptions::default()),
            Err(CalibrationError::NoBins)
        );
        let options = StaticOptions {
            scheme: QuantizationScheme::Percentile,
            percentile_threshold: 0.3,
            ..StaticOptions::default()
        };
        assert_eq!(
            choose_static_quantization_params(0.0, 1.0, &[1], &options),
            Err(CalibrationError::InvalidThreshold(0.3))
        );
    }

    #[test]
    fn threshold_only_checked_for_percentile() {
        let bins = uniform_bins(64, 3);
        for scheme in QuantizationScheme::ALL {
            let options = StaticOptions {
                scheme,
                percentile_threshold: 0.5,
                ..StaticOptions::default()
            };
            let result = choose_static_quantization_params(-1.0, 1.0, &bins, &options);
            if scheme == QuantizationScheme::Percentile {
                assert_eq!(result, Err(CalibrationError::InvalidThreshold(0.5)));
            } else {
                assert!(result.is_ok(), "{scheme}: {result:?}");
            }
        }
    }

    #[test]
    fn overflowing_counts_are_rejected() {
        for scheme in [QuantizationScheme::Percentile, QuantizationScheme::KlDivergence] {
            let options = StaticOptions {
                scheme,
                ..StaticOptions::default()
            };
            assert_eq!(
                choose_static_quantization_params(0.0, 1.0, &[u64::MAX, 1], &options),
                Err(CalibrationError::CountOverflow)
            );
        }
    }

    #[test]
    fn thresholds_are_per_kind() {
        let mut factory = QuantizationFactory::default();
        factory.set_weight_percentile_threshold(0.9).unwrap();
        factory.set_activation_percentile_threshold(0.999).unwrap();
        assert!(factory.set_weight_percentile_threshold(0.1).is_err());
        assert_eq!(factory.config().weight_percentile_threshold, 0.9);

        let hist = Histogram::from_parts(-1.0, 1.0, vec![100; 1000]).unwrap();
        let stats = Statistics::Histogram(&hist);
        let percentile = QuantizationScheme::Percentile;
        let weight = factory
            .choose_params(stats, percentile, &factory.calibration_config(true))
            .unwrap();
        let activation = factory
            .choose_params(stats, percentile, &factory.calibration_config(false))
            .unwrap();
        assert!(weight.scale < activation.scale);
    }

    #[test]
    fn min_max_statistics_fall_back() {
        let factory = QuantizationFactory::default();
        let tracker = MinMaxTracker::from_values(&[-1.0, 3.0]);
        let config = CalibrationConfig::default();
        let kl = factory
            .choose_params(Statistics::MinMax(&tracker), QuantizationScheme::KlDivergence, &config)
            .unwrap();
        let mm = factory
            .choose_params(Statistics::MinMax(&tracker), QuantizationScheme::MinMax, &config)
            .unwrap();
        assert_eq!(kl, mm);
        assert!((mm.scale - 4.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn samples_use_kind_defaults() {
        let factory = QuantizationFactory::new(FactoryConfig {
            weight_precision: 4,
            preserve_weight_sparsity: true,
            ..FactoryConfig::default()
        });
        let values = [-2.0, 0.5, 1.0];
        let weight = factory.choose_params_from_samples(&values, true);
        assert_eq!(weight.precision, 4);
        assert_eq!(weight.zero_point, 8);
        let activation = factory.choose_params_from_samples(&values, false);
        assert_eq!(activation.precision, 8);
        assert!((activation.scale - 3.0 / 255.0).abs() < 1e-6);

        let empty = factory.choose_params_from_samples(&[], false);
        assert!(empty.scale > 0.0);
    }

    #[test]
    fn kind_scheme_is_used() {
        let factory = QuantizationFactory::new(FactoryConfig {
            activation_scheme: QuantizationScheme::Percentile,
            ..FactoryConfig::default()
        });
        let hist = Histogram::from_parts(0.0, 10.0, vec![10; 1000]).unwrap();
        let activation = factory
            .choose_params_for_kind(Statistics::Histogram(&hist), false)
            .unwrap();
        let weight = factory
            .choose_params_for_kind(Statistics::Histogram(&hist), true)
            .unwrap();
        assert!(activation.scale < weight.scale);
    }
}
