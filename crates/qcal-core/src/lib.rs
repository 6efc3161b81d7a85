//! Quantization calibration for qcal.
//!
//! Accumulates value statistics ([`MinMaxTracker`], [`Histogram`]) and turns
//! them into affine quantization parameters ([`TensorQuantizationParams`])
//! with one of several range-selection strategies: min/max, L2 or L1 error
//! minimization, KL-divergence minimization, and percentile clipping.
//! [`QuantizationFactory`] routes requests to a strategy using per-kind
//! defaults for weights and activations.

mod error;
pub mod factory;
pub mod histogram;
pub mod kl;
pub mod minmax;
pub mod norm;
pub mod params;
pub mod scheme;
pub mod strategy;

pub use error::CalibrationError;
pub use factory::{
    CalibrationConfig, FactoryConfig, QuantizationFactory, StaticOptions, Statistics,
    choose_static_quantization_params,
};
pub use histogram::{DEFAULT_NUM_BINS, Histogram};
pub use kl::KlMinimization;
pub use minmax::MinMaxTracker;
pub use norm::{Norm, NormMinimization, Search};
pub use params::{MappingOptions, TensorQuantizationParams, choose_from_range};
pub use scheme::QuantizationScheme;
pub use strategy::{MinMax, Percentile, QuantizationStrategy, strategy_for};
