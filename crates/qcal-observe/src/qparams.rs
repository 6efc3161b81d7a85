//! Tables of per-tensor quantization parameters.
//!
//! Text format, one tensor per line: `<identity> <scale> <zero_point> <precision>`.
//! Identities and comments follow the rules of [`crate::dump`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use qcal_core::{
    CalibrationConfig, QuantizationFactory, QuantizationScheme, Statistics,
    TensorQuantizationParams,
};

use crate::ObserveError;
use crate::dump::{StatsRecord, fields, validate_identity};

/// Quantization parameters keyed by tensor identity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QParamsTable {
    entries: BTreeMap<String, TensorQuantizationParams>,
}

impl QParamsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute parameters for every record. Histogram records use `scheme`;
    /// min/max records always use the min/max mapping.
    pub fn from_records(
        records: &[StatsRecord],
        factory: &QuantizationFactory,
        scheme: QuantizationScheme,
        config: &CalibrationConfig,
    ) -> Result<Self, ObserveError> {
        let mut table = Self::new();
        for record in records {
            let params = match record.histogram() {
                Some(hist) => {
                    let hist = hist?;
                    factory.choose_params(Statistics::Histogram(&hist), scheme, config)?
                }
                None => {
                    let tracker = record.tracker();
                    factory.choose_params(
                        Statistics::MinMax(&tracker),
                        QuantizationScheme::MinMax,
                        config,
                    )?
                }
            };
            log::info!(
                "{}: scale={:.6e} zero_point={} range=[{}, {}]",
                record.identity,
                params.scale,
                params.zero_point,
                params.min(),
                params.max()
            );
            table.insert(record.identity.clone(), params);
        }
        Ok(table)
    }

    pub fn insert(&mut self, identity: impl Into<String>, params: TensorQuantizationParams) {
        self.entries.insert(identity.into(), params);
    }

    pub fn get(&self, identity: &str) -> Option<&TensorQuantizationParams> {
        self.entries.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorQuantizationParams)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Encode the table as text. Fails on an identity the parser could not
    /// read back.
    pub fn format(&self) -> Result<String, ObserveError> {
        let mut out = String::new();
        for (identity, p) in &self.entries {
            validate_identity(identity)?;
            let _ = writeln!(out, "{identity} {} {} {}", p.scale, p.zero_point, p.precision);
        }
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<(), ObserveError> {
        let text = self.format()?;
        std::fs::write(path, text).map_err(|e| ObserveError::io(path, e))
    }

    pub fn read(path: &Path) -> Result<Self, ObserveError> {
        let text = std::fs::read_to_string(path).map_err(|e| ObserveError::io(path, e))?;
        Self::parse(&text)
    }

    /// Parse table text. Blank lines and comments are ignored.
    pub fn parse(text: &str) -> Result<Self, ObserveError> {
        let mut table = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let tokens: Vec<&str> = fields(raw).collect();
            if tokens.is_empty() {
                continue;
            }
            let [identity, scale, zero_point, precision] = tokens[..] else {
                return Err(ObserveError::parse(
                    line_no,
                    format!("expected 4 fields, found {}", tokens.len()),
                ));
            };
            let scale: f32 = scale
                .parse()
                .map_err(|_| ObserveError::parse(line_no, format!("invalid scale '{scale}'")))?;
            let zero_point: i32 = zero_point.parse().map_err(|_| {
                ObserveError::parse(line_no, format!("invalid zero point '{zero_point}'"))
            })?;
            let precision: u8 = precision.parse().map_err(|_| {
                ObserveError::parse(line_no, format!("invalid precision '{precision}'"))
            })?;
            qcal_core::params::validate_precision(precision)?;
            if !(scale.is_finite() && scale > 0.0) {
                return Err(ObserveError::parse(line_no, format!("invalid scale '{scale}'")));
            }
            table.insert(
                identity,
                TensorQuantizationParams {
                    scale,
                    zero_point,
                    precision,
                },
            );
        }
        Ok(table)
    }
}
