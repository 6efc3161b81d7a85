//! Text encoding of accumulated statistics.
//!
//! One record per line, whitespace separated. A field starting with `#`
//! begins a comment that runs to the end of the line, so identities may
//! contain `#` anywhere but at their start:
//!
//! ```text
//! <identity> <min> <max>
//! <identity> <min> <max> <nbins> <c0> ... <c{nbins-1}>
//! ```

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use qcal_core::{Histogram, MinMaxTracker};

use crate::ObserveError;

/// Statistics for one tensor identity.
#[derive(Clone, Debug, PartialEq)]
pub struct StatsRecord {
    pub identity: String,
    pub min: f32,
    pub max: f32,
    /// Bin counts when the record carries a full histogram.
    pub bins: Option<Vec<u64>>,
}

impl StatsRecord {
    pub fn from_min_max(identity: impl Into<String>, min: f32, max: f32) -> Self {
        Self {
            identity: identity.into(),
            min,
            max,
            bins: None,
        }
    }

    pub fn from_histogram(identity: impl Into<String>, hist: &Histogram) -> Self {
        Self {
            identity: identity.into(),
            min: hist.min(),
            max: hist.max(),
            bins: Some(hist.bins().to_vec()),
        }
    }

    /// The histogram described by this record, if it has bins.
    pub fn histogram(&self) -> Option<Result<Histogram, ObserveError>> {
        self.bins
            .as_ref()
            .map(|bins| Ok(Histogram::from_parts(self.min, self.max, bins.clone())?))
    }

    /// The record's range as a tracker.
    pub fn tracker(&self) -> MinMaxTracker {
        MinMaxTracker::from_range(self.min, self.max)
    }
}

/// Identities must be a single field that does not open a comment.
pub(crate) fn validate_identity(identity: &str) -> Result<(), ObserveError> {
    if identity.is_empty()
        || identity.starts_with('#')
        || identity.chars().any(char::is_whitespace)
    {
        return Err(ObserveError::InvalidIdentity(identity.to_string()));
    }
    Ok(())
}

/// Whitespace-separated fields of `line` up to the first comment field.
pub(crate) fn fields(line: &str) -> impl Iterator<Item = &str> {
    line.split_whitespace().take_while(|f| !f.starts_with('#'))
}

/// Encode records as dump text.
pub fn format_dump(records: &[StatsRecord]) -> Result<String, ObserveError> {
    let mut out = String::new();
    for record in records {
        validate_identity(&record.identity)?;
        let _ = write!(out, "{} {} {}", record.identity, record.min, record.max);
        if let Some(bins) = &record.bins {
            let _ = write!(out, " {}", bins.len());
            for count in bins {
                let _ = write!(out, " {count}");
            }
        }
        out.push('\n');
    }
    Ok(out)
}

/// Write records to `path`, replacing its contents.
pub fn write_dump(path: &Path, records: &[StatsRecord]) -> Result<(), ObserveError> {
    let text = format_dump(records)?;
    let mut file = std::fs::File::create(path).map_err(|e| ObserveError::io(path, e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| ObserveError::io(path, e))?;
    log::debug!("wrote {} records to {}", records.len(), path.display());
    Ok(())
}

/// Read records from `path`.
pub fn read_dump(path: &Path) -> Result<Vec<StatsRecord>, ObserveError> {
    let text = std::fs::read_to_string(path).map_err(|e| ObserveError::io(path, e))?;
    parse_dump(&text)
}

/// Parse dump text.
pub fn parse_dump(text: &str) -> Result<Vec<StatsRecord>, ObserveError> {
    let mut records = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let mut tokens = fields(raw);
        let Some(identity) = tokens.next() else {
            continue;
        };
        let identity = identity.to_string();
        let min = parse_float(tokens.next(), line_no, "min")?;
        let max = parse_float(tokens.next(), line_no, "max")?;
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(ObserveError::parse(
                line_no,
                format!("invalid range [{min}, {max}] for '{identity}'"),
            ));
        }

        let bins = match tokens.next() {
            None => None,
            Some(n) => {
                let n: usize = n
                    .parse()
                    .map_err(|_| ObserveError::parse(line_no, format!("invalid bin count '{n}'")))?;
                if n == 0 {
                    return Err(ObserveError::parse(line_no, "histogram with zero bins"));
                }
                let counts = tokens
                    .by_ref()
                    .map(|c| {
                        c.parse::<u64>().map_err(|_| {
                            ObserveError::parse(line_no, format!("invalid bin count value '{c}'"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if counts.len() != n {
                    return Err(ObserveError::parse(
                        line_no,
                        format!("expected {n} bin counts, found {}", counts.len()),
                    ));
                }
                Some(counts)
            }
        };

        records.push(StatsRecord {
            identity,
            min,
            max,
            bins,
        });
    }
    Ok(records)
}

fn parse_float(field: Option<&str>, line: usize, what: &str) -> Result<f32, ObserveError> {
    let field = field.ok_or_else(|| ObserveError::parse(line, format!("missing {what}")))?;
    field
        .parse()
        .map_err(|_| ObserveError::parse(line, format!("invalid {what} '{field}'")))
}
