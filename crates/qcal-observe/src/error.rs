//! Error types for statistics collection and persistence.

use std::path::PathBuf;

use qcal_core::CalibrationError;

/// Errors that can occur while observing, dumping, or loading statistics.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// Invalid statistics or calibration options.
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    /// Failed to read or write a file.
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A sample file whose size is not a whole number of f32 values.
    #[error("sample file {path} has invalid size {size} (must be a multiple of 4 bytes)")]
    InvalidFileSize { path: PathBuf, size: u64 },

    /// No `.bin` sample files in a dataset directory.
    #[error("no .bin sample files found in {0}")]
    NoSamples(PathBuf),

    /// An observer was attached to a graph the workspace does not define.
    #[error("graph '{0}' not found in workspace")]
    GraphNotFound(String),

    /// A malformed line in a statistics dump or parameter table.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A tensor identity that cannot be written to a dump.
    #[error("invalid tensor identity '{0}' (must be non-empty without whitespace)")]
    InvalidIdentity(String),
}

impl ObserveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}
