//! Calibration samples stored on disk.

use std::path::{Path, PathBuf};

use crate::ObserveError;

/// One tensor's values across several executions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationDataset {
    /// Values of each execution, in file-name order.
    pub samples: Vec<Vec<f32>>,
    /// Directory the samples were loaded from, if any.
    pub source_dir: Option<PathBuf>,
}

impl CalibrationDataset {
    /// Load every `.bin` file of raw little-endian f32 values in `dir`,
    /// sorted by file name.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ObserveError> {
        let entries = std::fs::read_dir(dir).map_err(|e| ObserveError::io(dir, e))?;

        let mut bin_files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ObserveError::io(dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "bin") {
                bin_files.push(path);
            }
        }
        bin_files.sort();

        if bin_files.is_empty() {
            return Err(ObserveError::NoSamples(dir.to_path_buf()));
        }

        let samples = bin_files
            .iter()
            .map(|path| read_f32_file(path))
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("loaded {} samples from {}", samples.len(), dir.display());

        Ok(Self {
            samples,
            source_dir: Some(dir.to_path_buf()),
        })
    }

    pub fn from_samples(samples: Vec<Vec<f32>>) -> Self {
        Self {
            samples,
            source_dir: None,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn read_f32_file(path: &Path) -> Result<Vec<f32>, ObserveError> {
    let data = std::fs::read(path).map_err(|e| ObserveError::io(path, e))?;
    if data.len() % 4 != 0 {
        return Err(ObserveError::InvalidFileSize {
            path: path.to_path_buf(),
            size: data.len() as u64,
        });
    }
    Ok(data
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
