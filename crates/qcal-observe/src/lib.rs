//! Statistics collection for qcal.
//!
//! Observers accumulate per-tensor min/max or histograms while an external
//! engine runs a graph. The [`ObserverRegistry`] decides which observers each
//! graph instance gets and merges statistics across instances. Statistics are
//! persisted as text dumps and turned into parameter tables.

pub mod dataset;
pub mod dump;
mod error;
pub mod observer;
pub mod qparams;
pub mod registry;
pub mod workspace;

pub use dataset::CalibrationDataset;
pub use dump::{StatsRecord, parse_dump, read_dump, write_dump};
pub use error::ObserveError;
pub use observer::{DumpInterval, HistogramObserver, MinMaxObserver, Observer};
pub use qparams::QParamsTable;
pub use registry::{ObserverHandle, ObserverRegistry, ObserverSet};
pub use workspace::{Blob, MemoryWorkspace, Workspace, choose_quantization_params};
