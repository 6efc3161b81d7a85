//! Per-execution observers that accumulate tensor statistics.
//!
//! The execution engine calls [`Observer::observe`] for every tensor it
//! produces and [`Observer::end_execution`] once per run of the graph.
//! Observers that have an output path dump their statistics periodically and
//! once more on [`Observer::finish`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use qcal_core::{DEFAULT_NUM_BINS, Histogram, MinMaxTracker};

use crate::ObserveError;
use crate::dump::{StatsRecord, write_dump};

/// How often accumulated statistics are written out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DumpInterval {
    /// Only on [`Observer::finish`].
    #[default]
    Never,
    /// After every `n` executions.
    Every(u64),
}

impl DumpInterval {
    /// Interval from a signed frequency; zero or negative means never.
    pub fn from_frequency(frequency: i64) -> Self {
        if frequency > 0 {
            Self::Every(frequency as u64)
        } else {
            Self::Never
        }
    }

    fn is_due(self, executions: u64) -> bool {
        match self {
            Self::Never => false,
            Self::Every(n) => n > 0 && executions % n == 0,
        }
    }
}

/// Hook invoked by the execution engine.
pub trait Observer: Debug + Send {
    /// Human-readable name of the observer.
    fn name(&self) -> &str;

    /// Accumulate the values produced for `tensor` in the current execution.
    fn observe(&mut self, tensor: &str, values: &[f32]);

    /// Mark the end of one execution, dumping if the interval is due.
    fn end_execution(&mut self) -> Result<(), ObserveError>;

    /// Write the final statistics.
    fn finish(&mut self) -> Result<(), ObserveError>;

    /// Snapshot of the accumulated statistics, ordered by tensor identity.
    fn records(&self) -> Vec<StatsRecord>;

    /// Number of completed executions.
    fn executions(&self) -> u64;
}

/// Tracks the running min/max of every observed tensor.
#[derive(Debug, Default)]
pub struct MinMaxObserver {
    output: Option<PathBuf>,
    interval: DumpInterval,
    executions: u64,
    stats: BTreeMap<String, MinMaxTracker>,
}

impl MinMaxObserver {
    pub fn new(output: Option<PathBuf>, interval: DumpInterval) -> Self {
        Self {
            output,
            interval,
            ..Self::default()
        }
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn tracker(&self, tensor: &str) -> Option<&MinMaxTracker> {
        self.stats.get(tensor)
    }
}

impl Observer for MinMaxObserver {
    fn name(&self) -> &str {
        "min-max"
    }

    fn observe(&mut self, tensor: &str, values: &[f32]) {
        self.stats.entry(tensor.to_string()).or_default().observe(values);
    }

    fn end_execution(&mut self) -> Result<(), ObserveError> {
        self.executions += 1;
        if self.interval.is_due(self.executions) {
            dump(self.output.as_deref(), &self.records())?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ObserveError> {
        dump(self.output.as_deref(), &self.records())
    }

    fn records(&self) -> Vec<StatsRecord> {
        self.stats
            .iter()
            .filter_map(|(name, tracker)| {
                let (min, max) = tracker.range()?;
                Some(StatsRecord::from_min_max(name.clone(), min, max))
            })
            .collect()
    }

    fn executions(&self) -> u64 {
        self.executions
    }
}

/// Accumulates a fixed-bin histogram of every observed tensor.
#[derive(Clone, Debug)]
pub struct HistogramObserver {
    output: Option<PathBuf>,
    interval: DumpInterval,
    num_bins: usize,
    executions: u64,
    stats: BTreeMap<String, Histogram>,
}

impl Default for HistogramObserver {
    fn default() -> Self {
        Self::new(None, DumpInterval::Never, DEFAULT_NUM_BINS)
    }
}

impl HistogramObserver {
    /// # Panics
    ///
    /// Panics if `num_bins` is zero.
    pub fn new(output: Option<PathBuf>, interval: DumpInterval, num_bins: usize) -> Self {
        assert!(num_bins > 0, "histogram observer needs at least one bin");
        Self {
            output,
            interval,
            num_bins,
            executions: 0,
            stats: BTreeMap::new(),
        }
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn histogram(&self, tensor: &str) -> Option<&Histogram> {
        self.stats.get(tensor)
    }

    pub fn histograms(&self) -> impl Iterator<Item = (&str, &Histogram)> {
        self.stats.iter().map(|(name, hist)| (name.as_str(), hist))
    }

    /// Fold another observer's histograms into this one, matching tensors by
    /// identity. Execution counts add up.
    pub fn merge_from(&mut self, other: &HistogramObserver) {
        for (name, hist) in &other.stats {
            match self.stats.get_mut(name) {
                Some(existing) => existing.merge_from(hist),
                None => {
                    let mut fresh = Histogram::new(self.num_bins);
                    fresh.merge_from(hist);
                    self.stats.insert(name.clone(), fresh);
                }
            }
        }
        self.executions += other.executions;
    }
}

impl Observer for HistogramObserver {
    fn name(&self) -> &str {
        "histogram"
    }

    fn observe(&mut self, tensor: &str, values: &[f32]) {
        let num_bins = self.num_bins;
        self.stats
            .entry(tensor.to_string())
            .or_insert_with(|| Histogram::new(num_bins))
            .observe(values);
    }

    fn end_execution(&mut self) -> Result<(), ObserveError> {
        self.executions += 1;
        if self.interval.is_due(self.executions) {
            dump(self.output.as_deref(), &self.records())?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ObserveError> {
        dump(self.output.as_deref(), &self.records())
    }

    fn records(&self) -> Vec<StatsRecord> {
        self.stats
            .iter()
            .map(|(name, hist)| StatsRecord::from_histogram(name.clone(), hist))
            .collect()
    }

    fn executions(&self) -> u64 {
        self.executions
    }
}

fn dump(output: Option<&Path>, records: &[StatsRecord]) -> Result<(), ObserveError> {
    match output {
        Some(path) => write_dump(path, records),
        None => Ok(()),
    }
}
