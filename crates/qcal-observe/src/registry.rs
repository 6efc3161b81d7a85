//! Observer registrations and per-instance observer sets.
//!
//! An [`ObserverRegistry`] records which observers should run. Each time the
//! engine creates a graph instance it calls [`ObserverRegistry::instantiate`]
//! to get fresh observers, feeds them through the returned [`ObserverSet`],
//! and hands the set back to [`ObserverRegistry::collect`] when the instance
//! is done. Histogram observers registered with `merge_across_instances` are
//! folded into one accumulator per output path at that point.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use qcal_core::DEFAULT_NUM_BINS;

use crate::ObserveError;
use crate::observer::{DumpInterval, HistogramObserver, MinMaxObserver, Observer};
use crate::workspace::Workspace;

/// Identifies a registration for later removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverHandle(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    MinMax,
    Histogram { merge_across_instances: bool },
}

#[derive(Clone, Debug)]
struct Registration {
    handle: ObserverHandle,
    /// `None` for registrations that apply to every graph.
    graph_id: Option<String>,
    kind: Kind,
    output: PathBuf,
    interval: DumpInterval,
}

impl Registration {
    fn applies_to(&self, graph_id: &str) -> bool {
        self.graph_id.as_deref().is_none_or(|id| id == graph_id)
    }

    /// Where one instance writes its own statistics.
    fn instance_output(&self, graph_id: &str) -> PathBuf {
        let shared = match self.kind {
            Kind::MinMax => self.graph_id.is_none(),
            Kind::Histogram {
                merge_across_instances,
            } => self.graph_id.is_none() || merge_across_instances,
        };
        if shared {
            suffixed(&self.output, graph_id)
        } else {
            self.output.clone()
        }
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Owned set of observer registrations plus the cross-instance accumulators.
#[derive(Debug)]
pub struct ObserverRegistry {
    registrations: Vec<Registration>,
    next_handle: u64,
    num_bins: usize,
    merged: BTreeMap<PathBuf, HistogramObserver>,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::with_num_bins(DEFAULT_NUM_BINS)
    }

    /// Registry whose histogram observers use `num_bins` bins.
    ///
    /// # Panics
    ///
    /// Panics if `num_bins` is zero.
    pub fn with_num_bins(num_bins: usize) -> Self {
        assert!(num_bins > 0, "histogram observers need at least one bin");
        Self {
            registrations: Vec::new(),
            next_handle: 0,
            num_bins,
            merged: BTreeMap::new(),
        }
    }

    /// Drop every registration and accumulated cross-instance statistic.
    pub fn clear_observers(&mut self) {
        log::debug!("clearing {} observer registrations", self.registrations.len());
        self.registrations.clear();
        self.merged.clear();
    }

    /// Track min/max for every graph instantiated from now on.
    pub fn register_minmax_observer(
        &mut self,
        output: impl Into<PathBuf>,
        interval: DumpInterval,
    ) -> ObserverHandle {
        self.add(None, Kind::MinMax, output.into(), interval)
    }

    /// Track histograms for every graph instantiated from now on.
    pub fn register_histogram_observer(
        &mut self,
        output: impl Into<PathBuf>,
        interval: DumpInterval,
        merge_across_instances: bool,
    ) -> ObserverHandle {
        self.add(
            None,
            Kind::Histogram {
                merge_across_instances,
            },
            output.into(),
            interval,
        )
    }

    /// Track histograms for one graph the workspace already defines.
    pub fn attach_histogram_observer(
        &mut self,
        workspace: &dyn Workspace,
        graph_id: &str,
        output: impl Into<PathBuf>,
        interval: DumpInterval,
        merge_across_instances: bool,
    ) -> Result<ObserverHandle, ObserveError> {
        if !workspace.has_graph(graph_id) {
            return Err(ObserveError::GraphNotFound(graph_id.to_string()));
        }
        Ok(self.add(
            Some(graph_id.to_string()),
            Kind::Histogram {
                merge_across_instances,
            },
            output.into(),
            interval,
        ))
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn detach(&mut self, handle: ObserverHandle) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.handle != handle);
        self.registrations.len() != before
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Fresh observers for one instance of `graph_id`.
    pub fn instantiate(&self, graph_id: &str) -> ObserverSet {
        let observers = self
            .registrations
            .iter()
            .filter(|r| r.applies_to(graph_id))
            .map(|r| {
                let output = Some(r.instance_output(graph_id));
                match r.kind {
                    Kind::MinMax => Slot::MinMax(MinMaxObserver::new(output, r.interval)),
                    Kind::Histogram {
                        merge_across_instances,
                    } => Slot::Histogram {
                        observer: HistogramObserver::new(output, r.interval, self.num_bins),
                        merge_into: merge_across_instances.then(|| r.output.clone()),
                    },
                }
            })
            .collect();
        log::debug!("instantiated observers for graph '{graph_id}'");
        ObserverSet {
            graph_id: graph_id.to_string(),
            observers,
        }
    }

    /// Finish an instance's observers and fold mergeable histograms into the
    /// shared accumulators, which are then written to their output paths.
    pub fn collect(&mut self, mut set: ObserverSet) -> Result<(), ObserveError> {
        for slot in &mut set.observers {
            slot.observer_mut().finish()?;
        }
        for slot in set.observers {
            if let Slot::Histogram {
                observer,
                merge_into: Some(output),
            } = slot
            {
                let num_bins = self.num_bins;
                let accumulator = self.merged.entry(output.clone()).or_insert_with(|| {
                    HistogramObserver::new(Some(output), DumpInterval::Never, num_bins)
                });
                accumulator.merge_from(&observer);
                accumulator.finish()?;
                log::info!(
                    "merged graph '{}' statistics into {}",
                    set.graph_id,
                    accumulator
                        .output()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                );
            }
        }
        Ok(())
    }

    /// The cross-instance accumulator writing to `output`.
    pub fn merged(&self, output: &Path) -> Option<&HistogramObserver> {
        self.merged.get(output)
    }

    fn add(
        &mut self,
        graph_id: Option<String>,
        kind: Kind,
        output: PathBuf,
        interval: DumpInterval,
    ) -> ObserverHandle {
        let handle = ObserverHandle(self.next_handle);
        self.next_handle += 1;
        self.registrations.push(Registration {
            handle,
            graph_id,
            kind,
            output,
            interval,
        });
        handle
    }
}

#[derive(Debug)]
enum Slot {
    MinMax(MinMaxObserver),
    Histogram {
        observer: HistogramObserver,
        merge_into: Option<PathBuf>,
    },
}

impl Slot {
    fn observer(&self) -> &dyn Observer {
        match self {
            Slot::MinMax(o) => o,
            Slot::Histogram { observer, .. } => observer,
        }
    }

    fn observer_mut(&mut self) -> &mut dyn Observer {
        match self {
            Slot::MinMax(o) => o,
            Slot::Histogram { observer, .. } => observer,
        }
    }
}

/// The observers attached to one running graph instance.
#[derive(Debug)]
pub struct ObserverSet {
    graph_id: String,
    observers: Vec<Slot>,
}

impl ObserverSet {
    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Feed one tensor's values to every observer.
    pub fn observe(&mut self, tensor: &str, values: &[f32]) {
        for slot in &mut self.observers {
            slot.observer_mut().observe(tensor, values);
        }
    }

    /// Mark the end of one execution on every observer.
    pub fn end_execution(&mut self) -> Result<(), ObserveError> {
        for slot in &mut self.observers {
            slot.observer_mut().end_execution()?;
        }
        Ok(())
    }

    pub fn observers(&self) -> impl Iterator<Item = &dyn Observer> {
        self.observers.iter().map(Slot::observer)
    }
}
