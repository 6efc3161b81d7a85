//! The narrow view of an execution engine's storage that calibration needs.

use std::collections::{BTreeMap, BTreeSet};

use qcal_core::QuantizationFactory;

/// A stored value, as seen by calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Blob<'a> {
    /// A tensor of 32-bit floats.
    FloatTensor(&'a [f32]),
    /// A tensor of another element type.
    Tensor { dtype: &'a str },
    /// Anything that is not a tensor.
    Opaque,
}

/// Lookup capability implemented by the execution engine.
pub trait Workspace {
    /// Whether a graph with this identifier has been defined.
    fn has_graph(&self, graph_id: &str) -> bool;

    /// The blob stored under `name`, if any.
    fn blob(&self, name: &str) -> Option<Blob<'_>>;
}

#[derive(Clone, Debug, PartialEq)]
enum StoredBlob {
    Float(Vec<f32>),
    Tensor(String),
    Opaque,
}

/// In-memory [`Workspace`].
#[derive(Clone, Debug, Default)]
pub struct MemoryWorkspace {
    graphs: BTreeSet<String>,
    blobs: BTreeMap<String, StoredBlob>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_graph(&mut self, graph_id: impl Into<String>) {
        self.graphs.insert(graph_id.into());
    }

    pub fn insert_float(&mut self, name: impl Into<String>, values: Vec<f32>) {
        self.blobs.insert(name.into(), StoredBlob::Float(values));
    }

    /// Store a tensor of a non-float element type.
    pub fn insert_tensor(&mut self, name: impl Into<String>, dtype: impl Into<String>) {
        self.blobs.insert(name.into(), StoredBlob::Tensor(dtype.into()));
    }

    pub fn insert_opaque(&mut self, name: impl Into<String>) {
        self.blobs.insert(name.into(), StoredBlob::Opaque);
    }
}

impl Workspace for MemoryWorkspace {
    fn has_graph(&self, graph_id: &str) -> bool {
        self.graphs.contains(graph_id)
    }

    fn blob(&self, name: &str) -> Option<Blob<'_>> {
        self.blobs.get(name).map(|blob| match blob {
            StoredBlob::Float(values) => Blob::FloatTensor(values),
            StoredBlob::Tensor(dtype) => Blob::Tensor { dtype },
            StoredBlob::Opaque => Blob::Opaque,
        })
    }
}

/// Min/max `(scale, zero_point)` for the current values of a float tensor,
/// calibrated as a weight.
///
/// A missing blob, a non-tensor blob or a non-float tensor is logged and
/// yields `(1.0, 0)`.
pub fn choose_quantization_params(
    workspace: &dyn Workspace,
    factory: &QuantizationFactory,
    name: &str,
) -> (f32, i32) {
    match workspace.blob(name) {
        Some(Blob::FloatTensor(values)) => {
            let params = factory.choose_params_from_samples(values, true);
            (params.scale, params.zero_point)
        }
        Some(Blob::Tensor { dtype }) => {
            log::warn!("blob {name} is not a float tensor (element type {dtype})");
            (1.0, 0)
        }
        Some(Blob::Opaque) => {
            log::warn!("blob {name} is not a tensor");
            (1.0, 0)
        }
        None => {
            log::warn!("can't find blob {name}");
            (1.0, 0)
        }
    }
}
