pub mod backward;
pub mod catalog;
pub mod config;
pub mod error;
pub mod forward;
pub mod graph;
pub mod matrix;
pub mod model;
pub mod monitor;
pub mod particle;
pub mod resample;
pub mod sampler;
pub mod utils;

pub use backward::{BackwardSmoother, SmootherState};
pub use catalog::{Catalog, Distribution, Function, ParamRef};
pub use config::SmcConfig;
pub use error::{Error, ErrorKind, Result};
pub use forward::{ForwardSampler, SamplerState, Snapshot};
pub use graph::{Graph, Node, NodeId, NodeKind, NodeVisitor, StochasticNode};
pub use model::{IterationReport, Model};
pub use monitor::{MonitorSet, NodeRange, Pdf, StatTag};
pub use particle::Particle;
pub use resample::{resample_indices, ResampleType};
pub use sampler::{IterationPlan, NodeSampler, NodeSamplerFactory, SamplerRegistry};
