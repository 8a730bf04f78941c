//! Engine errors

use thiserror::Error;

use crate::graph::NodeId;

/// Engine result type
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller or programmer error: out-of-order calls, cycles, unknown names.
    Logic,
    /// Runtime numerical failure: Cholesky breakdown, degenerate weights.
    Numerical,
    /// Bad parameter values or dimensions, detected before sampling.
    Validation,
}

/// Engine errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("cycle detected in graph: {nodes:?}")]
    CycleDetected { nodes: Vec<String> },

    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    #[error("node {node} references unknown parent id {parent}")]
    UnknownParent { node: String, parent: NodeId },

    #[error("graph is built: {operation} is no longer allowed")]
    GraphFrozen { operation: &'static str },

    #[error("graph is not built")]
    GraphNotBuilt,

    #[error("invalid state: {operation} not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("dimension mismatch for node {node}: {message}")]
    DimensionMismatch { node: String, message: String },

    #[error("invalid parameter values for node {node}: {message}")]
    InvalidParameter { node: String, message: String },

    #[error("observed value of node {node} is invalid: {message}")]
    InvalidObservation { node: String, message: String },

    #[error("evaluation of node {node} failed: {message}")]
    Evaluation { node: String, message: String },

    #[error("node {node} has no value")]
    MissingValue { node: String },

    #[error("numerical error in node {node}: {message}")]
    Numerical { node: String, message: String },

    #[error("degenerate particle weights after sampling node {node}")]
    DegenerateWeights { node: String },

    #[error("unknown distribution '{0}'")]
    UnknownDistribution(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unknown node array '{0}'")]
    UnknownArray(String),

    #[error("range {start}..{end} out of bounds for node array '{array}' of length {len}")]
    RangeOutOfBounds {
        array: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("invalid node range '{0}'")]
    InvalidRange(String),

    #[error("node array '{0}' is not monitored")]
    NotMonitored(String),

    #[error("backward smoother is locked: data changed since the forward sampler ran")]
    BackwardLocked,

    #[error("sampler interrupted after iteration {0}")]
    Interrupted(usize),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify the error into the logic / numerical / validation taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Numerical { .. } | Error::DegenerateWeights { .. } | Error::Evaluation { .. } => {
                ErrorKind::Numerical
            }
            Error::DimensionMismatch { .. }
            | Error::InvalidParameter { .. }
            | Error::InvalidObservation { .. }
            | Error::Config(_)
            | Error::Json(_) => ErrorKind::Validation,
            _ => ErrorKind::Logic,
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, state: impl std::fmt::Debug) -> Self {
        Error::InvalidState {
            operation,
            state: format!("{:?}", state),
        }
    }

    pub(crate) fn numerical(node: &str, message: impl Into<String>) -> Self {
        Error::Numerical {
            node: node.to_string(),
            message: message.into(),
        }
    }
}
