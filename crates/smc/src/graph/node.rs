//! Node variants and the visitor used to dispatch over them.

use std::fmt;
use std::sync::Arc;

use crate::catalog::{Distribution, Function};

/// Dense node identifier, assigned at insertion and used as an index everywhere.
pub type NodeId = usize;

/// Stochastic node payload: its distribution and optional truncation bound parents.
#[derive(Debug, Clone)]
pub struct StochasticNode {
    pub distribution: Arc<dyn Distribution>,
    pub lower: Option<NodeId>,
    pub upper: Option<NodeId>,
}

impl StochasticNode {
    pub fn is_bounded(&self) -> bool {
        self.lower.is_some() || self.upper.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Constant,
    Logical(Arc<dyn Function>),
    Stochastic(StochasticNode),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub parents: Vec<NodeId>,
}

impl Node {
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, NodeKind::Constant)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self.kind, NodeKind::Logical(_))
    }

    pub fn is_stochastic(&self) -> bool {
        matches!(self.kind, NodeKind::Stochastic(_))
    }

    pub fn stochastic(&self) -> Option<&StochasticNode> {
        match &self.kind {
            NodeKind::Stochastic(s) => Some(s),
            _ => None,
        }
    }

    /// Parents followed by truncation bound parents.
    pub fn dependencies(&self) -> impl Iterator<Item = NodeId> + '_ {
        let bounds = match &self.kind {
            NodeKind::Stochastic(s) => [s.lower, s.upper],
            _ => [None, None],
        };
        self.parents
            .iter()
            .copied()
            .chain(bounds.into_iter().flatten())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Constant => write!(f, "{} (constant)", self.name),
            NodeKind::Logical(func) => write!(f, "{} <- {}({:?})", self.name, func.name(), self.parents),
            NodeKind::Stochastic(s) => {
                write!(f, "{} ~ {}({:?})", self.name, s.distribution.name(), self.parents)
            }
        }
    }
}

/// Per-variant dispatch over nodes, see [`crate::graph::Graph::visit_node`].
pub trait NodeVisitor {
    type Output;

    fn visit_constant(&mut self, node: &Node) -> Self::Output;

    fn visit_logical(&mut self, node: &Node, function: &dyn Function) -> Self::Output;

    fn visit_stochastic(&mut self, node: &Node, stochastic: &StochasticNode) -> Self::Output;
}
