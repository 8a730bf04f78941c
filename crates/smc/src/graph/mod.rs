//! Directed acyclic graph of constant, logical and stochastic nodes.
//!
//! Nodes are appended with the `add_*` methods and the graph is then frozen by
//! [`Graph::build`], which sorts it topologically and derives every per-node array the samplers
//! read. After that only observations may change, through [`Graph::set_data`] and
//! [`Graph::remove_data`], each of which bumps [`Graph::data_version`].

mod build;
mod eval;
mod node;

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::catalog::{Distribution, Function};
use crate::error::{Error, Result};
use crate::utils::{all_integer, dim_len};

pub use node::{Node, NodeId, NodeKind, NodeVisitor, StochasticNode};

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    dims: Vec<Vec<usize>>,
    /// Fixed values: constants, observations and logical nodes of fixed parents.
    values: Vec<Option<Vec<f64>>>,
    observed: Vec<bool>,
    discrete: Vec<bool>,
    ranks: Vec<usize>,
    sorted: Vec<NodeId>,
    children: Vec<Vec<NodeId>>,
    stochastic_parents: Vec<Vec<NodeId>>,
    stochastic_children: Vec<Vec<NodeId>>,
    arrays: IndexMap<String, Vec<NodeId>>,
    built: bool,
    data_version: u64,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_node(
        &mut self,
        name: &str,
        kind: NodeKind,
        parents: Vec<NodeId>,
        dim: Vec<usize>,
        value: Option<Vec<f64>>,
    ) -> NodeId {
        let id = self.nodes.len();
        self.observed.push(value.is_some() && matches!(kind, NodeKind::Stochastic(_)));
        self.nodes.push(Node {
            id,
            name: name.to_string(),
            kind,
            parents,
        });
        self.dims.push(dim);
        self.values.push(value);
        id
    }

    fn check_not_built(&self, operation: &'static str) -> Result<()> {
        if self.built {
            Err(Error::GraphFrozen { operation })
        } else {
            Ok(())
        }
    }

    pub fn add_constant_node(&mut self, name: &str, dim: Vec<usize>, values: Vec<f64>) -> Result<NodeId> {
        self.check_not_built("add_constant_node")?;
        if dim_len(&dim) != values.len() || dim.is_empty() {
            return Err(Error::DimensionMismatch {
                node: name.to_string(),
                message: format!("dimension {:?} does not hold {} values", dim, values.len()),
            });
        }
        Ok(self.push_node(name, NodeKind::Constant, Vec::new(), dim, Some(values)))
    }

    pub fn add_logical_node(
        &mut self,
        name: &str,
        function: Arc<dyn Function>,
        parents: Vec<NodeId>,
    ) -> Result<NodeId> {
        self.check_not_built("add_logical_node")?;
        if !function.arity().accepts(parents.len()) {
            return Err(Error::DimensionMismatch {
                node: name.to_string(),
                message: format!(
                    "{} does not accept {} arguments",
                    function.name(),
                    parents.len()
                ),
            });
        }
        Ok(self.push_node(name, NodeKind::Logical(function), parents, Vec::new(), None))
    }

    /// Add a stochastic node, observed when `observed` holds a value.
    pub fn add_stochastic_node(
        &mut self,
        name: &str,
        distribution: Arc<dyn Distribution>,
        parents: Vec<NodeId>,
        observed: Option<Vec<f64>>,
        lower: Option<NodeId>,
        upper: Option<NodeId>,
    ) -> Result<NodeId> {
        self.check_not_built("add_stochastic_node")?;
        if distribution.num_params() != parents.len() {
            return Err(Error::DimensionMismatch {
                node: name.to_string(),
                message: format!(
                    "{} expects {} parameters, got {}",
                    distribution.name(),
                    distribution.num_params(),
                    parents.len()
                ),
            });
        }
        if (lower.is_some() || upper.is_some()) && !distribution.can_bound() {
            return Err(Error::InvalidParameter {
                node: name.to_string(),
                message: format!("{} cannot be truncated", distribution.name()),
            });
        }
        let kind = NodeKind::Stochastic(StochasticNode {
            distribution,
            lower,
            upper,
        });
        Ok(self.push_node(name, kind, parents, Vec::new(), observed))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or(Error::UnknownNode(id))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn name(&self, id: NodeId) -> &str {
        self.nodes.get(id).map_or("?", |n| n.name.as_str())
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Node ids in topological order (ties broken by smallest id).
    pub fn sorted_nodes(&self) -> Result<&[NodeId]> {
        self.require_built()?;
        Ok(&self.sorted)
    }

    /// Longest-path depth of every node, indexed by id.
    pub fn ranks(&self) -> Result<&[usize]> {
        self.require_built()?;
        Ok(&self.ranks)
    }

    pub(crate) fn require_built(&self) -> Result<()> {
        if self.built {
            Ok(())
        } else {
            Err(Error::GraphNotBuilt)
        }
    }

    pub fn rank(&self, id: NodeId) -> usize {
        self.ranks[id]
    }

    pub fn dim(&self, id: NodeId) -> &[usize] {
        &self.dims[id]
    }

    /// Value that does not depend on any unobserved node.
    pub fn fixed_value(&self, id: NodeId) -> Option<&[f64]> {
        self.values[id].as_deref()
    }

    pub fn is_fixed(&self, id: NodeId) -> bool {
        self.values[id].is_some()
    }

    pub fn is_observed(&self, id: NodeId) -> bool {
        self.observed[id]
    }

    pub fn is_discrete(&self, id: NodeId) -> bool {
        self.discrete[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.children[id]
    }

    /// Nearest stochastic ancestors, reached through logical nodes.
    pub fn stochastic_parents(&self, id: NodeId) -> &[NodeId] {
        &self.stochastic_parents[id]
    }

    /// Nearest stochastic descendants, reached through logical nodes.
    pub fn stochastic_children(&self, id: NodeId) -> &[NodeId] {
        &self.stochastic_children[id]
    }

    /// Unobserved stochastic nodes in topological order.
    pub fn unobserved_stochastic_nodes(&self) -> Vec<NodeId> {
        self.sorted
            .iter()
            .copied()
            .filter(|&id| self.nodes[id].is_stochastic() && !self.observed[id])
            .collect()
    }

    pub fn data_version(&self) -> u64 {
        self.data_version
    }

    /// Dispatch `visitor` on the variant of node `id`.
    pub fn visit_node<V: NodeVisitor>(&self, id: NodeId, visitor: &mut V) -> Result<V::Output> {
        let node = self.node(id)?;
        Ok(match &node.kind {
            NodeKind::Constant => visitor.visit_constant(node),
            NodeKind::Logical(function) => visitor.visit_logical(node, function.as_ref()),
            NodeKind::Stochastic(stochastic) => visitor.visit_stochastic(node, stochastic),
        })
    }

    /// Bind `name` to an ordered list of nodes, addressable from monitors as `name[i]`.
    pub fn bind_array(&mut self, name: &str, ids: Vec<NodeId>) -> Result<()> {
        if let Some(&bad) = ids.iter().find(|&&id| id >= self.nodes.len()) {
            return Err(Error::UnknownNode(bad));
        }
        self.arrays.insert(name.to_string(), ids);
        Ok(())
    }

    /// Nodes bound to `name`, or the single node of that name.
    pub fn array(&self, name: &str) -> Result<Vec<NodeId>> {
        if let Some(ids) = self.arrays.get(name) {
            return Ok(ids.clone());
        }
        self.node_by_name(name)
            .map(|id| vec![id])
            .ok_or_else(|| Error::UnknownArray(name.to_string()))
    }

    pub fn array_names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(|s| s.as_str())
    }

    /// Observe node `id` with `value`, or replace its observation.
    pub fn set_data(&mut self, id: NodeId, value: Vec<f64>) -> Result<()> {
        self.require_built()?;
        let node = self.node(id)?;
        if !node.is_stochastic() {
            return Err(Error::InvalidObservation {
                node: node.name.clone(),
                message: "only stochastic nodes can be observed".to_string(),
            });
        }
        if value.len() != dim_len(&self.dims[id]) {
            return Err(Error::DimensionMismatch {
                node: node.name.clone(),
                message: format!("expected {} values, got {}", dim_len(&self.dims[id]), value.len()),
            });
        }
        if self.discrete[id] && !all_integer(&value) {
            return Err(Error::InvalidObservation {
                node: node.name.clone(),
                message: "discrete node observed with non-integer values".to_string(),
            });
        }
        let mut values = self.values.clone();
        values[id] = Some(value);
        self.refresh_fixed_values(values)?;
        self.observed[id] = true;
        self.data_version += 1;
        debug!(node = %self.nodes[id].name, version = self.data_version, "data set");
        Ok(())
    }

    /// Turn the observed node `id` back into an unobserved one.
    pub fn remove_data(&mut self, id: NodeId) -> Result<()> {
        self.require_built()?;
        let node = self.node(id)?;
        if !self.observed[id] {
            return Err(Error::InvalidObservation {
                node: node.name.clone(),
                message: "node is not observed".to_string(),
            });
        }
        let mut values = self.values.clone();
        values[id] = None;
        self.refresh_fixed_values(values)?;
        self.observed[id] = false;
        self.data_version += 1;
        debug!(node = %self.nodes[id].name, version = self.data_version, "data removed");
        Ok(())
    }
}
