use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::{debug, info};

use super::{Graph, Node, NodeId, NodeKind, NodeVisitor, StochasticNode};
use crate::catalog::{Bounds, Function, ParamRef};
use crate::error::{Error, Result};
use crate::utils::{all_integer, dim_len};

/// Everything `build` derives, committed only once all of it succeeded.
struct Layout {
    sorted: Vec<NodeId>,
    ranks: Vec<usize>,
    dims: Vec<Vec<usize>>,
    values: Vec<Option<Vec<f64>>>,
    discrete: Vec<bool>,
    children: Vec<Vec<NodeId>>,
    stochastic_parents: Vec<Vec<NodeId>>,
    stochastic_children: Vec<Vec<NodeId>>,
}

fn fixed_params<'a>(
    parents: &[NodeId],
    dims: &'a [Vec<usize>],
    values: &'a [Option<Vec<f64>>],
) -> Option<Vec<ParamRef<'a>>> {
    parents
        .iter()
        .map(|&p| values[p].as_deref().map(|v| ParamRef::new(v, &dims[p])))
        .collect()
}

fn fixed_bound(id: Option<NodeId>, values: &[Option<Vec<f64>>]) -> Option<Option<f64>> {
    match id {
        None => Some(None),
        Some(b) => values[b].as_deref().and_then(|v| v.first().copied()).map(Some),
    }
}

/// Discreteness of a node given the flags of the nodes before it in topological order.
struct Discreteness<'a> {
    discrete: &'a [bool],
    values: &'a [Option<Vec<f64>>],
}

impl NodeVisitor for Discreteness<'_> {
    type Output = bool;

    fn visit_constant(&mut self, node: &Node) -> bool {
        self.values[node.id].as_deref().map_or(false, all_integer)
    }

    fn visit_logical(&mut self, node: &Node, function: &dyn Function) -> bool {
        let flags: Vec<bool> = node.parents.iter().map(|&p| self.discrete[p]).collect();
        function.is_discrete_valued(&flags)
    }

    fn visit_stochastic(&mut self, node: &Node, stochastic: &StochasticNode) -> bool {
        let flags: Vec<bool> = node.parents.iter().map(|&p| self.discrete[p]).collect();
        stochastic.distribution.is_discrete_valued(&flags)
    }
}

impl Graph {
    /// Sort, validate and freeze the graph.
    ///
    /// On failure the graph is left exactly as it was before the call.
    pub fn build(&mut self) -> Result<()> {
        self.check_not_built("build")?;
        let layout = self.layout()?;
        self.sorted = layout.sorted;
        self.ranks = layout.ranks;
        self.dims = layout.dims;
        self.values = layout.values;
        self.discrete = layout.discrete;
        self.children = layout.children;
        self.stochastic_parents = layout.stochastic_parents;
        self.stochastic_children = layout.stochastic_children;
        self.built = true;
        info!(
            nodes = self.nodes.len(),
            unobserved = self.unobserved_stochastic_nodes().len(),
            "graph built"
        );
        Ok(())
    }

    fn layout(&self) -> Result<Layout> {
        let n = self.nodes.len();
        for node in &self.nodes {
            if let Some(parent) = node.dependencies().find(|&p| p >= n) {
                return Err(Error::UnknownParent {
                    node: node.name.clone(),
                    parent,
                });
            }
        }

        let sorted = self.topological_order()?;

        let mut ranks = vec![0; n];
        for &id in &sorted {
            ranks[id] = self.nodes[id]
                .dependencies()
                .map(|p| ranks[p] + 1)
                .max()
                .unwrap_or(0);
        }

        let mut dims = self.dims.clone();
        let mut values = self.values.clone();
        for &id in &sorted {
            self.resolve_node(id, &mut dims, &mut values)?;
        }

        let mut discrete = vec![false; n];
        for &id in &sorted {
            let flag = self.visit_node(
                id,
                &mut Discreteness {
                    discrete: &discrete,
                    values: &values,
                },
            )?;
            discrete[id] = flag;
            if flag && self.observed[id] {
                let observed = values[id].as_deref().unwrap_or_default();
                if !all_integer(observed) {
                    return Err(Error::InvalidObservation {
                        node: self.nodes[id].name.clone(),
                        message: "discrete node observed with non-integer values".to_string(),
                    });
                }
            }
        }

        let mut children = vec![Vec::new(); n];
        let mut stochastic_parents: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        for &id in &sorted {
            let mut deps: Vec<NodeId> = self.nodes[id].dependencies().collect();
            deps.sort_unstable();
            deps.dedup();
            let mut sp = Vec::new();
            for &p in &deps {
                children[p].push(id);
                match self.nodes[p].kind {
                    NodeKind::Stochastic(_) => sp.push(p),
                    NodeKind::Logical(_) => sp.extend_from_slice(&stochastic_parents[p]),
                    NodeKind::Constant => {}
                }
            }
            sp.sort_unstable();
            sp.dedup();
            stochastic_parents[id] = sp;
        }
        let mut stochastic_children = vec![Vec::new(); n];
        for &id in &sorted {
            if self.nodes[id].is_stochastic() {
                for &p in &stochastic_parents[id] {
                    stochastic_children[p].push(id);
                }
            }
        }

        Ok(Layout {
            sorted,
            ranks,
            dims,
            values,
            discrete,
            children,
            stochastic_parents,
            stochastic_children,
        })
    }

    /// Kahn's algorithm, always expanding the smallest ready id.
    fn topological_order(&self) -> Result<Vec<NodeId>> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        for node in &self.nodes {
            let mut deps: Vec<NodeId> = node.dependencies().collect();
            deps.sort_unstable();
            deps.dedup();
            indegree[node.id] = deps.len();
            for p in deps {
                children[p].push(node.id);
            }
        }

        let mut ready: BinaryHeap<Reverse<NodeId>> = (0..n)
            .filter(|&id| indegree[id] == 0)
            .map(Reverse)
            .collect();
        let mut sorted = Vec::with_capacity(n);
        while let Some(Reverse(id)) = ready.pop() {
            sorted.push(id);
            for &c in &children[id] {
                indegree[c] -= 1;
                if indegree[c] == 0 {
                    ready.push(Reverse(c));
                }
            }
        }

        if sorted.len() < n {
            let nodes = (0..n)
                .filter(|&id| indegree[id] > 0)
                .map(|id| self.nodes[id].name.clone())
                .collect();
            return Err(Error::CycleDetected { nodes });
        }
        Ok(sorted)
    }

    /// Compute the dimension of `id`, validate it, and evaluate it when its parents are fixed.
    fn resolve_node(
        &self,
        id: NodeId,
        dims: &mut [Vec<usize>],
        values: &mut [Option<Vec<f64>>],
    ) -> Result<()> {
        let node = &self.nodes[id];
        let name = || node.name.clone();
        let param_dims: Vec<&[usize]> = node.parents.iter().map(|&p| dims[p].as_slice()).collect();

        match &node.kind {
            NodeKind::Constant => Ok(()),
            NodeKind::Logical(function) => {
                if !function.check_param_dims(&param_dims) {
                    return Err(Error::DimensionMismatch {
                        node: name(),
                        message: format!("{} cannot take arguments of dimension {:?}", function.name(), param_dims),
                    });
                }
                let dim = function.dim(&param_dims);
                let value = match fixed_params(&node.parents, dims, values) {
                    Some(params) => {
                        if !function.check_param_values(&params) {
                            return Err(Error::InvalidParameter {
                                node: name(),
                                message: format!("arguments out of the domain of {}", function.name()),
                            });
                        }
                        let v = function
                            .eval(&params)
                            .map_err(|message| Error::Evaluation { node: name(), message })?;
                        if v.len() != dim_len(&dim) {
                            return Err(Error::DimensionMismatch {
                                node: name(),
                                message: format!("{} returned {} values, expected {:?}", function.name(), v.len(), dim),
                            });
                        }
                        Some(v)
                    }
                    None => None,
                };
                dims[id] = dim;
                values[id] = value;
                Ok(())
            }
            NodeKind::Stochastic(stochastic) => {
                let dist = &stochastic.distribution;
                if !dist.check_param_dims(&param_dims) {
                    return Err(Error::DimensionMismatch {
                        node: name(),
                        message: format!("{} cannot take parameters of dimension {:?}", dist.name(), param_dims),
                    });
                }
                let dim = dist.dim(&param_dims);
                if stochastic.is_bounded() {
                    let scalar_bounds = [stochastic.lower, stochastic.upper]
                        .into_iter()
                        .flatten()
                        .all(|b| dim_len(&dims[b]) == 1);
                    if dim_len(&dim) != 1 || !scalar_bounds {
                        return Err(Error::DimensionMismatch {
                            node: name(),
                            message: "truncation requires a scalar node and scalar bounds".to_string(),
                        });
                    }
                }
                if let Some(observed) = values[id].as_deref() {
                    if observed.len() != dim_len(&dim) {
                        return Err(Error::DimensionMismatch {
                            node: name(),
                            message: format!("observed {} values, expected {:?}", observed.len(), dim),
                        });
                    }
                }
                if let Some(params) = fixed_params(&node.parents, dims, values) {
                    dist.check_param_values(&params)
                        .map_err(|message| Error::InvalidParameter { node: name(), message })?;
                    let lower = fixed_bound(stochastic.lower, values);
                    let upper = fixed_bound(stochastic.upper, values);
                    if let (Some(observed), Some(lower), Some(upper)) = (values[id].as_deref(), lower, upper) {
                        let lp = dist
                            .log_density(observed, &params, Bounds { lower, upper })
                            .map_err(|message| Error::InvalidObservation { node: name(), message })?;
                        if lp.is_nan() || lp == f64::NEG_INFINITY {
                            return Err(Error::InvalidObservation {
                                node: name(),
                                message: format!("value {:?} is outside the support of {}", observed, dist.name()),
                            });
                        }
                    }
                }
                dims[id] = dim;
                Ok(())
            }
        }
    }

    /// Recompute the fixed logical values after observations changed, then commit `values`.
    pub(super) fn refresh_fixed_values(&mut self, mut values: Vec<Option<Vec<f64>>>) -> Result<()> {
        for node in &self.nodes {
            if node.is_logical() {
                values[node.id] = None;
            }
        }
        let mut dims = self.dims.clone();
        for &id in &self.sorted {
            self.resolve_node(id, &mut dims, &mut values)?;
        }
        let fixed = values.iter().filter(|v| v.is_some()).count();
        debug!(fixed, "fixed values refreshed");
        self.values = values;
        Ok(())
    }
}
