//! Knownness and linearity of nodes relative to the node being sampled, and the affine maps
//! the linear-Gaussian samplers are built on.

use std::collections::HashMap;

use crate::catalog::{Affine, Function, LinearTerm, ParamRef};
use crate::error::{Error, Result};
use crate::graph::{Graph, Node, NodeId, NodeVisitor, StochasticNode};
use crate::particle::Particle;
use crate::utils::dim_len;

/// How a node's value depends on the target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Does not depend on the target.
    Known,
    /// Affine in the target.
    Linear,
    Nonlinear,
}

/// Memoized relations of nodes to one target node.
#[derive(Debug, Clone)]
pub struct Dependence {
    target: NodeId,
    memo: HashMap<NodeId, Relation>,
}

impl Dependence {
    pub fn new(target: NodeId) -> Self {
        Self {
            target,
            memo: HashMap::new(),
        }
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Relation of `id` to the target.
    ///
    /// Nodes ranked no deeper than the target cannot descend from it and are known without
    /// further traversal.
    pub fn classify(&mut self, graph: &Graph, id: NodeId) -> Relation {
        if id == self.target {
            return Relation::Linear;
        }
        if let Some(&relation) = self.memo.get(&id) {
            return relation;
        }
        let relation = if graph.is_fixed(id) || graph.rank(id) <= graph.rank(self.target) {
            Relation::Known
        } else {
            graph
                .visit_node(id, &mut Classify { graph, dependence: self })
                .unwrap_or(Relation::Nonlinear)
        };
        self.memo.insert(id, relation);
        relation
    }

    pub fn is_known(&mut self, graph: &Graph, id: NodeId) -> bool {
        self.classify(graph, id) == Relation::Known
    }

    pub fn is_linear(&mut self, graph: &Graph, id: NodeId) -> bool {
        self.classify(graph, id) == Relation::Linear
    }

    fn relation(&self, id: NodeId) -> Relation {
        if id == self.target {
            Relation::Linear
        } else {
            self.memo.get(&id).copied().unwrap_or(Relation::Known)
        }
    }

    /// Affine map from the target's value to the value of `id` for `particle`.
    pub fn affine_map(&self, graph: &Graph, id: NodeId, particle: &Particle) -> Result<Affine> {
        let d = dim_len(graph.dim(self.target));
        let term = graph.visit_node(
            id,
            &mut AffineExtraction {
                graph,
                particle,
                dependence: self,
            },
        )??;
        Ok(match term {
            LinearTerm::Known(p) => Affine::constant(p.value, d),
            LinearTerm::Affine(a) => a,
        })
    }
}

struct Classify<'a> {
    graph: &'a Graph,
    dependence: &'a mut Dependence,
}

impl NodeVisitor for Classify<'_> {
    type Output = Relation;

    fn visit_constant(&mut self, _node: &Node) -> Relation {
        Relation::Known
    }

    fn visit_logical(&mut self, node: &Node, function: &dyn Function) -> Relation {
        let mut linear = Vec::with_capacity(node.parents.len());
        for &p in &node.parents {
            match self.dependence.classify(self.graph, p) {
                Relation::Nonlinear => return Relation::Nonlinear,
                relation => linear.push(relation == Relation::Linear),
            }
        }
        if !linear.iter().any(|&l| l) {
            Relation::Known
        } else if function.is_linear(&linear) {
            Relation::Linear
        } else {
            Relation::Nonlinear
        }
    }

    /// Stochastic nodes other than the target are sampled on their own.
    fn visit_stochastic(&mut self, _node: &Node, _stochastic: &StochasticNode) -> Relation {
        Relation::Known
    }
}

struct AffineExtraction<'a, 'd> {
    graph: &'a Graph,
    particle: &'a Particle,
    dependence: &'d Dependence,
}

impl<'a> AffineExtraction<'a, '_> {
    fn known(&self, node: &Node) -> Result<LinearTerm<'a>> {
        let value = self.graph.require_value(node.id, self.particle)?;
        Ok(LinearTerm::Known(ParamRef::new(value, self.graph.dim(node.id))))
    }
}

impl<'a> NodeVisitor for AffineExtraction<'a, '_> {
    type Output = Result<LinearTerm<'a>>;

    fn visit_constant(&mut self, node: &Node) -> Self::Output {
        self.known(node)
    }

    fn visit_logical(&mut self, node: &Node, function: &dyn Function) -> Self::Output {
        match self.dependence.relation(node.id) {
            Relation::Known => self.known(node),
            Relation::Nonlinear => Err(Error::numerical(&node.name, "not linear in the sampled node")),
            Relation::Linear => {
                let graph = self.graph;
                let mut terms = Vec::with_capacity(node.parents.len());
                for &p in &node.parents {
                    terms.push(graph.visit_node(p, self)??);
                }
                let dims: Vec<&[usize]> = node.parents.iter().map(|&p| graph.dim(p)).collect();
                function
                    .linear_transform(&terms, &dims)
                    .map(LinearTerm::Affine)
                    .map_err(|message| Error::numerical(&node.name, message))
            }
        }
    }

    fn visit_stochastic(&mut self, node: &Node, _stochastic: &StochasticNode) -> Self::Output {
        if node.id == self.dependence.target {
            Ok(LinearTerm::Affine(Affine::identity(dim_len(self.graph.dim(node.id)))))
        } else {
            self.known(node)
        }
    }
}
