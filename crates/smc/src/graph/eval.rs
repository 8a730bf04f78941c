use rand::RngCore;

use super::{Graph, Node, NodeId, NodeVisitor, StochasticNode};
use crate::catalog::{Bounds, Function, ParamRef};
use crate::error::{Error, Result};
use crate::particle::Particle;

/// Draws a fresh value: evaluates logical nodes, samples stochastic nodes from their prior.
struct ValueDraw<'a> {
    graph: &'a Graph,
    particle: &'a Particle,
    rng: &'a mut dyn RngCore,
}

impl NodeVisitor for ValueDraw<'_> {
    type Output = Result<Vec<f64>>;

    fn visit_constant(&mut self, node: &Node) -> Self::Output {
        self.graph
            .fixed_value(node.id)
            .map(|v| v.to_vec())
            .ok_or_else(|| Error::MissingValue {
                node: node.name.clone(),
            })
    }

    fn visit_logical(&mut self, node: &Node, function: &dyn Function) -> Self::Output {
        let params = self.graph.param_values(node, self.particle)?;
        function.eval(&params).map_err(|message| Error::Evaluation {
            node: node.name.clone(),
            message,
        })
    }

    fn visit_stochastic(&mut self, node: &Node, stochastic: &StochasticNode) -> Self::Output {
        let params = self.graph.param_values(node, self.particle)?;
        let bounds = self.graph.bounds(stochastic, self.particle)?;
        stochastic
            .distribution
            .sample(&params, bounds, &mut *self.rng)
            .map_err(|message| Error::numerical(&node.name, message))
    }
}

impl Graph {
    /// Current value of `id`: the fixed value if any, else the particle's.
    pub fn value<'a>(&'a self, id: NodeId, particle: &'a Particle) -> Option<&'a [f64]> {
        self.values
            .get(id)
            .and_then(|v| v.as_deref())
            .or_else(|| particle.get(id))
    }

    pub(crate) fn require_value<'a>(&'a self, id: NodeId, particle: &'a Particle) -> Result<&'a [f64]> {
        self.value(id, particle).ok_or_else(|| Error::MissingValue {
            node: self.name(id).to_string(),
        })
    }

    /// Parameter values of `node` as seen by `particle`.
    pub fn param_values<'a>(&'a self, node: &Node, particle: &'a Particle) -> Result<Vec<ParamRef<'a>>> {
        node.parents
            .iter()
            .map(|&p| Ok(ParamRef::new(self.require_value(p, particle)?, &self.dims[p])))
            .collect()
    }

    /// Evaluated truncation bounds of a stochastic node.
    pub fn bounds(&self, stochastic: &StochasticNode, particle: &Particle) -> Result<Bounds> {
        let bound = |id: Option<NodeId>| -> Result<Option<f64>> {
            match id {
                Some(b) => Ok(self.require_value(b, particle)?.first().copied()),
                None => Ok(None),
            }
        };
        Ok(Bounds {
            lower: bound(stochastic.lower)?,
            upper: bound(stochastic.upper)?,
        })
    }

    pub fn evaluate_logical(&self, id: NodeId, particle: &Particle) -> Result<Vec<f64>> {
        let node = self.node(id)?;
        match &node.kind {
            super::NodeKind::Logical(function) => {
                let params = self.param_values(node, particle)?;
                function.eval(&params).map_err(|message| Error::Evaluation {
                    node: node.name.clone(),
                    message,
                })
            }
            _ => Err(Error::Unsupported(format!("{} is not a logical node", node.name))),
        }
    }

    /// A new value for `id` without writing it anywhere.
    pub fn draw_value(&self, id: NodeId, particle: &Particle, rng: &mut dyn RngCore) -> Result<Vec<f64>> {
        self.visit_node(
            id,
            &mut ValueDraw {
                graph: self,
                particle,
                rng,
            },
        )?
    }

    /// Evaluate or sample node `id` into `particle`.
    ///
    /// Nodes with a fixed value are left alone, as are nodes the particle already holds unless
    /// `force` is set.
    pub fn sample_value(&self, id: NodeId, particle: &mut Particle, rng: &mut dyn RngCore, force: bool) -> Result<()> {
        if self.is_fixed(id) || (particle.is_set(id) && !force) {
            return Ok(());
        }
        let value = self.draw_value(id, particle, rng)?;
        particle.set(id, value);
        Ok(())
    }

    /// Log prior density of stochastic node `id` at its current value.
    pub fn log_prior_density(&self, id: NodeId, particle: &Particle) -> Result<f64> {
        let node = self.node(id)?;
        let stochastic = node
            .stochastic()
            .ok_or_else(|| Error::Unsupported(format!("{} is not a stochastic node", node.name)))?;
        let x = self.require_value(id, particle)?;
        let params = self.param_values(node, particle)?;
        let bounds = self.bounds(stochastic, particle)?;
        stochastic
            .distribution
            .log_density(x, &params, bounds)
            .map_err(|message| Error::numerical(&node.name, message))
    }

    /// Sum of the log densities of `children` at their observed values.
    pub fn log_likelihood(&self, children: &[NodeId], particle: &Particle) -> Result<f64> {
        let mut total = 0.0;
        for &c in children {
            total += self.log_prior_density(c, particle)?;
        }
        Ok(total)
    }

    /// Observed stochastic children of `id` whose unobserved stochastic parents are all
    /// sampled, `id` itself counting as sampled.
    pub fn likelihood_children(&self, id: NodeId, sampled: impl Fn(NodeId) -> bool) -> Vec<NodeId> {
        self.stochastic_children[id]
            .iter()
            .copied()
            .filter(|&c| self.observed[c])
            .filter(|&c| {
                self.stochastic_parents[c]
                    .iter()
                    .all(|&p| p == id || self.observed[p] || sampled(p))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::catalog::Catalog;
    use crate::graph::Graph;
    use crate::particle::Particle;

    fn chain() -> (Graph, [usize; 4]) {
        let cat = Catalog::builtin();
        let dnorm = cat.distribution("dnorm").unwrap();
        let mut g = Graph::new();
        let zero = g.add_constant_node("zero", vec![1], vec![0.0]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let x0 = g
            .add_stochastic_node("x0", dnorm.clone(), vec![zero, one], None, None, None)
            .unwrap();
        let x1 = g
            .add_stochastic_node("x1", dnorm.clone(), vec![x0, one], None, None, None)
            .unwrap();
        let y0 = g
            .add_stochastic_node("y0", dnorm.clone(), vec![x0, one], Some(vec![0.5]), None, None)
            .unwrap();
        let sum = g.add_logical_node("s", cat.function("+").unwrap(), vec![x0, x1]).unwrap();
        let y1 = g
            .add_stochastic_node("y1", dnorm, vec![sum, one], Some(vec![1.0]), None, None)
            .unwrap();
        g.build().unwrap();
        (g, [x0, x1, y0, y1])
    }

    #[test]
    fn test_likelihood_children() {
        let (g, [x0, x1, y0, y1]) = chain();
        assert_eq!(g.likelihood_children(x0, |_| false), vec![y0]);
        assert_eq!(g.likelihood_children(x1, |p| p == x0), vec![y1]);
        assert_eq!(g.likelihood_children(x0, |p| p == x1), vec![y0, y1]);
    }

    #[test]
    fn test_sample_and_density() {
        let (g, [x0, x1, _, y1]) = chain();
        let mut rng = StdRng::seed_from_u64(42);
        let mut particle = Particle::new(g.len());
        g.sample_value(x0, &mut particle, &mut rng, false).unwrap();
        let first = particle.get(x0).unwrap().to_vec();
        g.sample_value(x0, &mut particle, &mut rng, false).unwrap();
        assert_eq!(particle.get(x0).unwrap(), &first[..]);
        g.sample_value(x1, &mut particle, &mut rng, false).unwrap();

        // y1 needs the logical sum first
        assert!(g.log_prior_density(y1, &particle).is_err());
        let s = g.node_by_name("s").unwrap();
        g.sample_value(s, &mut particle, &mut rng, false).unwrap();
        let expected = particle.get(x0).unwrap()[0] + particle.get(x1).unwrap()[0];
        assert_eq!(particle.get(s).unwrap(), &[expected][..]);
        assert!(g.log_prior_density(y1, &particle).unwrap().is_finite());
    }
}
