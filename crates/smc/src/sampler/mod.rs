//! Node samplers and the ordered registry that picks one per iteration.
//!
//! The forward sampler visits the unobserved stochastic nodes in topological order; each visit
//! is described by an [`IterationPlan`]. For every plan the first [`NodeSamplerFactory`] of the
//! [`SamplerRegistry`] that accepts it creates the [`NodeSampler`] used for the whole run, and
//! the [`PriorSampler`] is used when none does.

mod conjugacy;
mod conjugate_beta;
mod conjugate_mnormal;
mod conjugate_normal;
mod finite;
mod prior;

use std::fmt::Debug;
use std::sync::Arc;

use rand::RngCore;
use tracing::{debug, warn};

use crate::error::Result;
use crate::graph::{Graph, NodeId};
use crate::particle::Particle;

pub use conjugacy::{Dependence, Relation};
pub use conjugate_beta::ConjugateBetaFactory;
pub use conjugate_mnormal::{gaussian_update, ConjugateMNormalFactory, GaussianObservation, GaussianPosterior};
pub use conjugate_normal::ConjugateNormalFactory;
pub use finite::FiniteFactory;
pub use prior::PriorSampler;

/// One forward iteration: the node sampled, the observations it completes, and the logical
/// nodes that become computable once it has a value.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationPlan {
    pub iteration: usize,
    pub node: NodeId,
    pub likelihood_children: Vec<NodeId>,
    pub logical_updates: Vec<NodeId>,
}

impl IterationPlan {
    /// Write the sampled value and evaluate the logical nodes that depend on it.
    pub fn assign(&self, graph: &Graph, particle: &mut Particle, value: Vec<f64>) -> Result<()> {
        particle.set(self.node, value);
        self.propagate(graph, particle)
    }

    pub fn propagate(&self, graph: &Graph, particle: &mut Particle) -> Result<()> {
        for &id in &self.logical_updates {
            let value = graph.evaluate_logical(id, particle)?;
            particle.set(id, value);
        }
        Ok(())
    }

    pub fn log_likelihood(&self, graph: &Graph, particle: &Particle) -> Result<f64> {
        graph.log_likelihood(&self.likelihood_children, particle)
    }
}

/// Iteration plans of a built graph, one per unobserved stochastic node in topological order.
pub fn schedule(graph: &Graph) -> Result<Vec<IterationPlan>> {
    graph.require_built()?;
    let order = graph.unobserved_stochastic_nodes();
    let mut position = vec![None; graph.len()];
    for (t, &id) in order.iter().enumerate() {
        position[id] = Some(t);
    }

    let mut plans: Vec<IterationPlan> = order
        .iter()
        .enumerate()
        .map(|(t, &id)| IterationPlan {
            iteration: t,
            node: id,
            likelihood_children: graph.likelihood_children(id, |p| position[p].map_or(false, |q| q < t)),
            logical_updates: Vec::new(),
        })
        .collect();

    for &id in graph.sorted_nodes()? {
        if !graph.node(id)?.is_logical() || graph.is_fixed(id) {
            continue;
        }
        let last = graph
            .stochastic_parents(id)
            .iter()
            .filter_map(|&p| position[p])
            .max();
        if let Some(t) = last {
            plans[t].logical_updates.push(id);
        }
    }
    Ok(plans)
}

/// Samples one node for one particle and returns the log incremental weight.
pub trait NodeSampler: Debug {
    fn name(&self) -> &str;

    fn sample(
        &self,
        graph: &Graph,
        plan: &IterationPlan,
        particle: &mut Particle,
        rng: &mut dyn RngCore,
    ) -> Result<f64>;
}

/// Decides once per plan whether its sampler applies, and creates it.
pub trait NodeSamplerFactory: Debug {
    fn name(&self) -> &str;

    fn can_sample(&self, graph: &Graph, plan: &IterationPlan) -> bool;

    fn create(&self, graph: &Graph, plan: &IterationPlan) -> Result<Box<dyn NodeSampler>>;
}

/// Ordered list of sampler factories; the first one accepting a plan wins.
#[derive(Debug, Clone)]
pub struct SamplerRegistry {
    factories: Vec<Arc<dyn NodeSamplerFactory>>,
}

impl Default for SamplerRegistry {
    fn default() -> Self {
        Self {
            factories: vec![
                Arc::new(ConjugateNormalFactory::identity()),
                Arc::new(ConjugateNormalFactory::linear()),
                Arc::new(ConjugateMNormalFactory::identity()),
                Arc::new(ConjugateMNormalFactory::linear()),
                Arc::new(ConjugateBetaFactory),
                Arc::new(FiniteFactory::default()),
            ],
        }
    }
}

impl SamplerRegistry {
    /// A registry without factories: every node falls back to prior sampling.
    pub fn empty() -> Self {
        Self { factories: Vec::new() }
    }

    pub fn push(&mut self, factory: Arc<dyn NodeSamplerFactory>) {
        self.factories.push(factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    /// Sampler for `plan`, or the prior sampler when `prior_only` or nothing applies.
    pub fn select(&self, graph: &Graph, plan: &IterationPlan, prior_only: bool) -> Box<dyn NodeSampler> {
        if !prior_only {
            for factory in &self.factories {
                if !factory.can_sample(graph, plan) {
                    continue;
                }
                match factory.create(graph, plan) {
                    Ok(sampler) => {
                        debug!(node = graph.name(plan.node), sampler = sampler.name(), "sampler selected");
                        return sampler;
                    }
                    Err(e) => warn!(
                        node = graph.name(plan.node),
                        factory = factory.name(),
                        error = %e,
                        "sampler creation failed, trying the next factory"
                    ),
                }
            }
        }
        Box::new(PriorSampler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_schedule_assigns_observations_and_logicals() {
        let cat = Catalog::builtin();
        let dnorm = cat.distribution("dnorm").unwrap();
        let mut g = Graph::new();
        let zero = g.add_constant_node("zero", vec![1], vec![0.0]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let a = g.add_stochastic_node("a", dnorm.clone(), vec![zero, one], None, None, None).unwrap();
        let b = g.add_stochastic_node("b", dnorm.clone(), vec![zero, one], None, None, None).unwrap();
        let ab = g.add_logical_node("ab", cat.function("+").unwrap(), vec![a, b]).unwrap();
        let ya = g
            .add_stochastic_node("ya", dnorm.clone(), vec![a, one], Some(vec![0.1]), None, None)
            .unwrap();
        let yab = g
            .add_stochastic_node("yab", dnorm, vec![ab, one], Some(vec![0.2]), None, None)
            .unwrap();
        g.build().unwrap();

        let plans = schedule(&g).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].node, a);
        assert_eq!(plans[0].likelihood_children, vec![ya]);
        assert!(plans[0].logical_updates.is_empty());
        assert_eq!(plans[1].node, b);
        assert_eq!(plans[1].likelihood_children, vec![yab]);
        assert_eq!(plans[1].logical_updates, vec![ab]);
    }

    #[test]
    fn test_registry_order_and_prior_fallback() {
        let cat = Catalog::builtin();
        let mut g = Graph::new();
        let zero = g.add_constant_node("zero", vec![1], vec![0.0]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let x = g
            .add_stochastic_node("x", cat.distribution("dnorm").unwrap(), vec![zero, one], None, None, None)
            .unwrap();
        let ex = g.add_logical_node("ex", cat.function("exp").unwrap(), vec![x]).unwrap();
        let y = g
            .add_stochastic_node("y", cat.distribution("dnorm").unwrap(), vec![x, one], Some(vec![0.3]), None, None)
            .unwrap();
        let z = g
            .add_stochastic_node("z", cat.distribution("dnorm").unwrap(), vec![ex, one], None, None, None)
            .unwrap();
        g.build().unwrap();
        let _ = (y, z);

        let plans = schedule(&g).unwrap();
        let registry = SamplerRegistry::default();
        assert_eq!(registry.select(&g, &plans[0], false).name(), "conjugate_normal");
        assert_eq!(registry.select(&g, &plans[0], true).name(), "prior");
        // z has no likelihood children
        assert_eq!(registry.select(&g, &plans[1], false).name(), "prior");
        assert_eq!(SamplerRegistry::empty().select(&g, &plans[0], false).name(), "prior");
        assert_eq!(registry.names()[0], "conjugate_normal");
    }
}
