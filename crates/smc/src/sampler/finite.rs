//! Exact sampling of a discrete scalar node with a finite support by enumeration.

use rand::distributions::{Distribution as _, WeightedIndex};
use rand::RngCore;

use super::{IterationPlan, NodeSampler, NodeSamplerFactory};
use crate::catalog::ParamRef;
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::particle::Particle;
use crate::utils::{dim_len, logsumexp};

/// Support bounds of `id` read from fixed parameter values, zeros standing in for the rest.
fn support_template(graph: &Graph, id: NodeId) -> Option<(i64, i64)> {
    let node = graph.node(id).ok()?;
    let stochastic = node.stochastic()?;
    let placeholders: Vec<Vec<f64>> = node
        .parents
        .iter()
        .map(|&p| vec![0.0; dim_len(graph.dim(p))])
        .collect();
    let params: Vec<ParamRef> = node
        .parents
        .iter()
        .zip(&placeholders)
        .map(|(&p, zeros)| ParamRef::new(graph.fixed_value(p).unwrap_or(zeros), graph.dim(p)))
        .collect();
    stochastic.distribution.finite_support(&params)
}

#[derive(Debug, Clone)]
pub struct FiniteFactory {
    /// Largest support enumerated.
    pub max_support: usize,
}

impl Default for FiniteFactory {
    fn default() -> Self {
        Self { max_support: 1000 }
    }
}

impl FiniteFactory {
    fn check(&self, graph: &Graph, plan: &IterationPlan) -> bool {
        let Ok(node) = graph.node(plan.node) else {
            return false;
        };
        let Some(stochastic) = node.stochastic() else {
            return false;
        };
        let fixed: Vec<bool> = node.parents.iter().map(|&p| graph.is_fixed(p)).collect();
        if plan.likelihood_children.is_empty()
            || !graph.is_discrete(plan.node)
            || dim_len(graph.dim(plan.node)) != 1
            || !stochastic.distribution.is_support_fixed(&fixed)
        {
            return false;
        }
        match support_template(graph, plan.node) {
            Some((lo, hi)) => hi >= lo && ((hi - lo) as usize) < self.max_support,
            None => false,
        }
    }
}

impl NodeSamplerFactory for FiniteFactory {
    fn name(&self) -> &str {
        "finite"
    }

    fn can_sample(&self, graph: &Graph, plan: &IterationPlan) -> bool {
        self.check(graph, plan)
    }

    fn create(&self, graph: &Graph, plan: &IterationPlan) -> Result<Box<dyn NodeSampler>> {
        if !self.check(graph, plan) {
            return Err(Error::Unsupported(format!(
                "{} cannot sample {}",
                self.name(),
                graph.name(plan.node)
            )));
        }
        Ok(Box::new(FiniteSampler))
    }
}

/// Evaluates prior times likelihood at every support point and draws from the normalized
/// result; the incremental weight is the log of the unnormalized total.
#[derive(Debug, Clone, Copy)]
pub struct FiniteSampler;

impl FiniteSampler {
    fn support(graph: &Graph, id: NodeId, particle: &Particle) -> Result<(i64, i64)> {
        let node = graph.node(id)?;
        let stochastic = node
            .stochastic()
            .ok_or_else(|| Error::Unsupported(format!("{} is not stochastic", node.name)))?;
        let params = graph.param_values(node, particle)?;
        let (mut lo, mut hi) = stochastic
            .distribution
            .finite_support(&params)
            .ok_or_else(|| Error::numerical(&node.name, "support is not finite"))?;
        let bounds = graph.bounds(stochastic, particle)?;
        if let Some(l) = bounds.lower {
            lo = lo.max(l.ceil() as i64);
        }
        if let Some(u) = bounds.upper {
            hi = hi.min(u.floor() as i64);
        }
        Ok((lo, hi))
    }
}

impl NodeSampler for FiniteSampler {
    fn name(&self) -> &str {
        "finite"
    }

    fn sample(
        &self,
        graph: &Graph,
        plan: &IterationPlan,
        particle: &mut Particle,
        rng: &mut dyn RngCore,
    ) -> Result<f64> {
        let name = graph.name(plan.node);
        let (lo, hi) = Self::support(graph, plan.node, particle)?;
        if hi < lo {
            return Err(Error::numerical(name, "empty support within bounds"));
        }

        let mut log_probs = Vec::with_capacity((hi - lo + 1) as usize);
        for k in lo..=hi {
            plan.assign(graph, particle, vec![k as f64])?;
            let lp = graph.log_prior_density(plan.node, particle)? + plan.log_likelihood(graph, particle)?;
            log_probs.push(if lp.is_nan() { f64::NEG_INFINITY } else { lp });
        }
        let total = logsumexp(&log_probs);
        if !total.is_finite() {
            return Err(Error::numerical(name, "every support point has zero posterior mass"));
        }

        let probs: Vec<f64> = log_probs.iter().map(|lp| (lp - total).exp()).collect();
        let index = WeightedIndex::new(&probs).map_err(|e| Error::numerical(name, e.to_string()))?;
        let k = lo + index.sample(&mut *rng) as i64;
        plan.assign(graph, particle, vec![k as f64])?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use statrs::distribution::{Continuous, Normal};

    use super::*;
    use crate::catalog::Catalog;
    use crate::sampler::schedule;

    /// z ~ dcat([0.2, 0.5, 0.3]); y ~ N(z, var 1) = 2.6
    fn mixture() -> (Graph, NodeId) {
        let cat = Catalog::builtin();
        let mut g = Graph::new();
        let pi = g.add_constant_node("pi", vec![3], vec![0.2, 0.5, 0.3]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let z = g
            .add_stochastic_node("z", cat.distribution("dcat").unwrap(), vec![pi], None, None, None)
            .unwrap();
        g.add_stochastic_node("y", cat.distribution("dnormvar").unwrap(), vec![z, one], Some(vec![2.6]), None, None)
            .unwrap();
        g.build().unwrap();
        (g, z)
    }

    #[test]
    fn test_enumerated_posterior() {
        let (g, z) = mixture();
        let plans = schedule(&g).unwrap();
        let factory = FiniteFactory::default();
        assert!(factory.can_sample(&g, &plans[0]));
        let sampler = factory.create(&g, &plans[0]).unwrap();

        let prior = [0.2, 0.5, 0.3];
        let joint: Vec<f64> = (1..=3)
            .map(|k| prior[k - 1] * Normal::new(k as f64, 1.0).unwrap().pdf(2.6))
            .collect();
        let evidence: f64 = joint.iter().sum();

        let mut rng = StdRng::seed_from_u64(23);
        let runs = 30_000;
        let mut counts = [0usize; 3];
        for _ in 0..runs {
            let mut particle = Particle::new(g.len());
            let lw = sampler.sample(&g, &plans[0], &mut particle, &mut rng).unwrap();
            assert!((lw - evidence.ln()).abs() < 1e-10);
            counts[particle.get(z).unwrap()[0] as usize - 1] += 1;
        }
        for k in 0..3 {
            let freq = counts[k] as f64 / runs as f64;
            assert!((freq - joint[k] / evidence).abs() < 0.01);
        }
    }

    #[test]
    fn test_unbounded_count_is_not_enumerated() {
        let cat = Catalog::builtin();
        let mut g = Graph::new();
        let rate = g.add_constant_node("rate", vec![1], vec![3.0]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let k = g
            .add_stochastic_node("k", cat.distribution("dpois").unwrap(), vec![rate], None, None, None)
            .unwrap();
        g.add_stochastic_node("y", cat.distribution("dnorm").unwrap(), vec![k, one], Some(vec![2.0]), None, None)
            .unwrap();
        g.build().unwrap();
        let plans = schedule(&g).unwrap();
        assert!(!FiniteFactory::default().can_sample(&g, &plans[0]));
    }
}
