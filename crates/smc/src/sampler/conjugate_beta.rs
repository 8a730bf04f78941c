//! Beta prior with binomial or Bernoulli observations of the node itself.

use rand::RngCore;
use statrs::distribution::Beta;
use statrs::function::beta::ln_beta;
use statrs::function::factorial::ln_binomial;

use super::conjugacy::Dependence;
use super::{IterationPlan, NodeSampler, NodeSamplerFactory};
use crate::catalog::distribution::as_count;
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::particle::Particle;

fn distribution_name(graph: &Graph, id: NodeId) -> Option<&str> {
    graph
        .node(id)
        .ok()
        .and_then(|n| n.stochastic())
        .filter(|s| !s.is_bounded())
        .map(|s| s.distribution.name())
}

fn check(graph: &Graph, plan: &IterationPlan) -> bool {
    if distribution_name(graph, plan.node) != Some("dbeta") || plan.likelihood_children.is_empty() {
        return false;
    }
    let mut dependence = Dependence::new(plan.node);
    plan.likelihood_children.iter().all(|&c| {
        let parents = &graph.nodes()[c].parents;
        match distribution_name(graph, c) {
            Some("dbin") => parents[0] == plan.node && dependence.is_known(graph, parents[1]),
            Some("dbern") => parents[0] == plan.node,
            _ => false,
        }
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateBetaFactory;

impl NodeSamplerFactory for ConjugateBetaFactory {
    fn name(&self) -> &str {
        "conjugate_beta"
    }

    fn can_sample(&self, graph: &Graph, plan: &IterationPlan) -> bool {
        check(graph, plan)
    }

    fn create(&self, graph: &Graph, plan: &IterationPlan) -> Result<Box<dyn NodeSampler>> {
        if !check(graph, plan) {
            return Err(Error::Unsupported(format!(
                "{} cannot sample {}",
                self.name(),
                graph.name(plan.node)
            )));
        }
        Ok(Box::new(ConjugateBeta))
    }
}

/// Adds successes and failures to the prior shapes and weights by the beta-binomial marginal.
#[derive(Debug, Clone, Copy)]
pub struct ConjugateBeta;

impl ConjugateBeta {
    /// Successes and trials of one observation.
    fn counts(graph: &Graph, child: NodeId, particle: &Particle) -> Result<(u64, u64)> {
        let node = graph.node(child)?;
        let y = graph.require_value(child, particle)?[0];
        let n = match node.stochastic().map(|s| s.distribution.name()) {
            Some("dbin") => graph.require_value(node.parents[1], particle)?[0],
            _ => 1.0,
        };
        match (as_count(y), as_count(n)) {
            (Some(y), Some(n)) if y <= n => Ok((y, n)),
            _ => Err(Error::numerical(
                &node.name,
                format!("observation {} is not a count of at most {}", y, n),
            )),
        }
    }
}

impl NodeSampler for ConjugateBeta {
    fn name(&self) -> &str {
        "conjugate_beta"
    }

    fn sample(
        &self,
        graph: &Graph,
        plan: &IterationPlan,
        particle: &mut Particle,
        rng: &mut dyn RngCore,
    ) -> Result<f64> {
        use rand::distributions::Distribution;

        let node = graph.node(plan.node)?;
        let a = graph.require_value(node.parents[0], particle)?[0];
        let b = graph.require_value(node.parents[1], particle)?[0];

        let mut log_weight = 0.0;
        let mut successes = 0.0;
        let mut failures = 0.0;
        for &c in &plan.likelihood_children {
            let (y, n) = Self::counts(graph, c, particle)?;
            log_weight += ln_binomial(n, y);
            successes += y as f64;
            failures += (n - y) as f64;
        }
        log_weight += ln_beta(a + successes, b + failures) - ln_beta(a, b);

        let posterior = Beta::new(a + successes, b + failures)
            .map_err(|e| Error::numerical(&node.name, format!("posterior shapes: {}", e)))?;
        let x: f64 = posterior.sample(&mut *rng);
        plan.assign(graph, particle, vec![x])?;
        Ok(log_weight)
    }
}
