//! Scalar normal prior with normal observations whose mean is the node itself or affine in it.

use rand::RngCore;
use statrs::distribution::{Continuous, Normal};

use super::conjugacy::Dependence;
use super::conjugate_mnormal::noise_covariance;
use super::{IterationPlan, NodeSampler, NodeSamplerFactory};
use crate::catalog::distribution::gaussian_moments;
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::particle::Particle;

const UNIVARIATE: [&str; 2] = ["dnorm", "dnormvar"];

fn is_univariate_normal(graph: &Graph, id: NodeId) -> bool {
    graph
        .node(id)
        .ok()
        .and_then(|n| n.stochastic())
        .map_or(false, |s| !s.is_bounded() && UNIVARIATE.contains(&s.distribution.name()))
}

/// Whether every likelihood child is a scalar normal with known precision whose mean is the
/// node (`linear == false`) or affine in it.
fn check(graph: &Graph, plan: &IterationPlan, linear: bool) -> Option<Dependence> {
    if !is_univariate_normal(graph, plan.node) || plan.likelihood_children.is_empty() {
        return None;
    }
    let mut dependence = Dependence::new(plan.node);
    let conjugate = plan.likelihood_children.iter().all(|&c| {
        if !is_univariate_normal(graph, c) {
            return false;
        }
        let parents = &graph.nodes()[c].parents;
        let mean_ok = if linear {
            dependence.is_linear(graph, parents[0])
        } else {
            parents[0] == plan.node
        };
        mean_ok && dependence.is_known(graph, parents[1])
    });
    conjugate.then_some(dependence)
}

#[derive(Debug, Clone)]
pub struct ConjugateNormalFactory {
    linear: bool,
}

impl ConjugateNormalFactory {
    /// Observations centred on the node itself.
    pub fn identity() -> Self {
        Self { linear: false }
    }

    /// Observations with a mean affine in the node.
    pub fn linear() -> Self {
        Self { linear: true }
    }
}

impl NodeSamplerFactory for ConjugateNormalFactory {
    fn name(&self) -> &str {
        if self.linear {
            "conjugate_normal_linear"
        } else {
            "conjugate_normal"
        }
    }

    fn can_sample(&self, graph: &Graph, plan: &IterationPlan) -> bool {
        check(graph, plan, self.linear).is_some()
    }

    fn create(&self, graph: &Graph, plan: &IterationPlan) -> Result<Box<dyn NodeSampler>> {
        let dependence = check(graph, plan, self.linear)
            .ok_or_else(|| Error::Unsupported(format!("{} cannot sample {}", self.name(), graph.name(plan.node))))?;
        Ok(Box::new(ConjugateNormal {
            linear: self.linear,
            dependence,
        }))
    }
}

/// Sequential scalar Kalman update over the likelihood children.
#[derive(Debug, Clone)]
pub struct ConjugateNormal {
    linear: bool,
    dependence: Dependence,
}

impl ConjugateNormal {
    fn moments(graph: &Graph, id: NodeId, particle: &Particle) -> Result<(f64, f64)> {
        let node = graph.node(id)?;
        let stochastic = node
            .stochastic()
            .ok_or_else(|| Error::Unsupported(format!("{} is not stochastic", node.name)))?;
        let params = graph.param_values(node, particle)?;
        let (mean, cov) = gaussian_moments(stochastic.distribution.name(), &params)
            .map_err(|message| Error::numerical(&node.name, message))?;
        Ok((mean[0], cov[(0, 0)]))
    }

    fn log_normal(node: &str, x: f64, mean: f64, var: f64) -> Result<f64> {
        let law = Normal::new(mean, var.sqrt())
            .map_err(|e| Error::numerical(node, format!("predictive variance {}: {}", var, e)))?;
        Ok(law.ln_pdf(x))
    }
}

impl NodeSampler for ConjugateNormal {
    fn name(&self) -> &str {
        if self.linear {
            "conjugate_normal_linear"
        } else {
            "conjugate_normal"
        }
    }

    fn sample(
        &self,
        graph: &Graph,
        plan: &IterationPlan,
        particle: &mut Particle,
        rng: &mut dyn RngCore,
    ) -> Result<f64> {
        use rand::distributions::Distribution;

        let name = graph.name(plan.node);
        let (mut mean, mut var) = Self::moments(graph, plan.node, particle)?;
        let mut log_weight = 0.0;
        for &c in &plan.likelihood_children {
            let y = graph.require_value(c, particle)?[0];
            let noise = noise_covariance(graph, c, particle)?[(0, 0)];
            let (a, b) = if self.linear {
                let mean_parent = graph.nodes()[c].parents[0];
                let affine = self.dependence.affine_map(graph, mean_parent, particle)?;
                (affine.coef[(0, 0)], affine.offset[0])
            } else {
                (1.0, 0.0)
            };
            let predicted = a * mean + b;
            let predicted_var = a * a * var + noise;
            log_weight += Self::log_normal(graph.name(c), y, predicted, predicted_var)?;
            let gain = a * var / predicted_var;
            mean += gain * (y - predicted);
            var *= 1.0 - gain * a;
        }

        let posterior = Normal::new(mean, var.max(0.0).sqrt())
            .map_err(|e| Error::numerical(name, format!("posterior variance {}: {}", var, e)))?;
        let x: f64 = posterior.sample(&mut *rng);
        plan.assign(graph, particle, vec![x])?;
        Ok(log_weight)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::catalog::Catalog;
    use crate::sampler::schedule;

    /// x ~ N(1, var 2); y1 ~ N(x, var 0.5) = 2.0; y2 ~ N(2 x + 1, var 1) = 4.0
    fn model() -> Graph {
        let cat = Catalog::builtin();
        let dnormvar = cat.distribution("dnormvar").unwrap();
        let mut g = Graph::new();
        let m = g.add_constant_node("m", vec![1], vec![1.0]).unwrap();
        let v = g.add_constant_node("v", vec![1], vec![2.0]).unwrap();
        let half = g.add_constant_node("half", vec![1], vec![0.5]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let two = g.add_constant_node("two", vec![1], vec![2.0]).unwrap();
        let x = g.add_stochastic_node("x", dnormvar.clone(), vec![m, v], None, None, None).unwrap();
        g.add_stochastic_node("y1", dnormvar.clone(), vec![x, half], Some(vec![2.0]), None, None)
            .unwrap();
        let two_x = g.add_logical_node("two_x", cat.function("*").unwrap(), vec![two, x]).unwrap();
        let mean2 = g.add_logical_node("mean2", cat.function("+").unwrap(), vec![two_x, one]).unwrap();
        g.add_stochastic_node("y2", dnormvar, vec![mean2, one], Some(vec![4.0]), None, None)
            .unwrap();
        g.build().unwrap();
        g
    }

    #[test]
    fn test_linear_update_matches_closed_form() {
        let g = model();
        let plans = schedule(&g).unwrap();
        let factory = ConjugateNormalFactory::linear();
        assert!(!ConjugateNormalFactory::identity().can_sample(&g, &plans[0]));
        assert!(factory.can_sample(&g, &plans[0]));
        let sampler = factory.create(&g, &plans[0]).unwrap();

        // precision form: 1/2 + 1/0.5 + 4/1 = 6.5
        let post_var = 1.0 / 6.5;
        let post_mean = post_var * (1.0 / 2.0 + 2.0 / 0.5 + 2.0 * (4.0 - 1.0) / 1.0);

        let mut rng = StdRng::seed_from_u64(11);
        let n = 20_000;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut log_weight = 0.0;
        for _ in 0..n {
            let mut particle = Particle::new(g.len());
            log_weight = sampler.sample(&g, &plans[0], &mut particle, &mut rng).unwrap();
            let x = particle.get(plans[0].node).unwrap()[0];
            sum += x;
            sum_sq += x * x;
            // mean2 is refreshed with x
            let mean2 = g.node_by_name("mean2").unwrap();
            assert!((particle.get(mean2).unwrap()[0] - (2.0 * x + 1.0)).abs() < 1e-12);
        }
        let mean = sum / n as f64;
        let var = sum_sq / n as f64 - mean * mean;
        assert!((mean - post_mean).abs() < 0.01);
        assert!((var - post_var).abs() < 0.01);

        // marginal likelihood of (y1, y2) under N([1, 3], [[2.5, 4], [4, 9]])
        let det: f64 = 2.5 * 9.0 - 16.0;
        let r = [1.0, 1.0];
        let quad = (9.0 * r[0] * r[0] - 2.0 * 4.0 * r[0] * r[1] + 2.5 * r[1] * r[1]) / det;
        let expected = -(2.0 * std::f64::consts::PI).ln() - 0.5 * det.ln() - 0.5 * quad;
        assert!((log_weight - expected).abs() < 1e-10);
    }
}
