use rand::RngCore;

use super::{IterationPlan, NodeSampler};
use crate::error::Result;
use crate::graph::Graph;
use crate::particle::Particle;

/// Draws the node from its prior; the incremental weight is the likelihood of the observations
/// the draw completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorSampler;

impl NodeSampler for PriorSampler {
    fn name(&self) -> &str {
        "prior"
    }

    fn sample(
        &self,
        graph: &Graph,
        plan: &IterationPlan,
        particle: &mut Particle,
        rng: &mut dyn RngCore,
    ) -> Result<f64> {
        let value = graph.draw_value(plan.node, particle, rng)?;
        plan.assign(graph, particle, value)?;
        plan.log_likelihood(graph, particle)
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

    #[test]
    fn test_weight_is_likelihood_at_draw() {
        let cat = Catalog::builtin();
        let dnorm = cat.distribution("dnorm").unwrap();
        let mut g = Graph::new();
        let zero = g.add_constant_node("zero", vec![1], vec![0.0]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let x = g.add_stochastic_node("x", dnorm.clone(), vec![zero, one], None, None, None).unwrap();
        let ex = g.add_logical_node("ex", cat.function("exp").unwrap(), vec![x]).unwrap();
        g.add_stochastic_node("y", dnorm, vec![ex, one], Some(vec![1.2]), None, None)
            .unwrap();
        g.build().unwrap();

        let plans = schedule(&g).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let mut particle = Particle::new(g.len());
            let lw = PriorSampler.sample(&g, &plans[0], &mut particle, &mut rng).unwrap();
            let v = particle.get(x).unwrap()[0];
            assert_eq!(particle.get(ex).unwrap()[0], v.exp());
            let expected = Normal::new(v.exp(), 1.0).unwrap().ln_pdf(1.2);
            assert!((lw - expected).abs() < 1e-12);
        }
    }
}
