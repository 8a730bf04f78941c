//! Multivariate normal prior with linear-Gaussian observations (Kalman update).
//!
//! All likelihood children are stacked into one observation `y = A x + b + ε`, `ε ~ N(0, R)`
//! and the prior `N(μ0, P0)` is updated in one step:
//!
//! ```text
//! S = A P0 Aᵀ + R
//! K = P0 Aᵀ S⁻¹
//! μ = μ0 + K (y − A μ0 − b)
//! P = (I − K A) P0
//! ```
//!
//! The incremental weight is the predictive density `log N(y; A μ0 + b, S)`.

use nalgebra::{DMatrix, DVector};
use rand::RngCore;

use super::conjugacy::Dependence;
use super::{IterationPlan, NodeSampler, NodeSamplerFactory};
use crate::catalog::distribution::{gaussian_covariance, gaussian_moments, is_gaussian};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::matrix;
use crate::particle::Particle;

/// One linear-Gaussian observation `y = A x + b + ε`, `ε ~ N(0, cov)`.
#[derive(Debug, Clone)]
pub struct GaussianObservation {
    pub y: DVector<f64>,
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
    pub cov: DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct GaussianPosterior {
    pub mean: DVector<f64>,
    pub cov: DMatrix<f64>,
    /// Log predictive density of the stacked observations.
    pub log_weight: f64,
}

/// Stacked Kalman update of `N(prior_mean, prior_cov)` by `observations`.
pub fn gaussian_update(
    prior_mean: &DVector<f64>,
    prior_cov: &DMatrix<f64>,
    observations: &[GaussianObservation],
) -> std::result::Result<GaussianPosterior, String> {
    let d = prior_mean.len();
    let m: usize = observations.iter().map(|o| o.y.len()).sum();
    let mut y = DVector::zeros(m);
    let mut a = DMatrix::zeros(m, d);
    let mut b = DVector::zeros(m);
    let mut r = DMatrix::zeros(m, m);
    let mut row = 0;
    for obs in observations {
        let k = obs.y.len();
        if obs.a.shape() != (k, d) || obs.b.len() != k || obs.cov.shape() != (k, k) {
            return Err(format!("observation block of size {} does not match a state of size {}", k, d));
        }
        y.rows_mut(row, k).copy_from(&obs.y);
        a.view_mut((row, 0), (k, d)).copy_from(&obs.a);
        b.rows_mut(row, k).copy_from(&obs.b);
        r.view_mut((row, row), (k, k)).copy_from(&obs.cov);
        row += k;
    }

    let s = matrix::symmetrize(&a * prior_cov * a.transpose() + r);
    let s_chol = matrix::cholesky(s).map_err(|e| format!("innovation covariance: {}", e))?;
    let predicted = &a * prior_mean + b;
    let log_weight = matrix::mvn_log_density(&y, &predicted, &s_chol);

    // S⁻¹ A P0 = Kᵀ since S and P0 are symmetric
    let gain = s_chol.solve(&(&a * prior_cov)).transpose();
    let mean = prior_mean + &gain * (y - predicted);
    let cov = matrix::symmetrize((DMatrix::identity(d, d) - &gain * &a) * prior_cov);
    Ok(GaussianPosterior { mean, cov, log_weight })
}

fn is_free_gaussian(graph: &Graph, id: NodeId) -> bool {
    graph
        .node(id)
        .ok()
        .and_then(|n| n.stochastic())
        .map_or(false, |s| !s.is_bounded() && is_gaussian(s.distribution.name()))
}

fn check(graph: &Graph, plan: &IterationPlan, linear: bool) -> Option<Dependence> {
    if !is_free_gaussian(graph, plan.node) || plan.likelihood_children.is_empty() {
        return None;
    }
    let mut dependence = Dependence::new(plan.node);
    let conjugate = plan.likelihood_children.iter().all(|&c| {
        if !is_free_gaussian(graph, c) {
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
pub struct ConjugateMNormalFactory {
    linear: bool,
}

impl ConjugateMNormalFactory {
    pub fn identity() -> Self {
        Self { linear: false }
    }

    pub fn linear() -> Self {
        Self { linear: true }
    }
}

impl NodeSamplerFactory for ConjugateMNormalFactory {
    fn name(&self) -> &str {
        if self.linear {
            "conjugate_mnormal_linear"
        } else {
            "conjugate_mnormal"
        }
    }

    fn can_sample(&self, graph: &Graph, plan: &IterationPlan) -> bool {
        check(graph, plan, self.linear).is_some()
    }

    fn create(&self, graph: &Graph, plan: &IterationPlan) -> Result<Box<dyn NodeSampler>> {
        let dependence = check(graph, plan, self.linear)
            .ok_or_else(|| Error::Unsupported(format!("{} cannot sample {}", self.name(), graph.name(plan.node))))?;
        Ok(Box::new(ConjugateMNormal {
            linear: self.linear,
            dependence,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct ConjugateMNormal {
    linear: bool,
    dependence: Dependence,
}

fn moments(graph: &Graph, id: NodeId, particle: &Particle) -> Result<(DVector<f64>, DMatrix<f64>)> {
    let node = graph.node(id)?;
    let stochastic = node
        .stochastic()
        .ok_or_else(|| Error::Unsupported(format!("{} is not stochastic", node.name)))?;
    let params = graph.param_values(node, particle)?;
    gaussian_moments(stochastic.distribution.name(), &params).map_err(|message| Error::numerical(&node.name, message))
}

/// Covariance of a Gaussian child, read from its known second parameter.
pub(super) fn noise_covariance(graph: &Graph, child: NodeId, particle: &Particle) -> Result<DMatrix<f64>> {
    let node = graph.node(child)?;
    let stochastic = node
        .stochastic()
        .ok_or_else(|| Error::Unsupported(format!("{} is not stochastic", node.name)))?;
    let second = graph.require_value(node.parents[1], particle)?;
    gaussian_covariance(stochastic.distribution.name(), second).map_err(|message| Error::numerical(&node.name, message))
}

impl ConjugateMNormal {
    fn observation(&self, graph: &Graph, child: NodeId, particle: &Particle) -> Result<GaussianObservation> {
        let y = DVector::from_column_slice(graph.require_value(child, particle)?);
        let cov = noise_covariance(graph, child, particle)?;
        let (a, b) = if self.linear {
            let affine = self
                .dependence
                .affine_map(graph, graph.nodes()[child].parents[0], particle)?;
            (affine.coef, affine.offset)
        } else {
            (DMatrix::identity(y.len(), y.len()), DVector::zeros(y.len()))
        };
        Ok(GaussianObservation { y, a, b, cov })
    }
}

impl NodeSampler for ConjugateMNormal {
    fn name(&self) -> &str {
        if self.linear {
            "conjugate_mnormal_linear"
        } else {
            "conjugate_mnormal"
        }
    }

    fn sample(
        &self,
        graph: &Graph,
        plan: &IterationPlan,
        particle: &mut Particle,
        rng: &mut dyn RngCore,
    ) -> Result<f64> {
        let name = graph.name(plan.node);
        let (prior_mean, prior_cov) = moments(graph, plan.node, particle)?;
        let observations = plan
            .likelihood_children
            .iter()
            .map(|&c| self.observation(graph, c, particle))
            .collect::<Result<Vec<_>>>()?;
        let posterior = gaussian_update(&prior_mean, &prior_cov, &observations)
            .map_err(|message| Error::numerical(name, message))?;
        let chol = matrix::cholesky(posterior.cov)
            .map_err(|e| Error::numerical(name, format!("posterior covariance: {}", e)))?;
        let x = matrix::sample_mvn(&posterior.mean, &chol, rng);
        plan.assign(graph, particle, x.iter().cloned().collect())?;
        Ok(posterior.log_weight)
    }
}
