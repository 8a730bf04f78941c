//! Backward smoothing over the filtering history of a finished forward run.
//!
//! Starting from the filtering weights of the last iteration, each step moves from iteration
//! `t + 1` to `t`:
//!
//! ```text
//! ws_t(i) ∝ w_t(i) Σ_j ws_{t+1}(j) f(j | i) / Σ_k w_t(k) f(j | k)
//! ```
//!
//! where `f(j | i)` is the prior density of the node sampled at `t + 1`, at its value in
//! filtering particle `j`, times the density of that iteration's likelihood children, every other
//! value being taken from filtering particle `i` at `t`. Everything is computed in log space.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::forward::ForwardSampler;
use crate::graph::{Graph, NodeId};
use crate::utils::{effective_sample_size, log_add_exp, logsumexp, normalize_log_weights};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmootherState {
    Uninitialized,
    Initialized,
    Running,
    AtEnd,
}

#[derive(Debug, Clone)]
pub struct BackwardSmoother {
    state: SmootherState,
    iteration: usize,
    log_weights: Vec<f64>,
    ess: f64,
}

impl Default for BackwardSmoother {
    fn default() -> Self {
        Self::new()
    }
}

impl BackwardSmoother {
    pub fn new() -> Self {
        Self {
            state: SmootherState::Uninitialized,
            iteration: 0,
            log_weights: Vec::new(),
            ess: 0.0,
        }
    }

    /// Forward run must be finished, with history, on unchanged data.
    fn check_forward(graph: &Graph, forward: &ForwardSampler, operation: &'static str) -> Result<()> {
        if graph.data_version() != forward.data_version() {
            return Err(Error::BackwardLocked);
        }
        if !forward.at_end() || !forward.has_history() {
            return Err(Error::InvalidState {
                operation,
                state: "forward sampler not at end with its history".to_string(),
            });
        }
        Ok(())
    }

    /// Start from the filtering weights of the last iteration.
    pub fn init(&mut self, graph: &Graph, forward: &ForwardSampler) -> Result<()> {
        Self::check_forward(graph, forward, "init backward smoother")?;
        let Some(last) = forward.history().last() else {
            return Err(Error::invalid_state("init backward smoother", "no iteration to smooth"));
        };
        self.iteration = last.iteration;
        self.log_weights = last.log_weights.clone();
        self.ess = last.ess;
        self.state = if self.iteration == 0 {
            SmootherState::AtEnd
        } else {
            SmootherState::Initialized
        };
        info!(iterations = forward.n_iterations(), "backward smoother initialized");
        Ok(())
    }

    /// Move the smoothed weights one iteration back.
    pub fn iterate(&mut self, graph: &Graph, forward: &ForwardSampler) -> Result<()> {
        if !matches!(self.state, SmootherState::Initialized | SmootherState::Running) {
            return Err(Error::invalid_state("iterate backward smoother", self.state));
        }
        Self::check_forward(graph, forward, "iterate backward smoother")?;

        let t = self.iteration - 1;
        let current = &forward.history()[t];
        let later = &forward.history()[t + 1];
        let plan = &forward.plans()[t + 1];
        let n = current.log_weights.len();
        let next_values = later.values_of(plan.node).ok_or_else(|| Error::MissingValue {
            node: graph.name(plan.node).to_string(),
        })?;
        let mut paths = forward.ancestral_particles(graph, t)?;

        // One column of log f(j | .) at a time; acc[i] collects
        // log Σ_j ws_{t+1}(j) f(j | i) / Σ_k w_t(k) f(j | k).
        let mut acc = vec![f64::NEG_INFINITY; n];
        let mut column = vec![f64::NEG_INFINITY; n];
        for (j, &later_lw) in self.log_weights.iter().enumerate() {
            if later_lw == f64::NEG_INFINITY {
                continue;
            }
            let value = next_values.row(j).to_vec();
            for (i, (particle, entry)) in paths.iter_mut().zip(column.iter_mut()).enumerate() {
                if current.log_weights[i] == f64::NEG_INFINITY {
                    *entry = f64::NEG_INFINITY;
                    continue;
                }
                plan.assign(graph, particle, value.clone())?;
                let lf = graph.log_prior_density(plan.node, particle)? + plan.log_likelihood(graph, particle)?;
                *entry = if lf.is_nan() { f64::NEG_INFINITY } else { lf };
            }
            let terms: Vec<f64> = current.log_weights.iter().zip(&column).map(|(lw, lf)| lw + lf).collect();
            let denominator = logsumexp(&terms);
            if !denominator.is_finite() {
                continue;
            }
            for (a, lf) in acc.iter_mut().zip(&column) {
                *a = log_add_exp(*a, later_lw + lf - denominator);
            }
        }
        let mut smoothed: Vec<f64> = current.log_weights.iter().zip(&acc).map(|(lw, a)| lw + a).collect();
        if !normalize_log_weights(&mut smoothed).is_finite() {
            return Err(Error::DegenerateWeights {
                node: graph.name(current.node).to_string(),
            });
        }

        self.log_weights = smoothed;
        self.ess = effective_sample_size(&self.log_weights);
        self.iteration = t;
        debug!(iteration = t, node = graph.name(current.node), ess = self.ess, "backward step done");
        self.state = if t == 0 {
            info!("backward smoother at end");
            SmootherState::AtEnd
        } else {
            SmootherState::Running
        };
        Ok(())
    }

    pub fn state(&self) -> SmootherState {
        self.state
    }

    pub fn at_end(&self) -> bool {
        self.state == SmootherState::AtEnd
    }

    /// Iteration whose smoothed weights are held.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Node sampled at the current iteration.
    pub fn node(&self, forward: &ForwardSampler) -> Option<NodeId> {
        forward.node_at(self.iteration)
    }

    /// Normalized smoothed log weights of the filtering particles of the current iteration.
    pub fn log_weights(&self) -> &[f64] {
        &self.log_weights
    }

    pub fn weights(&self) -> Vec<f64> {
        self.log_weights.iter().map(|lw| lw.exp()).collect()
    }

    pub fn ess(&self) -> f64 {
        self.ess
    }
}
