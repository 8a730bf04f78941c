//! Forward particle sampler.
//!
//! One iteration per unobserved stochastic node, in topological order. Every particle runs the
//! node sampler chosen for the iteration, the returned log incremental weights are added to the
//! normalized log weights, and the log normalizing constant grows by their log-sum-exp. When the
//! ESS of the previous iteration fell below `ess_threshold * N`, the population is resampled
//! before sampling.

use ndarray::Array2;
use rand::distributions::{Distribution as _, WeightedIndex};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::config::SmcConfig;
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::particle::{stack_values, Particle};
use crate::resample::{resample_indices, ResampleType};
use crate::sampler::{schedule, IterationPlan, NodeSampler, SamplerRegistry};
use crate::utils::{effective_sample_size, logsumexp, normalize_log_weights};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Unbuilt,
    Built,
    Initialized,
    Running,
    AtEnd,
}

/// What one iteration added to the filtering population, taken before any resampling.
///
/// Only the values set by the iteration are kept: the sampled node and the logical nodes it
/// completes. Earlier values of a particle are reached through `ancestors`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub iteration: usize,
    pub node: NodeId,
    /// The sampled node followed by its logical updates.
    pub nodes: Vec<NodeId>,
    /// One matrix per entry of `nodes`, one row per particle.
    pub values: Vec<Array2<f64>>,
    /// Index in the previous iteration's population of every particle's parent, when the
    /// population was resampled before this iteration.
    pub ancestors: Option<Vec<usize>>,
    /// Normalized log weights.
    pub log_weights: Vec<f64>,
    pub ess: f64,
}

impl Snapshot {
    /// Values of `id` set by this iteration.
    pub fn values_of(&self, id: NodeId) -> Option<&Array2<f64>> {
        self.nodes.iter().position(|&n| n == id).map(|k| &self.values[k])
    }

    /// Number of floats and indices held.
    pub fn stored_len(&self) -> usize {
        self.values.iter().map(|v| v.len()).sum::<usize>()
            + self.ancestors.as_ref().map_or(0, |a| a.len())
            + self.log_weights.len()
    }

    /// Parent of particle `i` in the previous iteration's population.
    fn parent(&self, i: usize) -> usize {
        self.ancestors.as_ref().map_or(i, |a| a[i])
    }
}

#[derive(Debug)]
pub struct ForwardSampler {
    state: SamplerState,
    plans: Vec<IterationPlan>,
    samplers: Vec<Box<dyn NodeSampler>>,
    particles: Vec<Particle>,
    log_weights: Vec<f64>,
    ess: f64,
    log_norm_const: f64,
    resample_type: ResampleType,
    ess_threshold: f64,
    keep_history: bool,
    history: Vec<Snapshot>,
    ancestors: Option<Vec<usize>>,
    rng: StdRng,
    next: usize,
    n_resamplings: usize,
    data_version: u64,
}

impl Default for ForwardSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardSampler {
    pub fn new() -> Self {
        Self {
            state: SamplerState::Unbuilt,
            plans: Vec::new(),
            samplers: Vec::new(),
            particles: Vec::new(),
            log_weights: Vec::new(),
            ess: 0.0,
            log_norm_const: 0.0,
            resample_type: ResampleType::default(),
            ess_threshold: 0.5,
            keep_history: true,
            history: Vec::new(),
            ancestors: None,
            rng: StdRng::seed_from_u64(0),
            next: 0,
            n_resamplings: 0,
            data_version: 0,
        }
    }

    /// Schedule the iterations of `graph` and pick a sampler for each.
    pub fn build(&mut self, graph: &Graph, registry: &SamplerRegistry, prior_only: bool) -> Result<()> {
        let plans = schedule(graph)?;
        let samplers: Vec<Box<dyn NodeSampler>> = plans
            .iter()
            .map(|plan| registry.select(graph, plan, prior_only))
            .collect();
        *self = Self {
            state: SamplerState::Built,
            plans,
            samplers,
            data_version: graph.data_version(),
            ..Self::new()
        };
        info!(iterations = self.plans.len(), prior_only, "forward sampler built");
        Ok(())
    }

    fn check_data_version(&self, graph: &Graph, operation: &'static str) -> Result<()> {
        if graph.data_version() != self.data_version {
            return Err(Error::InvalidState {
                operation,
                state: "graph data changed since the sampler was built".to_string(),
            });
        }
        Ok(())
    }

    /// Allocate the population and run the first iteration.
    pub fn init(&mut self, graph: &Graph, config: &SmcConfig) -> Result<()> {
        if self.state == SamplerState::Unbuilt {
            return Err(Error::invalid_state("init", self.state));
        }
        self.check_data_version(graph, "init")?;
        config.validate()?;

        let n = config.n_particles;
        self.particles = vec![Particle::new(graph.len()); n];
        self.log_weights = vec![-(n as f64).ln(); n];
        self.ess = n as f64;
        self.log_norm_const = 0.0;
        self.resample_type = config.resample_type;
        self.ess_threshold = config.ess_threshold;
        self.keep_history = config.keep_history;
        self.history.clear();
        self.ancestors = None;
        self.rng = StdRng::seed_from_u64(config.seed);
        self.next = 0;
        self.n_resamplings = 0;
        info!(
            n_particles = n,
            seed = config.seed,
            resample_type = %config.resample_type,
            "forward sampler initialized"
        );

        if self.plans.is_empty() {
            self.state = SamplerState::AtEnd;
            return Ok(());
        }
        self.state = SamplerState::Initialized;
        if let Err(e) = self.step(graph) {
            self.state = SamplerState::Built;
            return Err(e);
        }
        if self.next == self.plans.len() {
            self.state = SamplerState::AtEnd;
        }
        Ok(())
    }

    /// Run the next iteration.
    pub fn iterate(&mut self, graph: &Graph) -> Result<()> {
        if !matches!(self.state, SamplerState::Initialized | SamplerState::Running) {
            return Err(Error::invalid_state("iterate", self.state));
        }
        self.check_data_version(graph, "iterate")?;

        if self.ess < self.ess_threshold * self.particles.len() as f64 {
            self.resample();
        }
        if let Err(e) = self.step(graph) {
            self.state = SamplerState::Built;
            return Err(e);
        }
        self.state = if self.next == self.plans.len() {
            info!(log_norm_const = self.log_norm_const, resamplings = self.n_resamplings, "forward sampler at end");
            SamplerState::AtEnd
        } else {
            SamplerState::Running
        };
        Ok(())
    }

    fn resample(&mut self) {
        let n = self.particles.len();
        let weights = self.weights();
        let indices = resample_indices(self.resample_type, &weights, n, &mut self.rng);
        self.particles = indices.iter().map(|&i| self.particles[i].clone()).collect();
        if self.keep_history {
            self.ancestors = Some(indices);
        }
        self.log_weights = vec![-(n as f64).ln(); n];
        self.ess = n as f64;
        self.n_resamplings += 1;
        trace!(iteration = self.next, method = %self.resample_type, "resampled");
    }

    fn step(&mut self, graph: &Graph) -> Result<()> {
        let t = self.next;
        let plan = &self.plans[t];
        let sampler = &self.samplers[t];
        let rng: &mut dyn RngCore = &mut self.rng;

        for (particle, lw) in self.particles.iter_mut().zip(self.log_weights.iter_mut()) {
            let incr = sampler.sample(graph, plan, particle, rng)?;
            *lw += if incr.is_nan() { f64::NEG_INFINITY } else { incr };
        }
        let lse = normalize_log_weights(&mut self.log_weights);
        if !lse.is_finite() {
            return Err(Error::DegenerateWeights {
                node: graph.name(plan.node).to_string(),
            });
        }
        self.log_norm_const += lse;
        self.ess = effective_sample_size(&self.log_weights);
        self.next += 1;

        debug!(
            iteration = t,
            node = graph.name(plan.node),
            sampler = sampler.name(),
            ess = self.ess,
            log_norm_const = self.log_norm_const,
            "iteration done"
        );
        if self.ess < 0.01 * self.particles.len() as f64 {
            warn!(iteration = t, node = graph.name(plan.node), ess = self.ess, "effective sample size collapsed");
        }
        if self.keep_history {
            let nodes: Vec<NodeId> = std::iter::once(plan.node)
                .chain(plan.logical_updates.iter().copied())
                .collect();
            let values = nodes
                .iter()
                .map(|&id| stack_values(graph, id, &self.particles))
                .collect::<Result<Vec<_>>>()?;
            self.history.push(Snapshot {
                iteration: t,
                node: plan.node,
                nodes,
                values,
                ancestors: self.ancestors.take(),
                log_weights: self.log_weights.clone(),
                ess: self.ess,
            });
        }
        Ok(())
    }

    /// Filtering population of iteration `t` rebuilt from the history: every particle holds the
    /// values of its ancestral line up to `t`.
    pub fn ancestral_particles(&self, graph: &Graph, t: usize) -> Result<Vec<Particle>> {
        if !self.keep_history || t >= self.history.len() {
            return Err(Error::invalid_state("ancestral_particles", "iteration not in the history"));
        }
        let n = self.history[t].log_weights.len();
        let mut particles = vec![Particle::new(graph.len()); n];
        let mut lineage: Vec<usize> = (0..n).collect();
        for snapshot in self.history[..=t].iter().rev() {
            for (particle, &row) in particles.iter_mut().zip(&lineage) {
                for (&id, values) in snapshot.nodes.iter().zip(&snapshot.values) {
                    particle.set(id, values.row(row).to_vec());
                }
            }
            for row in lineage.iter_mut() {
                *row = snapshot.parent(*row);
            }
        }
        Ok(particles)
    }

    /// Number of floats and indices held by the history.
    pub fn history_len(&self) -> usize {
        self.history.iter().map(Snapshot::stored_len).sum()
    }

    /// Draw one particle of the final population according to its weight.
    pub fn sample_one_particle(&self, rng: &mut dyn RngCore) -> Result<&Particle> {
        if self.state != SamplerState::AtEnd || self.particles.is_empty() {
            return Err(Error::invalid_state("sample_one_particle", self.state));
        }
        let index = WeightedIndex::new(self.weights())
            .map_err(|e| Error::Unsupported(format!("particle weights: {}", e)))?;
        Ok(&self.particles[index.sample(rng)])
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn at_end(&self) -> bool {
        self.state == SamplerState::AtEnd
    }

    /// Log marginal likelihood estimate of the observations processed so far.
    pub fn log_norm_const(&self) -> f64 {
        self.log_norm_const
    }

    pub fn ess(&self) -> f64 {
        self.ess
    }

    /// Normalized weights.
    pub fn weights(&self) -> Vec<f64> {
        self.log_weights.iter().map(|lw| lw.exp()).collect()
    }

    /// Normalized log weights.
    pub fn log_weights(&self) -> &[f64] {
        &self.log_weights
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn n_particles(&self) -> usize {
        self.particles.len()
    }

    /// Number of iterations run so far.
    pub fn iteration(&self) -> usize {
        self.next
    }

    pub fn n_iterations(&self) -> usize {
        self.plans.len()
    }

    pub fn plans(&self) -> &[IterationPlan] {
        &self.plans
    }

    /// Node sampled at `iteration`.
    pub fn node_at(&self, iteration: usize) -> Option<NodeId> {
        self.plans.get(iteration).map(|p| p.node)
    }

    pub fn n_resamplings(&self) -> usize {
        self.n_resamplings
    }

    /// Sampled node and sampler name of every iteration.
    pub fn sampler_names(&self) -> Vec<(NodeId, &str)> {
        self.plans
            .iter()
            .zip(&self.samplers)
            .map(|(plan, sampler)| (plan.node, sampler.name()))
            .collect()
    }

    pub fn history(&self) -> &[Snapshot] {
        &self.history
    }

    pub fn has_history(&self) -> bool {
        self.keep_history && self.history.len() == self.plans.len()
    }

    /// Graph data version the sampler was built for.
    pub fn data_version(&self) -> u64 {
        self.data_version
    }
}
