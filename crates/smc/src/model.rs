//! Console over one built graph: runs the forward sampler and the backward smoother, feeds the
//! monitors and extracts statistics.

use std::ops::ControlFlow;

use indexmap::IndexMap;
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::backward::BackwardSmoother;
use crate::config::{check_pdf_settings, SmcConfig};
use crate::error::{Error, Result};
use crate::forward::{ForwardSampler, SamplerState};
use crate::graph::{Graph, NodeId};
use crate::monitor::{MonitorSet, NodeRange, Pdf, StatTag};
use crate::sampler::SamplerRegistry;
use crate::utils::dim_len;

/// Progress passed to the `run_*_with` callbacks after every iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    pub n_iterations: usize,
    pub node: String,
    pub ess: f64,
    pub log_norm_const: f64,
}

#[derive(Debug)]
pub struct Model {
    graph: Graph,
    registry: SamplerRegistry,
    config: SmcConfig,
    forward: ForwardSampler,
    smoother: BackwardSmoother,
    filter_monitors: MonitorSet,
    backward_monitors: MonitorSet,
    gen_tree_monitors: MonitorSet,
    rng: StdRng,
}

impl Model {
    /// Console over `graph`, building it first if needed.
    pub fn new(mut graph: Graph) -> Result<Self> {
        if !graph.is_built() {
            graph.build()?;
        }
        Ok(Self {
            graph,
            registry: SamplerRegistry::default(),
            config: SmcConfig::default(),
            forward: ForwardSampler::new(),
            smoother: BackwardSmoother::new(),
            filter_monitors: MonitorSet::new(),
            backward_monitors: MonitorSet::new(),
            gen_tree_monitors: MonitorSet::new(),
            rng: StdRng::seed_from_u64(0),
        })
    }

    pub fn with_registry(mut self, registry: SamplerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn forward(&self) -> &ForwardSampler {
        &self.forward
    }

    pub fn smoother(&self) -> &BackwardSmoother {
        &self.smoother
    }

    pub fn config(&self) -> &SmcConfig {
        &self.config
    }

    /// Schedule the forward iterations and choose their samplers.
    pub fn build_sampler(&mut self, prior_only: bool) -> Result<()> {
        self.forward.build(&self.graph, &self.registry, prior_only)?;
        self.smoother = BackwardSmoother::new();
        self.filter_monitors.clear_entries();
        self.backward_monitors.clear_entries();
        self.gen_tree_monitors.clear_entries();
        Ok(())
    }

    /// Node and sampler name of every forward iteration.
    pub fn sampler_names(&self) -> Vec<(String, String)> {
        self.forward
            .sampler_names()
            .into_iter()
            .map(|(id, name)| (self.graph.name(id).to_string(), name.to_string()))
            .collect()
    }

    /// Initialize the forward sampler, rebuilding it when it is missing, was built for other
    /// data or with another `prior_only` setting.
    pub fn init_forward(&mut self, config: &SmcConfig) -> Result<IterationReport> {
        config.validate()?;
        if self.forward.state() == SamplerState::Unbuilt
            || self.forward.data_version() != self.graph.data_version()
            || config.prior_only != self.config.prior_only
        {
            self.build_sampler(config.prior_only)?;
        }
        self.config = config.clone();
        self.rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
        self.smoother = BackwardSmoother::new();
        self.filter_monitors.clear_entries();
        self.backward_monitors.clear_entries();
        self.gen_tree_monitors.clear_entries();

        self.forward.init(&self.graph, config)?;
        self.record_fixed_filter_nodes()?;
        self.after_forward_step()
    }

    pub fn iterate_forward(&mut self) -> Result<IterationReport> {
        self.forward.iterate(&self.graph)?;
        self.after_forward_step()
    }

    fn report(&self) -> IterationReport {
        let iteration = self.forward.iteration().saturating_sub(1);
        IterationReport {
            iteration,
            n_iterations: self.forward.n_iterations(),
            node: self
                .forward
                .node_at(iteration)
                .map_or_else(String::new, |id| self.graph.name(id).to_string()),
            ess: self.forward.ess(),
            log_norm_const: self.forward.log_norm_const(),
        }
    }

    fn after_forward_step(&mut self) -> Result<IterationReport> {
        if self.forward.iteration() > 0 {
            let t = self.forward.iteration() - 1;
            let nodes = self.nodes_of_iteration(t);
            let weights = self.forward.weights();
            for id in nodes {
                self.filter_monitors.record(
                    &self.graph,
                    id,
                    t,
                    self.forward.particles(),
                    &weights,
                    self.forward.ess(),
                )?;
            }
        }
        if self.forward.at_end() {
            self.record_gen_tree()?;
        }
        Ok(self.report())
    }

    /// Sampled node and logical updates of iteration `t`.
    fn nodes_of_iteration(&self, t: usize) -> Vec<NodeId> {
        self.forward.plans().get(t).map_or_else(Vec::new, |plan| {
            std::iter::once(plan.node)
                .chain(plan.logical_updates.iter().copied())
                .collect()
        })
    }

    fn record_fixed_filter_nodes(&mut self) -> Result<()> {
        for id in self.filter_monitors.monitored_nodes() {
            if self.graph.is_fixed(id) {
                self.filter_monitors.record(&self.graph, id, 0, &[], &[], 1.0)?;
            }
        }
        Ok(())
    }

    /// Replay the filtering history into the filter monitors.
    fn backfill_filter(&mut self) -> Result<()> {
        self.record_fixed_filter_nodes()?;
        if !self.forward.has_history() {
            return Ok(());
        }
        for snapshot in self.forward.history() {
            let weights: Vec<f64> = snapshot.log_weights.iter().map(|lw| lw.exp()).collect();
            for (&id, values) in snapshot.nodes.iter().zip(&snapshot.values) {
                self.filter_monitors.record_values(
                    &self.graph,
                    id,
                    snapshot.iteration,
                    values,
                    &weights,
                    snapshot.ess,
                )?;
            }
        }
        Ok(())
    }

    fn record_gen_tree(&mut self) -> Result<()> {
        let weights = self.forward.weights();
        let t = self.forward.n_iterations().saturating_sub(1);
        for id in self.gen_tree_monitors.monitored_nodes() {
            self.gen_tree_monitors.record(
                &self.graph,
                id,
                t,
                self.forward.particles(),
                &weights,
                self.forward.ess(),
            )?;
        }
        Ok(())
    }

    /// Record the nodes of the smoother's current iteration.
    fn record_backward(&mut self) -> Result<()> {
        let t = self.smoother.iteration();
        let Some(snapshot) = self.forward.history().get(t) else {
            return Ok(());
        };
        let weights = self.smoother.weights();
        for (&id, values) in snapshot.nodes.iter().zip(&snapshot.values) {
            self.backward_monitors
                .record_values(&self.graph, id, t, values, &weights, self.smoother.ess())?;
        }
        if t == 0 {
            for id in self.backward_monitors.monitored_nodes() {
                if self.graph.is_fixed(id) {
                    self.backward_monitors.record(&self.graph, id, t, &[], &[], 1.0)?;
                }
            }
        }
        Ok(())
    }

    pub fn run_forward_sampler(&mut self, config: &SmcConfig) -> Result<f64> {
        self.run_forward_sampler_with(config, |_| ControlFlow::Continue(()))
    }

    /// Run the forward sampler to the end, calling `callback` after every iteration; a
    /// `Break` stops the run with [`Error::Interrupted`].
    ///
    /// Returns the log normalizing constant estimate.
    pub fn run_forward_sampler_with<F>(&mut self, config: &SmcConfig, mut callback: F) -> Result<f64>
    where
        F: FnMut(&IterationReport) -> ControlFlow<()>,
    {
        let mut report = self.init_forward(config)?;
        loop {
            if callback(&report).is_break() {
                return Err(Error::Interrupted(report.iteration));
            }
            if self.forward.at_end() {
                break;
            }
            report = self.iterate_forward()?;
        }
        info!(
            log_norm_const = self.forward.log_norm_const(),
            resamplings = self.forward.n_resamplings(),
            "forward run finished"
        );
        Ok(self.forward.log_norm_const())
    }

    pub fn forward_at_end(&self) -> bool {
        self.forward.at_end()
    }

    pub fn log_norm_const(&self) -> Result<f64> {
        self.require_forward_end("log_norm_const")?;
        Ok(self.forward.log_norm_const())
    }

    pub fn run_backward_smoother(&mut self) -> Result<()> {
        self.run_backward_smoother_with(|_| ControlFlow::Continue(()))
    }

    /// Smooth the finished forward run back to the first iteration.
    pub fn run_backward_smoother_with<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&IterationReport) -> ControlFlow<()>,
    {
        self.backward_monitors.clear_entries();
        self.smoother.init(&self.graph, &self.forward)?;
        self.record_backward()?;
        loop {
            let report = IterationReport {
                iteration: self.smoother.iteration(),
                n_iterations: self.forward.n_iterations(),
                node: self
                    .smoother
                    .node(&self.forward)
                    .map_or_else(String::new, |id| self.graph.name(id).to_string()),
                ess: self.smoother.ess(),
                log_norm_const: self.forward.log_norm_const(),
            };
            if callback(&report).is_break() {
                return Err(Error::Interrupted(report.iteration));
            }
            if self.smoother.at_end() {
                return Ok(());
            }
            self.smoother.iterate(&self.graph, &self.forward)?;
            self.record_backward()?;
        }
    }

    pub fn set_filter_monitor(&mut self, range: &str) -> Result<()> {
        self.filter_monitors.add(&self.graph, range.parse()?)?;
        if self.forward.at_end() {
            self.backfill_filter()?;
        }
        Ok(())
    }

    pub fn set_backward_smooth_monitor(&mut self, range: &str) -> Result<()> {
        self.backward_monitors.add(&self.graph, range.parse()?)
    }

    pub fn set_gen_tree_smooth_monitor(&mut self, range: &str) -> Result<()> {
        self.gen_tree_monitors.add(&self.graph, range.parse()?)?;
        if self.forward.at_end() {
            self.record_gen_tree()?;
        }
        Ok(())
    }

    pub fn clear_filter_monitors(&mut self) {
        self.filter_monitors.clear();
    }

    pub fn clear_backward_smooth_monitors(&mut self) {
        self.backward_monitors.clear();
    }

    pub fn clear_gen_tree_smooth_monitors(&mut self) {
        self.gen_tree_monitors.clear();
    }

    fn require_forward_end(&self, operation: &'static str) -> Result<()> {
        if self.forward.at_end() {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, self.forward.state()))
        }
    }

    fn require_smoother_end(&self, operation: &'static str) -> Result<()> {
        if self.smoother.at_end() {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, self.smoother.state()))
        }
    }

    pub fn extract_filter_stat(&self, range: &str, tag: &StatTag) -> Result<IndexMap<usize, ArrayD<f64>>> {
        self.require_forward_end("extract_filter_stat")?;
        self.filter_monitors.extract_stat(&self.graph, &range.parse()?, tag)
    }

    /// Histogram densities of the nodes in `range`, over `num_bins` bins whose range is fixed by
    /// the first `cache_fraction` of the samples.
    pub fn extract_filter_pdf(
        &self,
        range: &str,
        num_bins: usize,
        cache_fraction: f64,
    ) -> Result<IndexMap<usize, Vec<Pdf>>> {
        check_pdf_settings(num_bins, cache_fraction)?;
        self.require_forward_end("extract_filter_pdf")?;
        self.filter_monitors
            .extract_pdf(&self.graph, &range.parse()?, num_bins, cache_fraction)
    }

    pub fn extract_smooth_stat(&self, range: &str, tag: &StatTag) -> Result<IndexMap<usize, ArrayD<f64>>> {
        self.require_smoother_end("extract_smooth_stat")?;
        self.backward_monitors.extract_stat(&self.graph, &range.parse()?, tag)
    }

    /// Histogram densities of the nodes in `range`, over `num_bins` bins whose range is fixed by
    /// the first `cache_fraction` of the samples.
    pub fn extract_smooth_pdf(
        &self,
        range: &str,
        num_bins: usize,
        cache_fraction: f64,
    ) -> Result<IndexMap<usize, Vec<Pdf>>> {
        check_pdf_settings(num_bins, cache_fraction)?;
        self.require_smoother_end("extract_smooth_pdf")?;
        self.backward_monitors
            .extract_pdf(&self.graph, &range.parse()?, num_bins, cache_fraction)
    }

    pub fn extract_gen_tree_smooth_stat(&self, range: &str, tag: &StatTag) -> Result<IndexMap<usize, ArrayD<f64>>> {
        self.require_forward_end("extract_gen_tree_smooth_stat")?;
        self.gen_tree_monitors.extract_stat(&self.graph, &range.parse()?, tag)
    }

    /// Histogram densities of the nodes in `range`, over `num_bins` bins whose range is fixed by
    /// the first `cache_fraction` of the samples.
    pub fn extract_gen_tree_smooth_pdf(
        &self,
        range: &str,
        num_bins: usize,
        cache_fraction: f64,
    ) -> Result<IndexMap<usize, Vec<Pdf>>> {
        check_pdf_settings(num_bins, cache_fraction)?;
        self.require_forward_end("extract_gen_tree_smooth_pdf")?;
        self.gen_tree_monitors
            .extract_pdf(&self.graph, &range.parse()?, num_bins, cache_fraction)
    }

    /// Draw one particle of the final population by weight and return the values of its
    /// sampled nodes by name.
    pub fn sample_gen_tree_smooth_particle(&mut self) -> Result<IndexMap<String, Vec<f64>>> {
        let particle = self.forward.sample_one_particle(&mut self.rng)?;
        Ok(particle
            .sampled_ids()
            .filter_map(|id| particle.get(id).map(|v| (self.graph.name(id).to_string(), v.to_vec())))
            .collect())
    }

    /// Observe the nodes of `range` with `values`, split in node order.
    ///
    /// The forward sampler keeps its population but refuses to continue, and the backward
    /// smoother is locked until the next forward run.
    pub fn change_data(&mut self, range: &str, values: &[f64]) -> Result<()> {
        let range: NodeRange = range.parse()?;
        let nodes = range.resolve(&self.graph)?;
        let expected: usize = nodes.iter().map(|&(_, id)| dim_len(self.graph.dim(id))).sum();
        if expected != values.len() {
            return Err(Error::DimensionMismatch {
                node: range.to_string(),
                message: format!("expected {} values, got {}", expected, values.len()),
            });
        }
        let mut offset = 0;
        for (_, id) in nodes {
            let len = dim_len(self.graph.dim(id));
            self.graph.set_data(id, values[offset..offset + len].to_vec())?;
            offset += len;
        }
        Ok(())
    }

    /// Unobserve the nodes of `range`.
    pub fn remove_data(&mut self, range: &str) -> Result<()> {
        let range: NodeRange = range.parse()?;
        for (_, id) in range.resolve(&self.graph)? {
            self.graph.remove_data(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::error::ErrorKind;

    /// mu ~ N(0, 1); y[i] ~ N(mu, 1) for y = [0.5, 1.5]
    fn model() -> Model {
        let cat = Catalog::builtin();
        let dnorm = cat.distribution("dnorm").unwrap();
        let mut g = Graph::new();
        let zero = g.add_constant_node("zero", vec![1], vec![0.0]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let mu = g.add_stochastic_node("mu", dnorm.clone(), vec![zero, one], None, None, None).unwrap();
        let y0 = g
            .add_stochastic_node("y0", dnorm.clone(), vec![mu, one], Some(vec![0.5]), None, None)
            .unwrap();
        let y1 = g
            .add_stochastic_node("y1", dnorm, vec![mu, one], Some(vec![1.5]), None, None)
            .unwrap();
        g.build().unwrap();
        g.bind_array("y", vec![y0, y1]).unwrap();
        Model::new(g).unwrap()
    }

    #[test]
    fn test_run_and_extract() {
        let mut m = model();
        m.set_filter_monitor("mu").unwrap();
        assert!(m.extract_filter_stat("mu", &StatTag::Mean).is_err());
        let log_z = m.run_forward_sampler(&SmcConfig::new(200, 3)).unwrap();
        assert_eq!(m.sampler_names(), vec![("mu".to_string(), "conjugate_normal".to_string())]);

        // y ~ N([0, 0], [[2, 1], [1, 2]])
        let quad = (2.0 * 0.25 - 2.0 * 0.75 + 2.0 * 2.25) / 3.0;
        let exact = -(2.0 * std::f64::consts::PI).ln() - 0.5 * 3.0f64.ln() - 0.5 * quad;
        assert!((log_z - exact).abs() < 1e-9);

        let mean = m.extract_filter_stat("mu", &StatTag::Mean).unwrap();
        assert!((mean[&0][[0]] - 2.0 / 3.0).abs() < 0.15);
        assert!(matches!(
            m.extract_filter_stat("y", &StatTag::Mean),
            Err(Error::NotMonitored(_))
        ));
        let sample = m.sample_gen_tree_smooth_particle().unwrap();
        assert!(sample.contains_key("mu"));
    }

    #[test]
    fn test_interrupt() {
        let mut m = model();
        let err = m
            .run_forward_sampler_with(&SmcConfig::new(10, 1), |_| ControlFlow::Break(()))
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted(0)));
    }

    #[test]
    fn test_change_data() {
        let mut m = model();
        m.run_forward_sampler(&SmcConfig::new(10, 1)).unwrap();
        assert_eq!(m.change_data("y", &[1.0]).unwrap_err().kind(), ErrorKind::Validation);
        m.change_data("y", &[1.0, 2.0]).unwrap();
        assert!(matches!(m.run_backward_smoother(), Err(Error::BackwardLocked)));
        m.remove_data("y[1]").unwrap();
        m.run_forward_sampler(&SmcConfig::new(10, 1)).unwrap();
        assert_eq!(m.forward().n_iterations(), 2);
        m.run_backward_smoother().unwrap();
    }
}
