//! Monitors: which node arrays to record, the recorded particle sets, and the statistics
//! extracted from them.
//!
//! A [`MonitorSet`] holds ranges of node arrays. The sampler driving it calls
//! [`MonitorSet::record`] once a monitored node has its values for the distribution the set
//! tracks (filtering, backward smoothing or genealogical tree smoothing); the entry keeps the
//! particle values and normalized weights. Statistics are computed on demand by streaming the
//! entry through the accumulators.

mod accumulator;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::particle::{stack_values, Particle};
use crate::utils::dim_len;

pub use accumulator::{
    weighted_quantile, DiscreteFrequency, WeightedDensity, WeightedMoments, WeightedPSquareQuantile,
};

/// A node array, or a half-open range of it: `x`, `x[2]`, `x[0:3]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRange {
    pub array: String,
    pub range: Option<(usize, usize)>,
}

impl NodeRange {
    pub fn whole(array: &str) -> Self {
        Self {
            array: array.to_string(),
            range: None,
        }
    }

    /// `(array index, node)` pairs covered by the range.
    pub fn resolve(&self, graph: &Graph) -> Result<Vec<(usize, NodeId)>> {
        let ids = graph.array(&self.array)?;
        let (start, end) = self.range.unwrap_or((0, ids.len()));
        if start >= end || end > ids.len() {
            return Err(Error::RangeOutOfBounds {
                array: self.array.clone(),
                start,
                end,
                len: ids.len(),
            });
        }
        Ok((start..end).map(|i| (i, ids[i])).collect())
    }
}

impl FromStr for NodeRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidRange(s.to_string());
        let s = s.trim();
        let Some(open) = s.find('[') else {
            if s.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::whole(s));
        };
        let array = s[..open].trim();
        let inner = s[open + 1..].strip_suffix(']').ok_or_else(invalid)?;
        if array.is_empty() {
            return Err(invalid());
        }
        let index = |t: &str| t.trim().parse::<usize>().map_err(|_| invalid());
        let range = match inner.split_once(':') {
            Some((a, b)) => (index(a)?, index(b)?),
            None => {
                let i = index(inner)?;
                (i, i + 1)
            }
        };
        Ok(Self {
            array: array.to_string(),
            range: Some(range),
        })
    }
}

impl fmt::Display for NodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            None => write!(f, "{}", self.array),
            Some((a, b)) if b == a + 1 => write!(f, "{}[{}]", self.array, a),
            Some((a, b)) => write!(f, "{}[{}:{}]", self.array, a, b),
        }
    }
}

/// Statistic extracted from a monitor entry, per scalar component of the node.
#[derive(Debug, Clone, PartialEq)]
pub enum StatTag {
    Mean,
    Variance,
    Skewness,
    Kurtosis,
    Median,
    /// One value per probability, stacked along a trailing axis.
    Quantiles(Vec<f64>),
    /// Most probable value; discrete nodes only.
    Mode,
}

/// Density estimate of one scalar component: bin centres or support points, and densities or
/// probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdf {
    pub x: Array1<f64>,
    pub density: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct MonitorEntry {
    pub node: NodeId,
    /// Iteration whose particle set was recorded.
    pub iteration: usize,
    /// One row per particle, one column per scalar component.
    pub values: Array2<f64>,
    /// Normalized weights.
    pub weights: Array1<f64>,
    pub ess: f64,
    pub discrete: bool,
}

impl MonitorEntry {
    /// `(value, weight)` pairs of component `k`, weights rescaled to a mean of one.
    fn component(&self, k: usize) -> impl Iterator<Item = (f64, f64)> + '_ {
        let n = self.weights.len() as f64;
        self.values
            .column(k)
            .into_iter()
            .zip(self.weights.iter())
            .map(move |(&x, &w)| (x, w * n))
    }

    fn stat(&self, tag: &StatTag, k: usize) -> Result<Vec<f64>> {
        Ok(match tag {
            StatTag::Mean | StatTag::Variance | StatTag::Skewness | StatTag::Kurtosis => {
                let mut moments = WeightedMoments::new();
                for (x, w) in self.component(k) {
                    moments.push(x, w);
                }
                vec![match tag {
                    StatTag::Mean => moments.mean(),
                    StatTag::Variance => moments.variance(),
                    StatTag::Skewness => moments.skewness(),
                    _ => moments.kurtosis(),
                }]
            }
            StatTag::Median if self.discrete => {
                let samples: Vec<(f64, f64)> = self.component(k).collect();
                vec![weighted_quantile(&samples, 0.5)]
            }
            StatTag::Median => vec![self.p_square(0.5, k)],
            StatTag::Quantiles(probs) => {
                if let Some(&p) = probs.iter().find(|p| !(0.0..=1.0).contains(*p)) {
                    return Err(Error::Unsupported(format!("quantile probability {} outside [0, 1]", p)));
                }
                probs.iter().map(|&p| self.p_square(p, k)).collect()
            }
            StatTag::Mode => {
                if !self.discrete {
                    return Err(Error::Unsupported("mode of a continuous node".to_string()));
                }
                let mut freq = DiscreteFrequency::new();
                for (x, w) in self.component(k) {
                    freq.push(x, w);
                }
                vec![freq.mode()]
            }
        })
    }

    fn p_square(&self, p: f64, k: usize) -> f64 {
        let mut q = WeightedPSquareQuantile::new(p);
        for (x, w) in self.component(k) {
            q.push(x, w);
        }
        q.quantile()
    }

    fn pdf(&self, k: usize, bins: usize, cache_fraction: f64) -> Pdf {
        let (x, density) = if self.discrete {
            let mut freq = DiscreteFrequency::new();
            for (x, w) in self.component(k) {
                freq.push(x, w);
            }
            freq.pmf()
        } else {
            let mut hist = WeightedDensity::new(bins, self.weights.len(), cache_fraction);
            for (x, w) in self.component(k) {
                hist.push(x, w);
            }
            hist.finish()
        };
        Pdf {
            x: Array1::from(x),
            density: Array1::from(density),
        }
    }
}

/// Ranges of node arrays to monitor and the entries recorded for their nodes.
#[derive(Debug, Clone, Default)]
pub struct MonitorSet {
    ranges: IndexMap<NodeRange, Vec<NodeId>>,
    entries: IndexMap<NodeId, MonitorEntry>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, graph: &Graph, range: NodeRange) -> Result<()> {
        let ids = range.resolve(graph)?.into_iter().map(|(_, id)| id).collect();
        self.ranges.insert(range, ids);
        Ok(())
    }

    /// Drop every range and entry.
    pub fn clear(&mut self) {
        self.ranges.clear();
        self.entries.clear();
    }

    /// Drop the recorded entries, keeping the ranges.
    pub fn clear_entries(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> impl Iterator<Item = &NodeRange> {
        self.ranges.keys()
    }

    pub fn is_monitored(&self, id: NodeId) -> bool {
        self.ranges.values().any(|ids| ids.contains(&id))
    }

    /// Monitored nodes, each once, in order of first appearance.
    pub fn monitored_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = Vec::new();
        for &id in self.ranges.values().flatten() {
            if !nodes.contains(&id) {
                nodes.push(id);
            }
        }
        nodes
    }

    pub fn entry(&self, id: NodeId) -> Option<&MonitorEntry> {
        self.entries.get(&id)
    }

    /// Record the values of `id` in `particles` if it is monitored.
    ///
    /// Nodes with a fixed value are recorded as a single point of weight one.
    pub fn record(
        &mut self,
        graph: &Graph,
        id: NodeId,
        iteration: usize,
        particles: &[Particle],
        weights: &[f64],
        ess: f64,
    ) -> Result<()> {
        if !self.is_monitored(id) {
            return Ok(());
        }
        if graph.is_fixed(id) {
            return self.record_fixed(graph, id, iteration);
        }
        let values = stack_values(graph, id, particles)?;
        self.insert(graph, id, iteration, values, weights, ess);
        Ok(())
    }

    /// Record already stacked values of `id`, one row per particle, if it is monitored.
    pub fn record_values(
        &mut self,
        graph: &Graph,
        id: NodeId,
        iteration: usize,
        values: &Array2<f64>,
        weights: &[f64],
        ess: f64,
    ) -> Result<()> {
        if !self.is_monitored(id) {
            return Ok(());
        }
        if graph.is_fixed(id) {
            return self.record_fixed(graph, id, iteration);
        }
        if values.nrows() != weights.len() || values.ncols() != dim_len(graph.dim(id)) {
            return Err(Error::DimensionMismatch {
                node: graph.name(id).to_string(),
                message: format!(
                    "{}x{} values for {} weights",
                    values.nrows(),
                    values.ncols(),
                    weights.len()
                ),
            });
        }
        self.insert(graph, id, iteration, values.clone(), weights, ess);
        Ok(())
    }

    fn record_fixed(&mut self, graph: &Graph, id: NodeId, iteration: usize) -> Result<()> {
        let len = dim_len(graph.dim(id));
        let value = graph.fixed_value(id).unwrap_or_default().to_vec();
        let values = Array2::from_shape_vec((1, len), value).map_err(|e| Error::DimensionMismatch {
            node: graph.name(id).to_string(),
            message: e.to_string(),
        })?;
        self.insert(graph, id, iteration, values, &[1.0], 1.0);
        Ok(())
    }

    fn insert(&mut self, graph: &Graph, id: NodeId, iteration: usize, values: Array2<f64>, weights: &[f64], ess: f64) {
        self.entries.insert(
            id,
            MonitorEntry {
                node: id,
                iteration,
                values,
                weights: Array1::from(weights.to_vec()),
                ess,
                discrete: graph.is_discrete(id),
            },
        );
    }

    /// Entries of the nodes in `range`, keyed by array index.
    fn entries_for(&self, graph: &Graph, range: &NodeRange) -> Result<Vec<(usize, &MonitorEntry)>> {
        range
            .resolve(graph)?
            .into_iter()
            .map(|(index, id)| {
                self.entries
                    .get(&id)
                    .filter(|_| self.is_monitored(id))
                    .map(|entry| (index, entry))
                    .ok_or_else(|| Error::NotMonitored(range.to_string()))
            })
            .collect()
    }

    /// Statistic `tag` of every node in `range`, shaped like the node (quantiles add a trailing
    /// axis).
    pub fn extract_stat(&self, graph: &Graph, range: &NodeRange, tag: &StatTag) -> Result<IndexMap<usize, ArrayD<f64>>> {
        let mut out = IndexMap::new();
        for (index, entry) in self.entries_for(graph, range)? {
            let dim = graph.dim(entry.node);
            let mut shape = dim.to_vec();
            let mut data = Vec::new();
            let per_component = match tag {
                StatTag::Quantiles(probs) => {
                    shape.push(probs.len());
                    probs.len()
                }
                _ => 1,
            };
            for k in 0..dim_len(dim) {
                let values = entry.stat(tag, k)?;
                debug_assert_eq!(values.len(), per_component);
                data.extend(values);
            }
            let array = ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| Error::DimensionMismatch {
                node: graph.name(entry.node).to_string(),
                message: e.to_string(),
            })?;
            out.insert(index, array);
        }
        Ok(out)
    }

    /// Density estimates of every scalar component of every node in `range`.
    pub fn extract_pdf(
        &self,
        graph: &Graph,
        range: &NodeRange,
        bins: usize,
        cache_fraction: f64,
    ) -> Result<IndexMap<usize, Vec<Pdf>>> {
        let mut out = IndexMap::new();
        for (index, entry) in self.entries_for(graph, range)? {
            let pdfs = (0..entry.values.ncols())
                .map(|k| entry.pdf(k, bins, cache_fraction))
                .collect();
            out.insert(index, pdfs);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_parse_ranges() {
        let r: NodeRange = "x[0:3]".parse().unwrap();
        assert_eq!(r.range, Some((0, 3)));
        assert_eq!(r.to_string(), "x[0:3]");
        let r: NodeRange = " x[2] ".parse().unwrap();
        assert_eq!(r.range, Some((2, 3)));
        assert_eq!(r.to_string(), "x[2]");
        assert_eq!("mu".parse::<NodeRange>().unwrap(), NodeRange::whole("mu"));
        assert!("x[a]".parse::<NodeRange>().is_err());
        assert!("x[1".parse::<NodeRange>().is_err());
        assert!("[1]".parse::<NodeRange>().is_err());
    }

    fn graph() -> (Graph, Vec<NodeId>) {
        let cat = Catalog::builtin();
        let dnorm = cat.distribution("dnorm").unwrap();
        let mut g = Graph::new();
        let zero = g.add_constant_node("zero", vec![1], vec![0.0]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let a = g.add_stochastic_node("a", dnorm.clone(), vec![zero, one], None, None, None).unwrap();
        let b = g.add_stochastic_node("b", dnorm, vec![zero, one], None, None, None).unwrap();
        g.build().unwrap();
        g.bind_array("x", vec![a, b, zero]).unwrap();
        (g, vec![a, b, zero])
    }

    #[test]
    fn test_record_and_extract() {
        let (g, ids) = graph();
        let mut monitors = MonitorSet::new();
        monitors.add(&g, "x[0:2]".parse().unwrap()).unwrap();
        monitors.add(&g, "x[2]".parse().unwrap()).unwrap();
        assert!(monitors.add(&g, "x[1:5]".parse().unwrap()).is_err());
        assert_eq!(monitors.monitored_nodes(), ids);

        let particles: Vec<Particle> = [1.0, 2.0, 4.0]
            .iter()
            .map(|&v| {
                let mut p = Particle::new(g.len());
                p.set(ids[0], vec![v]);
                p.set(ids[1], vec![-v]);
                p
            })
            .collect();
        let weights = [0.25, 0.25, 0.5];
        for &id in &ids {
            monitors.record(&g, id, 0, &particles, &weights, 2.67).unwrap();
        }

        let range = NodeRange::whole("x");
        let means = monitors.extract_stat(&g, &range, &StatTag::Mean).unwrap();
        assert_eq!(means.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!((means[&0][[0]] - 2.75).abs() < 1e-12);
        assert!((means[&1][[0]] + 2.75).abs() < 1e-12);
        assert_eq!(means[&2][[0]], 0.0);

        let q = monitors
            .extract_stat(&g, &"x[0]".parse().unwrap(), &StatTag::Quantiles(vec![0.1, 0.5, 0.9]))
            .unwrap();
        assert_eq!(q[&0].shape(), &[1, 3]);
        assert_eq!(q[&0][[0, 1]], 2.0);

        assert!(monitors.extract_stat(&g, &range, &StatTag::Mode).is_err());
        let pdf = monitors.extract_pdf(&g, &"x[0]".parse().unwrap(), 4, 1.0).unwrap();
        assert_eq!(pdf[&0][0].x.len(), 4);

        monitors.clear_entries();
        assert!(matches!(
            monitors.extract_stat(&g, &range, &StatTag::Mean),
            Err(Error::NotMonitored(_))
        ));
    }

    #[test]
    fn test_record_stacked_values() {
        let (g, ids) = graph();
        let mut monitors = MonitorSet::new();
        monitors.add(&g, "x".parse().unwrap()).unwrap();
        let values = Array2::from_shape_vec((2, 1), vec![1.0, 3.0]).unwrap();
        monitors.record_values(&g, ids[0], 4, &values, &[0.5, 0.5], 2.0).unwrap();
        monitors.record_values(&g, ids[2], 4, &values, &[0.5, 0.5], 2.0).unwrap();
        assert!(monitors.record_values(&g, ids[1], 4, &values, &[1.0], 1.0).is_err());

        let entry = monitors.entry(ids[0]).unwrap();
        assert_eq!(entry.iteration, 4);
        let means = monitors
            .extract_stat(&g, &"x[0]".parse().unwrap(), &StatTag::Mean)
            .unwrap();
        assert!((means[&0][[0]] - 2.0).abs() < 1e-12);
        // the constant is kept as a single point
        assert_eq!(monitors.entry(ids[2]).unwrap().values.nrows(), 1);
    }

    #[test]
    fn test_unmonitored_range() {
        let (g, ids) = graph();
        let mut monitors = MonitorSet::new();
        monitors.add(&g, "x[0]".parse().unwrap()).unwrap();
        let particles = vec![Particle::new(g.len()); 2];
        monitors.record(&g, ids[1], 0, &particles, &[0.5, 0.5], 2.0).unwrap();
        assert!(monitors.entry(ids[1]).is_none());
        assert!(matches!(
            monitors.extract_stat(&g, &"x[1]".parse().unwrap(), &StatTag::Mean),
            Err(Error::NotMonitored(_))
        ));
    }
}
