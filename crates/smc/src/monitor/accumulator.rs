//! Streaming statistics over weighted samples.
//!
//! Every accumulator is fed one `(value, weight)` pair at a time and only keeps what its
//! statistic needs.

use std::collections::BTreeMap;

/// Weighted quantile of a small sample by sorting: the smallest value whose cumulative weight
/// reaches `p` of the total.
pub fn weighted_quantile(samples: &[(f64, f64)], p: f64) -> f64 {
    let mut sorted: Vec<(f64, f64)> = samples.iter().copied().filter(|&(_, w)| w > 0.0).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = sorted.iter().map(|&(_, w)| w).sum();
    let target = p * total;
    let mut cumulative = 0.0;
    for &(x, w) in &sorted {
        cumulative += w;
        if cumulative >= target {
            return x;
        }
    }
    sorted[sorted.len() - 1].0
}

/// Weighted mean, variance, skewness and excess kurtosis by pairwise central moment updates.
#[derive(Debug, Clone, Default)]
pub struct WeightedMoments {
    weight: f64,
    mean: f64,
    m2: f64,
    m3: f64,
    m4: f64,
}

impl WeightedMoments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64, w: f64) {
        if w <= 0.0 {
            return;
        }
        let wa = self.weight;
        let n = wa + w;
        let delta = x - self.mean;
        let delta_n = delta * w / n;

        self.m4 += wa * w * (wa * wa - wa * w + w * w) * delta.powi(4) / n.powi(3)
            + 6.0 * delta * delta * w * w * self.m2 / (n * n)
            - 4.0 * delta * w * self.m3 / n;
        self.m3 += wa * w * (wa - w) * delta.powi(3) / (n * n) - 3.0 * delta * w * self.m2 / n;
        self.m2 += wa * w * delta * delta / n;
        self.mean += delta_n;
        self.weight = n;
    }

    pub fn total_weight(&self) -> f64 {
        self.weight
    }

    pub fn mean(&self) -> f64 {
        if self.weight > 0.0 {
            self.mean
        } else {
            f64::NAN
        }
    }

    pub fn variance(&self) -> f64 {
        if self.weight > 0.0 {
            self.m2 / self.weight
        } else {
            f64::NAN
        }
    }

    pub fn skewness(&self) -> f64 {
        let var = self.variance();
        (self.m3 / self.weight) / var.powf(1.5)
    }

    pub fn kurtosis(&self) -> f64 {
        let var = self.variance();
        (self.m4 / self.weight) / (var * var) - 3.0
    }
}

const MARKERS: usize = 5;

/// P² quantile estimate (Jain & Chlamtac) with marker positions counted in weight.
///
/// Weights should be scaled to a mean of one; the marker adjustment steps by one unit of
/// weight. Until five samples are seen the exact weighted quantile is returned.
#[derive(Debug, Clone)]
pub struct WeightedPSquareQuantile {
    p: f64,
    heights: [f64; MARKERS],
    positions: [f64; MARKERS],
    increments: [f64; MARKERS],
    total: f64,
    buffer: Vec<(f64, f64)>,
}

impl WeightedPSquareQuantile {
    pub fn new(p: f64) -> Self {
        Self {
            p,
            heights: [0.0; MARKERS],
            positions: [0.0; MARKERS],
            increments: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
            total: 0.0,
            buffer: Vec::with_capacity(MARKERS),
        }
    }

    pub fn probability(&self) -> f64 {
        self.p
    }

    pub fn push(&mut self, x: f64, w: f64) {
        if w <= 0.0 || x.is_nan() {
            return;
        }
        if self.buffer.len() < MARKERS {
            self.buffer.push((x, w));
            if self.buffer.len() == MARKERS {
                self.start();
            }
            return;
        }

        let k = if x < self.heights[0] {
            self.heights[0] = x;
            0
        } else if x >= self.heights[MARKERS - 1] {
            self.heights[MARKERS - 1] = x;
            MARKERS - 2
        } else {
            (0..MARKERS - 1)
                .rev()
                .find(|&i| self.heights[i] <= x)
                .unwrap_or(0)
        };
        for i in k + 1..MARKERS {
            self.positions[i] += w;
        }
        self.total += w;
        self.adjust();
    }

    fn start(&mut self) {
        self.buffer.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut cumulative = 0.0;
        for (i, &(x, w)) in self.buffer.iter().enumerate() {
            cumulative += w;
            self.heights[i] = x;
            self.positions[i] = cumulative;
        }
        self.total = cumulative;
    }

    fn desired(&self, i: usize) -> f64 {
        let first = self.positions[0];
        first + self.increments[i] * (self.total - first)
    }

    fn adjust(&mut self) {
        for i in 1..MARKERS - 1 {
            let d = self.desired(i) - self.positions[i];
            let up = d >= 1.0 && self.positions[i + 1] - self.positions[i] > 1.0;
            let down = d <= -1.0 && self.positions[i - 1] - self.positions[i] < -1.0;
            if !(up || down) {
                continue;
            }
            let s = if up { 1.0 } else { -1.0 };
            let candidate = self.parabolic(i, s);
            self.heights[i] = if self.heights[i - 1] < candidate && candidate < self.heights[i + 1] {
                candidate
            } else {
                self.linear(i, s)
            };
            self.positions[i] += s;
        }
    }

    fn parabolic(&self, i: usize, s: f64) -> f64 {
        let (q, n) = (&self.heights, &self.positions);
        q[i] + s / (n[i + 1] - n[i - 1])
            * ((n[i] - n[i - 1] + s) * (q[i + 1] - q[i]) / (n[i + 1] - n[i])
                + (n[i + 1] - n[i] - s) * (q[i] - q[i - 1]) / (n[i] - n[i - 1]))
    }

    fn linear(&self, i: usize, s: f64) -> f64 {
        let j = if s > 0.0 { i + 1 } else { i - 1 };
        self.heights[i] + s * (self.heights[j] - self.heights[i]) / (self.positions[j] - self.positions[i])
    }

    pub fn quantile(&self) -> f64 {
        if self.buffer.len() < MARKERS {
            weighted_quantile(&self.buffer, self.p)
        } else {
            self.heights[2]
        }
    }
}

/// Histogram density estimate.
///
/// The first `cache_size` samples are held back to fix the histogram range; later samples
/// outside it fall into an underflow or overflow bin that is not reported.
#[derive(Debug, Clone)]
pub struct WeightedDensity {
    num_bins: usize,
    cache_size: usize,
    cache: Vec<(f64, f64)>,
    lower: f64,
    width: f64,
    bins: Vec<f64>,
    total: f64,
}

impl WeightedDensity {
    /// Histogram of `num_bins` bins over `expected` samples, caching `cache_fraction` of them.
    pub fn new(num_bins: usize, expected: usize, cache_fraction: f64) -> Self {
        let cache_size = ((cache_fraction * expected as f64).ceil() as usize).max(1);
        Self {
            num_bins: num_bins.max(1),
            cache_size,
            cache: Vec::with_capacity(cache_size),
            lower: 0.0,
            width: 0.0,
            bins: Vec::new(),
            total: 0.0,
        }
    }

    pub fn push(&mut self, x: f64, w: f64) {
        if w <= 0.0 || !x.is_finite() {
            return;
        }
        if self.bins.is_empty() {
            self.cache.push((x, w));
            if self.cache.len() >= self.cache_size {
                self.flush();
            }
        } else {
            self.add(x, w);
        }
    }

    fn flush(&mut self) {
        let (mut min, mut max) = self
            .cache
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(x, _)| (lo.min(x), hi.max(x)));
        if !min.is_finite() {
            return;
        }
        if min == max {
            min -= 0.5;
            max += 0.5;
        }
        self.lower = min;
        self.width = (max - min) / self.num_bins as f64;
        self.bins = vec![0.0; self.num_bins + 2];
        for (x, w) in std::mem::take(&mut self.cache) {
            self.add(x, w);
        }
    }

    fn add(&mut self, x: f64, w: f64) {
        let pos = (x - self.lower) / self.width;
        let index = if pos < 0.0 {
            0
        } else {
            // the range maximum belongs to the last inner bin
            (pos.floor() as usize).min(self.num_bins - 1) + 1
        };
        let index = if pos > self.num_bins as f64 { self.num_bins + 1 } else { index };
        self.bins[index] += w;
        self.total += w;
    }

    /// Bin centres and densities normalized by the total weight and the bin width.
    pub fn finish(mut self) -> (Vec<f64>, Vec<f64>) {
        if self.bins.is_empty() {
            self.flush();
        }
        if self.bins.is_empty() || self.total <= 0.0 {
            return (Vec::new(), Vec::new());
        }
        let centres = (0..self.num_bins)
            .map(|i| self.lower + (i as f64 + 0.5) * self.width)
            .collect();
        let density = self.bins[1..=self.num_bins]
            .iter()
            .map(|w| w / (self.total * self.width))
            .collect();
        (centres, density)
    }
}

/// Weighted frequency table of integer values.
#[derive(Debug, Clone, Default)]
pub struct DiscreteFrequency {
    table: BTreeMap<i64, f64>,
    total: f64,
}

impl DiscreteFrequency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64, w: f64) {
        if w <= 0.0 || !x.is_finite() {
            return;
        }
        *self.table.entry(x.round() as i64).or_insert(0.0) += w;
        self.total += w;
    }

    /// Most probable value, the smallest one on ties.
    pub fn mode(&self) -> f64 {
        let mut best: Option<(i64, f64)> = None;
        for (&k, &w) in &self.table {
            if best.map_or(true, |(_, bw)| w > bw) {
                best = Some((k, w));
            }
        }
        best.map_or(f64::NAN, |(k, _)| k as f64)
    }

    /// Values seen and their probabilities.
    pub fn pmf(&self) -> (Vec<f64>, Vec<f64>) {
        self.table
            .iter()
            .map(|(&k, &w)| (k as f64, w / self.total))
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use rand::distributions::Distribution;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use statrs::distribution::Normal;

    use super::*;

    fn normal_draws(rng: &mut StdRng, n: usize) -> Vec<f64> {
        let law = Normal::new(0.0, 1.0).unwrap();
        (0..n).map(|_| law.sample(rng)).collect()
    }

    #[test]
    fn test_moments_match_two_pass() {
        let mut rng = StdRng::seed_from_u64(3);
        let xs: Vec<f64> = (0..500).map(|_| rng.gen::<f64>().powi(2) * 4.0).collect();
        let ws: Vec<f64> = (0..500).map(|_| rng.gen::<f64>()).collect();
        let mut acc = WeightedMoments::new();
        for (&x, &w) in xs.iter().zip(&ws) {
            acc.push(x, w);
        }
        let total: f64 = ws.iter().sum();
        let mean = xs.iter().zip(&ws).map(|(x, w)| x * w).sum::<f64>() / total;
        let central = |k: i32| xs.iter().zip(&ws).map(|(x, w)| w * (x - mean).powi(k)).sum::<f64>() / total;
        let var = central(2);
        assert!((acc.mean() - mean).abs() < 1e-10);
        assert!((acc.variance() - var).abs() < 1e-10);
        assert!((acc.skewness() - central(3) / var.powf(1.5)).abs() < 1e-8);
        assert!((acc.kurtosis() - (central(4) / (var * var) - 3.0)).abs() < 1e-8);
    }

    #[test]
    fn test_p_square_median_of_normal() {
        let mut rng = StdRng::seed_from_u64(8);
        let draws = normal_draws(&mut rng, 20_000);
        let mut median = WeightedPSquareQuantile::new(0.5);
        let mut upper = WeightedPSquareQuantile::new(0.9);
        for &x in &draws {
            median.push(x, 1.0);
            upper.push(x, 1.0);
        }
        assert!(median.quantile().abs() < 0.05);
        assert!((upper.quantile() - 1.2816).abs() < 0.05);
    }

    #[test]
    fn test_p_square_respects_weights() {
        // uniform draws weighted by 2x: the weighted law has cdf x², median 1/√2
        let mut rng = StdRng::seed_from_u64(21);
        let mut q = WeightedPSquareQuantile::new(0.5);
        for _ in 0..20_000 {
            let x: f64 = rng.gen();
            q.push(x, 2.0 * x);
        }
        assert!((q.quantile() - 0.5f64.sqrt()).abs() < 0.03);

        let mut small = WeightedPSquareQuantile::new(0.5);
        small.push(3.0, 1.0);
        small.push(1.0, 0.1);
        assert_eq!(small.quantile(), 3.0);
    }

    #[test]
    fn test_density_integrates_to_one() {
        let mut rng = StdRng::seed_from_u64(12);
        let draws = normal_draws(&mut rng, 10_000);
        let mut density = WeightedDensity::new(30, draws.len(), 1.0);
        for &x in &draws {
            density.push(x, 1.0);
        }
        let (centres, values) = density.finish();
        assert_eq!(centres.len(), 30);
        let width = centres[1] - centres[0];
        let mass: f64 = values.iter().sum::<f64>() * width;
        assert!((mass - 1.0).abs() < 1e-9);
        let peak = centres[values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()];
        assert!(peak.abs() < 0.5);
    }

    #[test]
    fn test_density_of_constant_sample() {
        let mut density = WeightedDensity::new(4, 10, 0.5);
        for _ in 0..10 {
            density.push(2.0, 0.1);
        }
        let (centres, values) = density.finish();
        assert!((centres[0] - 1.625).abs() < 1e-12);
        assert!((values.iter().sum::<f64>() * 0.25 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_discrete_frequency() {
        let mut freq = DiscreteFrequency::new();
        freq.push(1.0, 0.2);
        freq.push(3.0, 0.5);
        freq.push(1.0, 0.3);
        freq.push(2.0, 0.0);
        assert_eq!(freq.mode(), 1.0);
        let (values, probs) = freq.pmf();
        assert_eq!(values, vec![1.0, 3.0]);
        assert!((probs[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_quantile() {
        let samples = [(1.0, 0.1), (2.0, 0.6), (3.0, 0.3)];
        assert_eq!(weighted_quantile(&samples, 0.05), 1.0);
        assert_eq!(weighted_quantile(&samples, 0.5), 2.0);
        assert_eq!(weighted_quantile(&samples, 0.71), 3.0);
    }
}
