//! Resampling schemes drawing ancestor indices from normalized weights.

use std::fmt;
use std::str::FromStr;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleType {
    Multinomial,
    Residual,
    #[default]
    Stratified,
    Systematic,
}

impl FromStr for ResampleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "multinomial" => Ok(ResampleType::Multinomial),
            "residual" => Ok(ResampleType::Residual),
            "stratified" => Ok(ResampleType::Stratified),
            "systematic" => Ok(ResampleType::Systematic),
            other => Err(format!("unknown resampling method '{}'", other)),
        }
    }
}

impl fmt::Display for ResampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResampleType::Multinomial => "multinomial",
            ResampleType::Residual => "residual",
            ResampleType::Stratified => "stratified",
            ResampleType::Systematic => "systematic",
        };
        f.write_str(name)
    }
}

fn cumulative(weights: &[f64]) -> Vec<f64> {
    weights
        .iter()
        .scan(0.0, |acc, &w| {
            *acc += w;
            Some(*acc)
        })
        .collect()
}

/// Map increasing positions in `[0, total)` to indices through the cumulative weights.
fn walk(cumulative: &[f64], positions: impl Iterator<Item = f64>) -> Vec<usize> {
    let last = cumulative.len() - 1;
    let mut j = 0;
    positions
        .map(|u| {
            while j < last && cumulative[j] <= u {
                j += 1;
            }
            j
        })
        .collect()
}

fn multinomial(weights: &[f64], n: usize, rng: &mut dyn RngCore) -> Vec<usize> {
    let cum = cumulative(weights);
    let total = cum[cum.len() - 1];
    let mut u: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * total).collect();
    u.sort_by(f64::total_cmp);
    walk(&cum, u.into_iter())
}

/// Draw `n` ancestor indices given normalized `weights`.
///
/// The returned indices are sorted for every scheme.
pub fn resample_indices(
    resample_type: ResampleType,
    weights: &[f64],
    n: usize,
    rng: &mut dyn RngCore,
) -> Vec<usize> {
    if weights.is_empty() || n == 0 {
        return Vec::new();
    }
    match resample_type {
        ResampleType::Multinomial => multinomial(weights, n, rng),
        ResampleType::Stratified => {
            let cum = cumulative(weights);
            let total = cum[cum.len() - 1];
            let step = total / n as f64;
            let positions: Vec<f64> = (0..n)
                .map(|i| (i as f64 + rng.gen::<f64>()) * step)
                .collect();
            walk(&cum, positions.into_iter())
        }
        ResampleType::Systematic => {
            let cum = cumulative(weights);
            let total = cum[cum.len() - 1];
            let step = total / n as f64;
            let u: f64 = rng.gen();
            walk(&cum, (0..n).map(|i| (i as f64 + u) * step))
        }
        ResampleType::Residual => {
            let total: f64 = weights.iter().sum();
            let scaled: Vec<f64> = weights.iter().map(|w| w / total * n as f64).collect();
            let mut indices = Vec::with_capacity(n);
            for (i, s) in scaled.iter().enumerate() {
                indices.extend(std::iter::repeat(i).take(s.floor() as usize));
            }
            indices.truncate(n);
            let remaining = n - indices.len();
            if remaining > 0 {
                let residuals: Vec<f64> = scaled.iter().map(|s| s - s.floor()).collect();
                if residuals.iter().sum::<f64>() > 0.0 {
                    indices.extend(multinomial(&residuals, remaining, rng));
                } else {
                    indices.extend(multinomial(weights, remaining, rng));
                }
                indices.sort_unstable();
            }
            indices
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const WEIGHTS: [f64; 4] = [0.1, 0.2, 0.3, 0.4];
    const ALL: [ResampleType; 4] = [
        ResampleType::Multinomial,
        ResampleType::Residual,
        ResampleType::Stratified,
        ResampleType::Systematic,
    ];

    #[test]
    fn test_frequencies_follow_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let n = 100_000;
        for kind in ALL {
            let indices = resample_indices(kind, &WEIGHTS, n, &mut rng);
            assert_eq!(indices.len(), n);
            let mut counts = [0usize; 4];
            for i in indices {
                counts[i] += 1;
            }
            for (c, w) in counts.iter().zip(WEIGHTS) {
                let freq = *c as f64 / n as f64;
                assert!((freq - w).abs() < 0.01, "{}: {} vs {}", kind, freq, w);
            }
        }
    }

    #[test]
    fn test_low_variance_schemes() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = [0.15, 0.35, 0.05, 0.45];
        let n = 100;
        let trials = 500;
        let variance = |kind: ResampleType, rng: &mut StdRng| {
            let counts: Vec<f64> = (0..trials)
                .map(|_| {
                    resample_indices(kind, &weights, n, rng)
                        .iter()
                        .filter(|&&i| i == 1)
                        .count() as f64
                })
                .collect();
            let mean = counts.iter().sum::<f64>() / trials as f64;
            counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / trials as f64
        };
        let multinomial = variance(ResampleType::Multinomial, &mut rng);
        let stratified = variance(ResampleType::Stratified, &mut rng);
        let systematic = variance(ResampleType::Systematic, &mut rng);
        let residual = variance(ResampleType::Residual, &mut rng);
        // n p (1 - p) ≈ 22.75 for multinomial; the others stay below 1
        assert!(multinomial > 10.0);
        assert!(stratified < multinomial / 5.0);
        assert!(systematic < multinomial / 5.0);
        assert!(residual < multinomial / 5.0);
    }

    #[test]
    fn test_degenerate_weights() {
        let mut rng = StdRng::seed_from_u64(1);
        for kind in ALL {
            let indices = resample_indices(kind, &[0.0, 1.0, 0.0], 10, &mut rng);
            assert!(indices.iter().all(|&i| i == 1), "{}", kind);
        }
    }

    #[test]
    fn test_parse_resample_type() {
        assert_eq!("Systematic".parse::<ResampleType>().unwrap(), ResampleType::Systematic);
        assert!("bootstrap".parse::<ResampleType>().is_err());
        assert_eq!(ResampleType::Residual.to_string(), "residual");
    }
}
