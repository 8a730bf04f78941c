//! Run settings of the forward sampler and the monitors.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resample::ResampleType;

/// Settings of one SMC run.
///
/// Every field has a default, so a JSON document only needs the fields it overrides:
///
/// ```
/// use smc::SmcConfig;
///
/// let config = SmcConfig::from_json(r#"{ "n_particles": 500, "resample_type": "systematic" }"#).unwrap();
/// assert_eq!(config.n_particles, 500);
/// assert_eq!(config.seed, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcConfig {
    #[serde(default = "default_n_particles")]
    pub n_particles: usize,

    #[serde(default)]
    pub seed: u64,

    #[serde(default)]
    pub resample_type: ResampleType,

    /// Resample when ESS / N falls below this fraction.
    #[serde(default = "default_ess_threshold")]
    pub ess_threshold: f64,

    /// Sample every node from its prior, bypassing the conjugate samplers.
    #[serde(default)]
    pub prior_only: bool,

    /// Keep the values set by every iteration and the resampling ancestry; the backward smoother
    /// needs them.
    #[serde(default = "default_keep_history")]
    pub keep_history: bool,

    /// Suggested number of histogram bins for the density extractors.
    #[serde(default = "default_pdf_bins")]
    pub pdf_bins: usize,

    /// Suggested share of the samples cached to fix the histogram range.
    #[serde(default = "default_cache_fraction")]
    pub cache_fraction: f64,
}

fn default_n_particles() -> usize {
    1000
}

fn default_ess_threshold() -> f64 {
    0.5
}

fn default_keep_history() -> bool {
    true
}

fn default_pdf_bins() -> usize {
    40
}

fn default_cache_fraction() -> f64 {
    0.25
}

impl Default for SmcConfig {
    fn default() -> Self {
        Self {
            n_particles: default_n_particles(),
            seed: 0,
            resample_type: ResampleType::default(),
            ess_threshold: default_ess_threshold(),
            prior_only: false,
            keep_history: default_keep_history(),
            pdf_bins: default_pdf_bins(),
            cache_fraction: default_cache_fraction(),
        }
    }
}

impl SmcConfig {
    pub fn new(n_particles: usize, seed: u64) -> Self {
        Self {
            n_particles,
            seed,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_particles == 0 {
            return Err(Error::Config("n_particles must be positive".to_string()));
        }
        if !(self.ess_threshold > 0.0 && self.ess_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "ess_threshold must lie in (0, 1], got {}",
                self.ess_threshold
            )));
        }
        check_pdf_settings(self.pdf_bins, self.cache_fraction)
    }
}

/// Histogram settings of a density extraction: at least one bin, cache fraction in `(0, 1]`.
pub fn check_pdf_settings(num_bins: usize, cache_fraction: f64) -> Result<()> {
    if num_bins == 0 {
        return Err(Error::Config("pdf_bins must be positive".to_string()));
    }
    if !(cache_fraction > 0.0 && cache_fraction <= 1.0) {
        return Err(Error::Config(format!(
            "cache_fraction must lie in (0, 1], got {}",
            cache_fraction
        )));
    }
    Ok(())
}
