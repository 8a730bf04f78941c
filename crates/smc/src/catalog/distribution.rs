use std::fmt::Debug;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use num_traits::ToPrimitive;
use rand::distributions::{Distribution as RandDistribution, WeightedIndex};
use rand::{Rng, RngCore};
use statrs::distribution::{
    Bernoulli, Beta, Binomial, Categorical, Continuous, ContinuousCDF, Discrete, DiscreteCDF,
    Gamma, Normal, Poisson, Uniform,
};

use super::ParamRef;
use crate::matrix;
use crate::utils::dim_len;

/// Largest support a discrete distribution is allowed to enumerate.
pub const MAX_ENUMERATION: u64 = 100_000;

const MAX_REJECTIONS: usize = 10_000;

/// Truncation bounds of a stochastic node, already evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bounds {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_bounded(&self) -> bool {
        self.lower.is_some() || self.upper.is_some()
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lower.map_or(true, |l| x >= l) && self.upper.map_or(true, |u| x <= u)
    }
}

/// Contract every distribution of the catalog implements.
///
/// Values and parameters are flat row-major arrays; see [`ParamRef`].
pub trait Distribution: Debug + Send + Sync {
    /// Stable name used for lookup and conjugacy detection (e.g. `"dnorm"`).
    fn name(&self) -> &str;

    fn num_params(&self) -> usize;

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool;

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String>;

    /// Dimension of a draw given the parameter dimensions.
    fn dim(&self, dims: &[&[usize]]) -> Vec<usize>;

    fn sample(
        &self,
        params: &[ParamRef],
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String>;

    fn log_density(&self, x: &[f64], params: &[ParamRef], bounds: Bounds) -> Result<f64, String>;

    fn is_discrete_valued(&self, discrete_params: &[bool]) -> bool;

    /// Whether the support only depends on parameters flagged as fixed.
    fn is_support_fixed(&self, _fixed_params: &[bool]) -> bool {
        true
    }

    /// Inclusive integer support for finite discrete distributions.
    fn finite_support(&self, _params: &[ParamRef]) -> Option<(i64, i64)> {
        None
    }

    /// Whether the distribution accepts truncation bounds.
    fn can_bound(&self) -> bool {
        false
    }
}

/// All built-in distributions.
pub fn builtin_distributions() -> Vec<Arc<dyn Distribution>> {
    vec![
        Arc::new(UnivariateNormal::precision()),
        Arc::new(UnivariateNormal::variance()),
        Arc::new(MultivariateNormal::precision()),
        Arc::new(MultivariateNormal::covariance()),
        Arc::new(BetaDist),
        Arc::new(GammaDist),
        Arc::new(UniformDist),
        Arc::new(BinomialDist),
        Arc::new(BernoulliDist),
        Arc::new(CategoricalDist),
        Arc::new(PoissonDist),
    ]
}

/// Names of the Gaussian families understood by the conjugate samplers.
pub const GAUSSIAN_FAMILIES: [&str; 4] = ["dnorm", "dnormvar", "dmnorm", "dmnormvar"];

pub fn is_gaussian(name: &str) -> bool {
    GAUSSIAN_FAMILIES.contains(&name)
}

/// Mean vector and covariance matrix of a Gaussian family given its parameters.
pub fn gaussian_moments(
    name: &str,
    params: &[ParamRef],
) -> Result<(DVector<f64>, DMatrix<f64>), String> {
    if params.len() != 2 {
        return Err(format!("{} expects 2 parameters", name));
    }
    let mean = DVector::from_column_slice(params[0].value);
    let cov = gaussian_covariance(name, params[1].value)?;
    if cov.nrows() != mean.len() {
        return Err("mean and covariance dimensions differ".to_string());
    }
    Ok((mean, cov))
}

/// Covariance matrix of a Gaussian family from its second parameter alone.
pub fn gaussian_covariance(name: &str, second: &[f64]) -> Result<DMatrix<f64>, String> {
    let m = matrix::square_from_row_slice(second)?;
    match name {
        "dnorm" | "dmnorm" => matrix::inverse_spd(m),
        "dnormvar" | "dmnormvar" => Ok(m),
        other => Err(format!("{} is not a Gaussian family", other)),
    }
}

fn scalar_dims(dims: &[&[usize]], n: usize) -> bool {
    dims.len() == n && dims.iter().all(|d| dim_len(d) == 1)
}

fn scalar_params<const N: usize>(params: &[ParamRef]) -> Result<[f64; N], String> {
    if params.len() != N {
        return Err(format!("expected {} parameters, found {}", N, params.len()));
    }
    let mut out = [0.0; N];
    for (slot, p) in out.iter_mut().zip(params) {
        *slot = p.scalar()?;
    }
    Ok(out)
}

fn scalar_value(x: &[f64]) -> Result<f64, String> {
    match x {
        [v] => Ok(*v),
        _ => Err(format!("expected a scalar value, found {} values", x.len())),
    }
}

/// Non-negative integer view of a value, `None` when fractional, negative or not finite.
pub fn as_count(x: f64) -> Option<u64> {
    if x.fract() == 0.0 {
        x.to_u64()
    } else {
        None
    }
}

fn sample_continuous<D>(dist: &D, bounds: Bounds, rng: &mut dyn RngCore) -> Result<f64, String>
where
    D: ContinuousCDF<f64, f64> + RandDistribution<f64>,
{
    if !bounds.is_bounded() {
        return Ok(dist.sample(&mut *rng));
    }
    let lo = bounds.lower.map_or(0.0, |l| dist.cdf(l));
    let hi = bounds.upper.map_or(1.0, |u| dist.cdf(u));
    if !(hi > lo) {
        return Err("truncation interval has zero probability".to_string());
    }
    let u: f64 = rng.gen();
    let mut x = dist.inverse_cdf(lo + u * (hi - lo));
    if let Some(l) = bounds.lower {
        x = x.max(l);
    }
    if let Some(h) = bounds.upper {
        x = x.min(h);
    }
    Ok(x)
}

fn log_density_continuous<D>(dist: &D, x: f64, bounds: Bounds) -> f64
where
    D: Continuous<f64, f64> + ContinuousCDF<f64, f64>,
{
    if !bounds.contains(x) {
        return f64::NEG_INFINITY;
    }
    let lp = dist.ln_pdf(x);
    if !bounds.is_bounded() {
        return lp;
    }
    let lo = bounds.lower.map_or(0.0, |l| dist.cdf(l));
    let hi = bounds.upper.map_or(1.0, |u| dist.cdf(u));
    lp - (hi - lo).ln()
}

/// Integer interval `[lo, hi]` of a discrete support intersected with the bounds.
fn bounded_interval(lo: u64, hi: Option<u64>, bounds: Bounds) -> (u64, Option<u64>) {
    let lo = match bounds.lower {
        Some(l) if l.ceil() > lo as f64 => l.ceil() as u64,
        _ => lo,
    };
    let hi = match (hi, bounds.upper) {
        (Some(h), Some(u)) => Some(h.min(u.floor().max(0.0) as u64)),
        (None, Some(u)) => Some(u.floor().max(0.0) as u64),
        (h, None) => h,
    };
    (lo, hi)
}

fn sample_enumerated(
    log_pmf: impl Fn(u64) -> f64,
    lo: u64,
    hi: u64,
    rng: &mut dyn RngCore,
) -> Result<f64, String> {
    if hi < lo {
        return Err("truncation interval is empty".to_string());
    }
    if hi - lo >= MAX_ENUMERATION {
        return Err(format!("support of size {} is too large to enumerate", hi - lo + 1));
    }
    let lps: Vec<f64> = (lo..=hi).map(log_pmf).collect();
    let mx = lps.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !mx.is_finite() {
        return Err("truncation interval has zero probability".to_string());
    }
    let weights: Vec<f64> = lps.iter().map(|lp| (lp - mx).exp()).collect();
    let index = WeightedIndex::new(&weights).map_err(|e| e.to_string())?;
    Ok((lo + index.sample(rng) as u64) as f64)
}

fn discrete_truncation_mass<D: DiscreteCDF<u64, f64>>(dist: &D, bounds: Bounds) -> f64 {
    let upper = match bounds.upper {
        Some(u) if u < 0.0 => 0.0,
        Some(u) => dist.cdf(u.floor() as u64),
        None => 1.0,
    };
    let lower = match bounds.lower {
        Some(l) if l.ceil() >= 1.0 => dist.cdf(l.ceil() as u64 - 1),
        _ => 0.0,
    };
    upper - lower
}

fn log_density_discrete<D>(dist: &D, x: f64, bounds: Bounds) -> f64
where
    D: Discrete<u64, f64> + DiscreteCDF<u64, f64>,
{
    let k = match as_count(x) {
        Some(k) if bounds.contains(x) => k,
        _ => return f64::NEG_INFINITY,
    };
    let lp = dist.ln_pmf(k);
    if !bounds.is_bounded() {
        return lp;
    }
    lp - discrete_truncation_mass(dist, bounds).ln()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    Precision,
    Variance,
}

/// `dnorm(mean, precision)` and `dnormvar(mean, variance)`.
#[derive(Debug, Clone)]
pub struct UnivariateNormal {
    scale: Scale,
}

impl UnivariateNormal {
    pub fn precision() -> Self {
        Self { scale: Scale::Precision }
    }

    pub fn variance() -> Self {
        Self { scale: Scale::Variance }
    }

    fn law(&self, params: &[ParamRef]) -> Result<Normal, String> {
        let [mean, second] = scalar_params::<2>(params)?;
        let sd = match self.scale {
            Scale::Precision => 1.0 / second.sqrt(),
            Scale::Variance => second.sqrt(),
        };
        Normal::new(mean, sd).map_err(|e| format!("{}: {}", self.name(), e))
    }
}

impl Distribution for UnivariateNormal {
    fn name(&self) -> &str {
        match self.scale {
            Scale::Precision => "dnorm",
            Scale::Variance => "dnormvar",
        }
    }

    fn num_params(&self) -> usize {
        2
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        scalar_dims(dims, 2)
    }

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String> {
        let [mean, second] = scalar_params::<2>(params)?;
        if !mean.is_finite() {
            return Err(format!("mean must be finite, got {}", mean));
        }
        if !(second > 0.0 && second.is_finite()) {
            return Err(format!("{:?} must be positive, got {}", self.scale, second));
        }
        Ok(())
    }

    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }

    fn sample(
        &self,
        params: &[ParamRef],
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String> {
        let law = self.law(params)?;
        Ok(vec![sample_continuous(&law, bounds, rng)?])
    }

    fn log_density(&self, x: &[f64], params: &[ParamRef], bounds: Bounds) -> Result<f64, String> {
        let law = self.law(params)?;
        Ok(log_density_continuous(&law, scalar_value(x)?, bounds))
    }

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        false
    }

    fn can_bound(&self) -> bool {
        true
    }
}

/// `dmnorm(mean, precision)` and `dmnormvar(mean, covariance)`.
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
    scale: Scale,
}

impl MultivariateNormal {
    pub fn precision() -> Self {
        Self { scale: Scale::Precision }
    }

    pub fn covariance() -> Self {
        Self { scale: Scale::Variance }
    }

    fn moments(&self, params: &[ParamRef]) -> Result<(DVector<f64>, DMatrix<f64>), String> {
        gaussian_moments(self.name(), params)
    }
}

impl Distribution for MultivariateNormal {
    fn name(&self) -> &str {
        match self.scale {
            Scale::Precision => "dmnorm",
            Scale::Variance => "dmnormvar",
        }
    }

    fn num_params(&self) -> usize {
        2
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        if dims.len() != 2 || dims[0].len() != 1 {
            return false;
        }
        let d = dims[0][0];
        match dims[1] {
            [r, c] => *r == d && *c == d,
            [n] => d == 1 && *n == 1,
            _ => false,
        }
    }

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String> {
        if params.len() != 2 {
            return Err("expected 2 parameters".to_string());
        }
        if params[0].value.iter().any(|v| !v.is_finite()) {
            return Err("mean must be finite".to_string());
        }
        let m = matrix::square_from_row_slice(params[1].value)?;
        let asym = (&m - m.transpose()).amax();
        if asym > 1e-8 * m.amax().max(1.0) {
            return Err("matrix parameter is not symmetric".to_string());
        }
        matrix::cholesky(m).map(|_| ())
    }

    fn dim(&self, dims: &[&[usize]]) -> Vec<usize> {
        dims.first().map(|d| d.to_vec()).unwrap_or_else(|| vec![1])
    }

    fn sample(
        &self,
        params: &[ParamRef],
        _bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String> {
        let (mean, cov) = self.moments(params)?;
        let chol = matrix::cholesky(cov)?;
        Ok(matrix::sample_mvn(&mean, &chol, rng).iter().cloned().collect())
    }

    fn log_density(&self, x: &[f64], params: &[ParamRef], _bounds: Bounds) -> Result<f64, String> {
        let (mean, cov) = self.moments(params)?;
        if x.len() != mean.len() {
            return Err(format!("value has {} entries, expected {}", x.len(), mean.len()));
        }
        let chol = matrix::cholesky(cov)?;
        Ok(matrix::mvn_log_density(&DVector::from_column_slice(x), &mean, &chol))
    }

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        false
    }
}

/// `dbeta(a, b)`
#[derive(Debug, Clone)]
pub struct BetaDist;

impl BetaDist {
    fn law(params: &[ParamRef]) -> Result<Beta, String> {
        let [a, b] = scalar_params::<2>(params)?;
        Beta::new(a, b).map_err(|e| format!("dbeta: {}", e))
    }
}

impl Distribution for BetaDist {
    fn name(&self) -> &str {
        "dbeta"
    }

    fn num_params(&self) -> usize {
        2
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        scalar_dims(dims, 2)
    }

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String> {
        let [a, b] = scalar_params::<2>(params)?;
        if a > 0.0 && b > 0.0 && a.is_finite() && b.is_finite() {
            Ok(())
        } else {
            Err(format!("shape parameters must be positive, got ({}, {})", a, b))
        }
    }

    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }

    fn sample(
        &self,
        params: &[ParamRef],
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String> {
        Ok(vec![sample_continuous(&Self::law(params)?, bounds, rng)?])
    }

    fn log_density(&self, x: &[f64], params: &[ParamRef], bounds: Bounds) -> Result<f64, String> {
        let x = scalar_value(x)?;
        if !(0.0..=1.0).contains(&x) {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(log_density_continuous(&Self::law(params)?, x, bounds))
    }

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        false
    }

    fn can_bound(&self) -> bool {
        true
    }
}

/// `dgamma(shape, rate)`
#[derive(Debug, Clone)]
pub struct GammaDist;

impl GammaDist {
    fn law(params: &[ParamRef]) -> Result<Gamma, String> {
        let [shape, rate] = scalar_params::<2>(params)?;
        Gamma::new(shape, rate).map_err(|e| format!("dgamma: {}", e))
    }
}

impl Distribution for GammaDist {
    fn name(&self) -> &str {
        "dgamma"
    }

    fn num_params(&self) -> usize {
        2
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        scalar_dims(dims, 2)
    }

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String> {
        let [shape, rate] = scalar_params::<2>(params)?;
        if shape > 0.0 && rate > 0.0 && shape.is_finite() && rate.is_finite() {
            Ok(())
        } else {
            Err(format!("shape and rate must be positive, got ({}, {})", shape, rate))
        }
    }

    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }

    fn sample(
        &self,
        params: &[ParamRef],
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String> {
        Ok(vec![sample_continuous(&Self::law(params)?, bounds, rng)?])
    }

    fn log_density(&self, x: &[f64], params: &[ParamRef], bounds: Bounds) -> Result<f64, String> {
        let x = scalar_value(x)?;
        if x < 0.0 {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(log_density_continuous(&Self::law(params)?, x, bounds))
    }

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        false
    }

    fn can_bound(&self) -> bool {
        true
    }
}

/// `dunif(lower, upper)`
#[derive(Debug, Clone)]
pub struct UniformDist;

impl UniformDist {
    fn law(params: &[ParamRef]) -> Result<Uniform, String> {
        let [lower, upper] = scalar_params::<2>(params)?;
        Uniform::new(lower, upper).map_err(|e| format!("dunif: {}", e))
    }
}

impl Distribution for UniformDist {
    fn name(&self) -> &str {
        "dunif"
    }

    fn num_params(&self) -> usize {
        2
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        scalar_dims(dims, 2)
    }

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String> {
        let [lower, upper] = scalar_params::<2>(params)?;
        if lower < upper && lower.is_finite() && upper.is_finite() {
            Ok(())
        } else {
            Err(format!("lower must be below upper, got ({}, {})", lower, upper))
        }
    }

    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }

    fn sample(
        &self,
        params: &[ParamRef],
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String> {
        Ok(vec![sample_continuous(&Self::law(params)?, bounds, rng)?])
    }

    fn log_density(&self, x: &[f64], params: &[ParamRef], bounds: Bounds) -> Result<f64, String> {
        let law = Self::law(params)?;
        let [lower, upper] = scalar_params::<2>(params)?;
        let x = scalar_value(x)?;
        if x < lower || x > upper {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(log_density_continuous(&law, x, bounds))
    }

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        false
    }

    fn is_support_fixed(&self, fixed_params: &[bool]) -> bool {
        fixed_params.iter().all(|&f| f)
    }

    fn can_bound(&self) -> bool {
        true
    }
}

/// `dbin(p, n)`
#[derive(Debug, Clone)]
pub struct BinomialDist;

impl BinomialDist {
    fn law(params: &[ParamRef]) -> Result<(Binomial, u64), String> {
        let [p, n] = scalar_params::<2>(params)?;
        let n = as_count(n).ok_or_else(|| format!("dbin: size must be a count, got {}", n))?;
        let law = Binomial::new(p, n).map_err(|e| format!("dbin: {}", e))?;
        Ok((law, n))
    }
}

impl Distribution for BinomialDist {
    fn name(&self) -> &str {
        "dbin"
    }

    fn num_params(&self) -> usize {
        2
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        scalar_dims(dims, 2)
    }

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String> {
        let [p, _] = scalar_params::<2>(params)?;
        if !(0.0..=1.0).contains(&p) {
            return Err(format!("probability must lie in [0, 1], got {}", p));
        }
        Self::law(params).map(|_| ())
    }

    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }

    fn sample(
        &self,
        params: &[ParamRef],
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String> {
        let (law, n) = Self::law(params)?;
        if !bounds.is_bounded() {
            let draw: f64 = law.sample(&mut *rng);
            return Ok(vec![draw]);
        }
        let (lo, hi) = bounded_interval(0, Some(n), bounds);
        let hi = hi.unwrap_or(n);
        Ok(vec![sample_enumerated(|k| law.ln_pmf(k), lo, hi, rng)?])
    }

    fn log_density(&self, x: &[f64], params: &[ParamRef], bounds: Bounds) -> Result<f64, String> {
        let (law, _) = Self::law(params)?;
        Ok(log_density_discrete(&law, scalar_value(x)?, bounds))
    }

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        true
    }

    fn is_support_fixed(&self, fixed_params: &[bool]) -> bool {
        fixed_params.get(1).copied().unwrap_or(false)
    }

    fn finite_support(&self, params: &[ParamRef]) -> Option<(i64, i64)> {
        let n = params.get(1)?.scalar().ok()?;
        as_count(n).map(|n| (0, n as i64))
    }

    fn can_bound(&self) -> bool {
        true
    }
}

/// `dbern(p)`
#[derive(Debug, Clone)]
pub struct BernoulliDist;

impl BernoulliDist {
    fn law(params: &[ParamRef]) -> Result<Bernoulli, String> {
        let [p] = scalar_params::<1>(params)?;
        Bernoulli::new(p).map_err(|e| format!("dbern: {}", e))
    }
}

impl Distribution for BernoulliDist {
    fn name(&self) -> &str {
        "dbern"
    }

    fn num_params(&self) -> usize {
        1
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        scalar_dims(dims, 1)
    }

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String> {
        let [p] = scalar_params::<1>(params)?;
        if (0.0..=1.0).contains(&p) {
            Ok(())
        } else {
            Err(format!("probability must lie in [0, 1], got {}", p))
        }
    }

    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }

    fn sample(
        &self,
        params: &[ParamRef],
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String> {
        let law = Self::law(params)?;
        if !bounds.is_bounded() {
            let u: f64 = rng.gen();
            return Ok(vec![if u < law.p() { 1.0 } else { 0.0 }]);
        }
        let (lo, hi) = bounded_interval(0, Some(1), bounds);
        Ok(vec![sample_enumerated(|k| law.ln_pmf(k), lo, hi.unwrap_or(1), rng)?])
    }

    fn log_density(&self, x: &[f64], params: &[ParamRef], bounds: Bounds) -> Result<f64, String> {
        let law = Self::law(params)?;
        Ok(log_density_discrete(&law, scalar_value(x)?, bounds))
    }

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        true
    }

    fn finite_support(&self, _params: &[ParamRef]) -> Option<(i64, i64)> {
        Some((0, 1))
    }

    fn can_bound(&self) -> bool {
        true
    }
}

/// `dcat(p)` over the categories `1..=K`.
#[derive(Debug, Clone)]
pub struct CategoricalDist;

impl CategoricalDist {
    fn law(params: &[ParamRef]) -> Result<Categorical, String> {
        let p = params.first().ok_or("dcat expects 1 parameter")?;
        Categorical::new(p.value).map_err(|e| format!("dcat: {}", e))
    }

    /// Zero-based category of a one-based value.
    fn category(x: f64) -> Option<u64> {
        as_count(x).filter(|&k| k >= 1).map(|k| k - 1)
    }
}

impl Distribution for CategoricalDist {
    fn name(&self) -> &str {
        "dcat"
    }

    fn num_params(&self) -> usize {
        1
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 1 && dims[0].len() == 1
    }

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String> {
        let p = params.first().ok_or("dcat expects 1 parameter")?;
        if p.value.iter().any(|&v| !(v >= 0.0 && v.is_finite())) {
            return Err("probabilities must be non-negative".to_string());
        }
        if p.value.iter().sum::<f64>() <= 0.0 {
            return Err("probabilities must not all be zero".to_string());
        }
        Ok(())
    }

    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }

    fn sample(
        &self,
        params: &[ParamRef],
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String> {
        let law = Self::law(params)?;
        let k = params[0].len() as u64;
        if !bounds.is_bounded() {
            let index = WeightedIndex::new(params[0].value).map_err(|e| e.to_string())?;
            return Ok(vec![(index.sample(rng) + 1) as f64]);
        }
        let (lo, hi) = bounded_interval(1, Some(k), bounds);
        let draw = sample_enumerated(|c| law.ln_pmf(c - 1), lo, hi.unwrap_or(k), rng)?;
        Ok(vec![draw])
    }

    fn log_density(&self, x: &[f64], params: &[ParamRef], bounds: Bounds) -> Result<f64, String> {
        let law = Self::law(params)?;
        let x = scalar_value(x)?;
        let k = params[0].len() as u64;
        let category = match Self::category(x) {
            Some(c) if c < k && bounds.contains(x) => c,
            _ => return Ok(f64::NEG_INFINITY),
        };
        let lp = law.ln_pmf(category);
        if !bounds.is_bounded() {
            return Ok(lp);
        }
        let (lo, hi) = bounded_interval(1, Some(k), bounds);
        let mass: f64 = (lo..=hi.unwrap_or(k)).map(|c| law.pmf(c - 1)).sum();
        Ok(lp - mass.ln())
    }

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        true
    }

    fn finite_support(&self, params: &[ParamRef]) -> Option<(i64, i64)> {
        params.first().map(|p| (1, p.len() as i64))
    }

    fn can_bound(&self) -> bool {
        true
    }
}

/// `dpois(lambda)`
#[derive(Debug, Clone)]
pub struct PoissonDist;

impl PoissonDist {
    fn law(params: &[ParamRef]) -> Result<Poisson, String> {
        let [lambda] = scalar_params::<1>(params)?;
        Poisson::new(lambda).map_err(|e| format!("dpois: {}", e))
    }
}

impl Distribution for PoissonDist {
    fn name(&self) -> &str {
        "dpois"
    }

    fn num_params(&self) -> usize {
        1
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        scalar_dims(dims, 1)
    }

    fn check_param_values(&self, params: &[ParamRef]) -> Result<(), String> {
        let [lambda] = scalar_params::<1>(params)?;
        if lambda > 0.0 && lambda.is_finite() {
            Ok(())
        } else {
            Err(format!("rate must be positive, got {}", lambda))
        }
    }

    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }

    fn sample(
        &self,
        params: &[ParamRef],
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>, String> {
        let law = Self::law(params)?;
        match bounded_interval(0, None, bounds) {
            (_, None) if bounds.lower.is_none() => {
                let draw: f64 = law.sample(&mut *rng);
                Ok(vec![draw])
            }
            (lo, Some(hi)) => Ok(vec![sample_enumerated(|k| law.ln_pmf(k), lo, hi, rng)?]),
            (lo, None) => {
                for _ in 0..MAX_REJECTIONS {
                    let draw: f64 = law.sample(&mut *rng);
                    if draw >= lo as f64 {
                        return Ok(vec![draw]);
                    }
                }
                Err(format!("dpois: no draw above {} after {} attempts", lo, MAX_REJECTIONS))
            }
        }
    }

    fn log_density(&self, x: &[f64], params: &[ParamRef], bounds: Bounds) -> Result<f64, String> {
        let law = Self::law(params)?;
        Ok(log_density_discrete(&law, scalar_value(x)?, bounds))
    }

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        true
    }

    fn can_bound(&self) -> bool {
        true
    }
}
