/// Computes log-sum-exp of a slice of f64 values using the "log-sum-exp trick".
///
/// Returns `-inf` for an empty slice or when every entry is `-inf`.
pub fn logsumexp(x: &[f64]) -> f64 {
    let mx = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if mx == f64::NEG_INFINITY || mx.is_nan() {
        return mx;
    }
    if mx == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum_exp: f64 = x.iter().map(|&lp| (lp - mx).exp()).sum();
    mx + sum_exp.ln()
}

/// `log(exp(a) + exp(b))` without overflow.
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if lo == f64::NEG_INFINITY {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Normalize log weights in place so that `exp` of them sums to one.
///
/// Returns the log of the normalizing sum.
pub fn normalize_log_weights(log_weights: &mut [f64]) -> f64 {
    let lse = logsumexp(log_weights);
    if lse.is_finite() {
        for lw in log_weights.iter_mut() {
            *lw -= lse;
        }
    }
    lse
}

/// Effective sample size `1 / Σ w²` of normalized log weights.
pub fn effective_sample_size(log_weights: &[f64]) -> f64 {
    let sum_sq: f64 = log_weights.iter().map(|&lw| (2.0 * lw).exp()).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// Product of the entries of a dimension vector.
pub fn dim_len(dim: &[usize]) -> usize {
    dim.iter().product()
}

/// Whether every entry of `values` is integer valued.
pub fn all_integer(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite() && v.fract() == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logsumexp() {
        let x = [0.0f64.ln(), 1.0f64.ln(), 3.0f64.ln()];
        assert!((logsumexp(&x) - 4.0f64.ln()).abs() < 1e-12);

        let big = [1000.0, 1000.0];
        assert!((logsumexp(&big) - (1000.0 + 2.0f64.ln())).abs() < 1e-9);

        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
        assert_eq!(logsumexp(&[f64::NEG_INFINITY; 3]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_log_add_exp() {
        assert!((log_add_exp(1.0f64.ln(), 3.0f64.ln()) - 4.0f64.ln()).abs() < 1e-12);
        assert_eq!(log_add_exp(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert_eq!(log_add_exp(f64::NEG_INFINITY, 2.0), 2.0);
        assert!((log_add_exp(1000.0, 1000.0) - (1000.0 + 2.0f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_and_ess() {
        let mut lw = vec![0.0; 4];
        let lse = normalize_log_weights(&mut lw);
        assert!((lse - 4.0f64.ln()).abs() < 1e-12);
        assert!((effective_sample_size(&lw) - 4.0).abs() < 1e-9);

        let mut skewed = vec![0.0, f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
        normalize_log_weights(&mut skewed);
        assert!((effective_sample_size(&skewed) - 1.0).abs() < 1e-12);
    }
}
