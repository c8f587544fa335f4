use nalgebra::{DMatrix, DVector};

/// Floor added before taking logs and after normalising probabilities
pub const EPSILON: f64 = 1e-30;

/// ψ(x)
pub fn digamma(x: f64) -> f64 {
    use special::Gamma;
    x.digamma()
}

/// ln Γ(x)
pub fn ln_gamma(x: f64) -> f64 {
    use special::Gamma;
    x.ln_gamma().0
}

/// ψ'(x) for x > 0: shift by recurrence until x ≥ 6, then the
/// asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let ix = 1.0 / x;
    let ix2 = ix * ix;
    acc + ix
        + 0.5 * ix2
        + ix * ix2 * (1.0 / 6.0 - ix2 * (1.0 / 30.0 - ix2 * (1.0 / 42.0 - ix2 / 30.0)))
}

/// log Σ exp(x), stable for large magnitudes
pub fn logsumexp(xx: &[f64]) -> f64 {
    let max = xx.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + xx.iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}

/// Softmax of a vector in place, bumped by `EPSILON` and renormalised
pub fn additive_logistic(x: &mut DVector<f64>) {
    let max = x.max();
    x.apply(|v| *v = (*v - max).exp() + EPSILON);
    let tot = x.sum();
    *x /= tot;
}

/// Column-wise softmax of a matrix in place
pub fn additive_logistic_columns(x: &mut DMatrix<f64>) {
    for mut col in x.column_iter_mut() {
        let max = col.max();
        col.apply(|v| *v = (*v - max).exp() + EPSILON);
        let tot = col.sum();
        col /= tot;
    }
}

/// Normalise each row of a non-negative matrix to sum to one, after a
/// bump by `EPSILON`
pub fn normalize_rows(x: &mut DMatrix<f64>) {
    for mut row in x.row_iter_mut() {
        row.add_scalar_mut(EPSILON);
        let tot = row.sum();
        row /= tot;
    }
}

/// -Σ p log p, ignoring zero entries
pub fn entropy_categorical<'a, I>(pp: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    -pp.into_iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| p * p.ln())
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_trigamma_known_values() {
        // ψ'(1) = π²/6, ψ'(1/2) = π²/2
        let pi2 = std::f64::consts::PI.powi(2);
        assert_abs_diff_eq!(trigamma(1.0), pi2 / 6.0, epsilon = 1e-10);
        assert_abs_diff_eq!(trigamma(0.5), pi2 / 2.0, epsilon = 1e-10);
        // ψ'(x) - ψ'(x+1) = 1/x²
        let x = 3.7;
        assert_abs_diff_eq!(trigamma(x) - trigamma(x + 1.0), 1.0 / (x * x), epsilon = 1e-10);
    }

    #[test]
    fn test_logsumexp_is_stable() {
        let xx = [1000.0, 1000.0];
        assert_abs_diff_eq!(logsumexp(&xx), 1000.0 + 2f64.ln(), epsilon = 1e-12);
        let empty: [f64; 0] = [];
        assert_eq!(logsumexp(&empty), f64::NEG_INFINITY);
    }

    #[test]
    fn test_additive_logistic_columns_sum_to_one() {
        let mut x = DMatrix::from_column_slice(3, 2, &[0.0, 1.0, 2.0, -500.0, 0.0, 500.0]);
        additive_logistic_columns(&mut x);
        for col in x.column_iter() {
            assert_abs_diff_eq!(col.sum(), 1.0, epsilon = 1e-12);
            assert!(col.iter().all(|&p| p > 0.0));
        }
        assert!(x[(2, 0)] > x[(1, 0)]);
    }

    #[test]
    fn test_entropy_categorical() {
        let p = [0.5, 0.5, 0.0];
        assert_abs_diff_eq!(entropy_categorical(&p), 2f64.ln(), epsilon = 1e-12);
    }
}
