use crate::special::{digamma, ln_gamma};
use nalgebra::DVector;
use rand::Rng;
use rand_distr::{Distribution, Gamma};

/// E[log θ] for θ ~ Dir(γ)
pub fn expected_log_dirichlet(gamma: &DVector<f64>) -> DVector<f64> {
    let psi_sum = digamma(gamma.sum());
    gamma.map(|g| digamma(g) - psi_sum)
}

/// Entropy of Dir(γ)
pub fn dirichlet_entropy(gamma: &DVector<f64>) -> f64 {
    let g0 = gamma.sum();
    let k = gamma.len() as f64;
    let ln_beta = gamma.iter().map(|&g| ln_gamma(g)).sum::<f64>() - ln_gamma(g0);
    ln_beta + (g0 - k) * digamma(g0) - gamma.iter().map(|&g| (g - 1.0) * digamma(g)).sum::<f64>()
}

/// E[log Dir(θ | α)] given E[log θ]
pub fn expected_log_dirichlet_prior(alpha: &DVector<f64>, elog_theta: &DVector<f64>) -> f64 {
    ln_gamma(alpha.sum()) - alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>()
        + alpha
            .iter()
            .zip(elog_theta.iter())
            .map(|(&a, &e)| (a - 1.0) * e)
            .sum::<f64>()
}

/// Draw θ ~ Dir(α) as normalised Gamma(α_k, 1) variables
pub fn sample_dirichlet<R: Rng>(alpha: &DVector<f64>, rng: &mut R) -> DVector<f64> {
    let mut theta = alpha.map(|a| match Gamma::new(a, 1.0) {
        Ok(gam) => gam.sample(rng),
        Err(_) => 0.0,
    });
    let tot = theta.sum();
    if tot > 0.0 {
        theta /= tot;
    } else {
        // every draw underflowed; fall back to the mean
        theta = alpha / alpha.sum();
    }
    theta
}
