use crate::accumulator::TopicTermAccumulator;
use crate::common::*;
use crate::error::TopicError;
use crate::filter::TokenFilter;
use crate::lda::{assignment_entropy, thematic_log_likelihood, token_assignments};
use crate::train::{nothing_to_fit, TrainArgs, VariationalModel};
use matrix_param::special::logsumexp;
use rand::rngs::StdRng;
use rand::SeedableRng;

const LN_2PI: f64 = 1.837_877_066_409_345_5;
const MIN_STEP: f64 = 1e-10;

/// Correlated topic model: θ_d = softmax(η_d), η_d ~ N(μ, Σ).
///
/// Each document keeps a Gaussian posterior N(λ_d, diag(v_d)) and the
/// log-normaliser log ζ_d of the bound
/// `E[log Σ_k exp η_k] ≤ log ζ + Σ_k exp(λ_k + v_k/2)/ζ − 1`.
#[derive(Debug, Clone)]
pub struct Ctm {
    corpus: Arc<Corpus>,
    num_topics: usize,
    /// prior mean μ
    pub mu: DVec,
    /// prior covariance Σ
    pub sigma: Mat,
    inv_sigma: Mat,
    log_det_inv_sigma: f64,
    /// β and its accumulator
    pub topic_terms: TopicTermAccumulator,
    /// posterior means λ_d
    pub lambda: Vec<DVec>,
    /// posterior variances v_d
    pub vsq: Vec<DVec>,
    /// log ζ_d
    pub log_zeta: Vec<f64>,
    /// background filter of fCTM
    pub filter: Option<TokenFilter>,
    elbo: f64,
}

impl Ctm {
    /// Plain CTM with `k` topics: μ = 0, Σ = I, λ_d = 0, v_d = 1
    pub fn new(corpus: Arc<Corpus>, k: usize, rseed: u64) -> Result<Self, TopicError> {
        if k == 0 {
            return Err(TopicError::InvalidArgument("number of topics must be positive"));
        }
        corpus.check().map_err(|_| TopicError::InvalidCorpus)?;

        let mut rng = StdRng::seed_from_u64(rseed);
        let topic_terms = TopicTermAccumulator::random(k, corpus.vocab_size(), &mut rng);
        let m = corpus.len();
        Ok(Self {
            mu: DVec::zeros(k),
            sigma: Mat::identity(k, k),
            inv_sigma: Mat::identity(k, k),
            log_det_inv_sigma: 0.0,
            topic_terms,
            lambda: vec![DVec::zeros(k); m],
            vsq: vec![DVec::from_element(k, 1.0); m],
            log_zeta: vec![0.5 + (k as f64).ln(); m],
            filter: None,
            num_topics: k,
            corpus,
            elbo: 0.0,
        })
    }

    /// Filtered CTM (fCTM) with `k` topics
    pub fn filtered(corpus: Arc<Corpus>, k: usize, rseed: u64) -> Result<Self, TopicError> {
        let mut ret = Self::new(corpus, k, rseed)?;
        let mut rng = StdRng::seed_from_u64(rseed.wrapping_add(1));
        ret.filter = Some(TokenFilter::random(&ret.corpus, &mut rng));
        Ok(ret)
    }

    /// Σ⁻¹ cached at the last covariance update
    pub fn inv_sigma(&self) -> &Mat {
        &self.inv_sigma
    }

    /// Replace Σ and refresh the cached precision
    pub fn set_sigma(&mut self, sigma: Mat) {
        self.sigma = sigma;
        self.refresh_precision();
    }

    fn refresh_precision(&mut self) {
        if let Some(chol) = self.sigma.clone().cholesky() {
            self.log_det_inv_sigma = -2.0 * chol.l().diagonal().map(|x| x.ln()).sum();
            self.inv_sigma = chol.inverse();
            return;
        }
        let lu = self.sigma.clone().lu();
        let det = lu.determinant();
        match lu.try_inverse() {
            Some(inv) => {
                debug!("covariance is not positive definite; inverted by LU");
                self.inv_sigma = inv;
                self.log_det_inv_sigma = -det.abs().ln();
            }
            None => warn!("covariance is singular; keeping the previous precision"),
        }
    }

    fn token_range(&self, d: usize) -> std::ops::Range<usize> {
        let offsets = self.corpus.token_offsets();
        offsets[d]..offsets[d + 1]
    }

    fn doc_elbo(&self, d: usize) -> f64 {
        let k = self.num_topics as f64;
        let doc = self.corpus.document(d);
        let range = self.token_range(d);
        let counts = count_vector(&doc);
        let total = counts.sum();
        let log_topics = self.topic_terms.log_topics();
        let (lambda, vsq, log_zeta) = (&self.lambda[d], &self.vsq[d], self.log_zeta[d]);

        let tau = self.filter.as_ref().map(|f| f.tau_range(range.clone()));
        let phi = token_assignments(doc.terms, log_topics, lambda, tau);

        let dev = lambda - &self.mu;
        let trace: f64 = (0..self.num_topics)
            .map(|i| self.inv_sigma[(i, i)] * vsq[i])
            .sum();
        let elogpeta = 0.5 * self.log_det_inv_sigma
            - 0.5 * k * LN_2PI
            - 0.5 * (trace + dev.dot(&(&self.inv_sigma * &dev)));

        let expected_norm: f64 = lambda
            .iter()
            .zip(vsq.iter())
            .map(|(l, v)| (l + 0.5 * v - log_zeta).exp())
            .sum();
        let elogpz = (&phi * &counts).dot(lambda) - total * (expected_norm - 1.0 + log_zeta);

        let elogpw = match &self.filter {
            Some(filter) => filter.doc_elbo(range.start, doc.terms, doc.counts, &phi, log_topics),
            None => thematic_log_likelihood(&phi, doc.terms, &counts, log_topics),
        };

        let entropy_eta = 0.5 * vsq.iter().map(|v| v.ln() + LN_2PI + 1.0).sum::<f64>();
        elogpeta + elogpz + elogpw + entropy_eta + assignment_entropy(&phi, &counts)
    }
}

/// The part of the ELBO that depends on λ when v and log ζ are fixed:
/// `−½(λ − μ)ᵀΣ⁻¹(λ − μ) + Σ_j c_j φ_jᵀλ − C Σ_k exp(λ_k + v_k/2 − log ζ)`
fn lambda_objective(
    lambda: &DVec,
    vsq: &DVec,
    log_zeta: f64,
    mu: &DVec,
    inv_sigma: &Mat,
    phi_counts: &DVec,
    total: f64,
) -> f64 {
    let dev = lambda - mu;
    let expected: f64 = lambda
        .iter()
        .zip(vsq.iter())
        .map(|(l, v)| (l + 0.5 * v - log_zeta).exp())
        .sum();
    -0.5 * dev.dot(&(inv_sigma * &dev)) + phi_counts.dot(lambda) - total * expected
}

/// Damped Newton on λ with v and log ζ fixed:
///
/// ```text
/// grad = Σ⁻¹(μ − λ) + Σ_j c_j φ_j − C exp(λ + v/2 − log ζ)
/// −H   = Σ⁻¹ + C diag(exp(λ + v/2 − log ζ))
/// ```
///
/// The step is halved until the objective no longer decreases.
#[allow(clippy::too_many_arguments)]
fn newton_lambda(
    lambda: &mut DVec,
    vsq: &DVec,
    log_zeta: f64,
    mu: &DVec,
    inv_sigma: &Mat,
    phi_counts: &DVec,
    total: f64,
    niter: usize,
    ntol: f64,
) {
    for it in 0..niter {
        let expected = lambda.zip_map(vsq, |l, v| (l + 0.5 * v - log_zeta).exp());
        let grad = inv_sigma * (mu - &*lambda) + phi_counts - &expected * total;
        if grad.norm() < ntol {
            return;
        }

        let mut neg_hess = inv_sigma.clone();
        for i in 0..lambda.len() {
            neg_hess[(i, i)] += total * expected[i];
        }

        let step = match neg_hess.clone().cholesky() {
            Some(chol) => Some(chol.solve(&grad)),
            None => neg_hess.lu().solve(&grad),
        };
        let step = match step {
            Some(step) if step.iter().all(|x| x.is_finite()) => step,
            _ => {
                debug!("λ Newton: singular Hessian at iteration {}", it);
                return;
            }
        };

        let objective = |x: &DVec| lambda_objective(x, vsq, log_zeta, mu, inv_sigma, phi_counts, total);
        let current = objective(&*lambda);
        let mut rho = 1.0;
        loop {
            let next = &*lambda + &step * rho;
            let value = objective(&next);
            if value.is_finite() && value >= current {
                *lambda = next;
                break;
            }
            rho *= 0.5;
            if rho < MIN_STEP {
                debug!("λ Newton: no ascent step at iteration {}", it);
                return;
            }
        }
    }
    debug!("λ Newton reached {} iterations", niter);
}

/// Per-coordinate Newton on v with backtracking that keeps v > 0:
///
/// ```text
/// grad_i = −½ (Σ⁻¹_ii + C e_i − 1/v_i)
/// hess_i = −(¼ C e_i + ½ / v_i²),   e_i = exp(λ_i + v_i/2 − log ζ)
/// ```
fn newton_vsq(
    vsq: &mut DVec,
    lambda: &DVec,
    log_zeta: f64,
    inv_sigma: &Mat,
    total: f64,
    niter: usize,
    ntol: f64,
) {
    for i in 0..vsq.len() {
        let mut v = vsq[i];
        for _ in 0..niter {
            let e = (lambda[i] + 0.5 * v - log_zeta).exp();
            let grad = -0.5 * (inv_sigma[(i, i)] + total * e - 1.0 / v);
            if grad.abs() < ntol {
                break;
            }
            let invhess = -1.0 / (0.25 * total * e + 0.5 / (v * v));
            let step = invhess * grad;

            let mut rho = 1.0;
            while v - rho * step <= 0.0 {
                rho *= 0.5;
            }
            let next = v - rho * step;
            if !next.is_finite() {
                break;
            }
            v = next;
        }
        vsq[i] = v;
    }
}

impl VariationalModel for Ctm {
    fn name(&self) -> &'static str {
        if self.filter.is_some() {
            "fCTM"
        } else {
            "CTM"
        }
    }

    fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    fn num_topics(&self) -> usize {
        self.num_topics
    }

    fn epoch(&mut self, args: &TrainArgs) {
        let k = self.num_topics;
        let vtol = args.local_tol(k);
        let ntol = args.newton_tol(k);
        let corpus = self.corpus.clone();
        if nothing_to_fit(&corpus) {
            return;
        }
        let offsets = corpus.token_offsets();

        for (d, doc) in corpus.iter().enumerate() {
            let range = offsets[d]..offsets[d + 1];
            let counts = count_vector(&doc);
            let total = counts.sum();
            let log_topics = self.topic_terms.log_topics();

            let mut phi = Mat::zeros(k, doc.len());
            for _ in 0..args.viter {
                let tau = self.filter.as_ref().map(|f| f.tau_range(range.clone()));
                phi = token_assignments(doc.terms, log_topics, &self.lambda[d], tau);

                if let Some(filter) = self.filter.as_mut() {
                    filter.update_tau(range.start, doc.terms, &phi, log_topics);
                }

                let before = self.lambda[d].clone();
                let phi_counts = &phi * &counts;
                newton_lambda(
                    &mut self.lambda[d],
                    &self.vsq[d],
                    self.log_zeta[d],
                    &self.mu,
                    &self.inv_sigma,
                    &phi_counts,
                    total,
                    args.niter,
                    ntol,
                );
                newton_vsq(
                    &mut self.vsq[d],
                    &self.lambda[d],
                    self.log_zeta[d],
                    &self.inv_sigma,
                    total,
                    args.niter,
                    ntol,
                );
                let shifted: Vec<f64> = self.lambda[d]
                    .iter()
                    .zip(self.vsq[d].iter())
                    .map(|(l, v)| l + 0.5 * v)
                    .collect();
                self.log_zeta[d] = logsumexp(&shifted);

                if (&self.lambda[d] - before).norm() < vtol {
                    break;
                }
            }

            for (j, &t) in doc.terms.iter().enumerate() {
                let tau = self.filter.as_ref().map(|f| f.tau()[range.start + j]).unwrap_or(1.0);
                let weights = phi.column(j) * (tau * counts[j]);
                self.topic_terms.add_column(t as usize - 1, &weights);
            }
            if let Some(filter) = self.filter.as_mut() {
                filter.accumulate(range.start, doc.terms, doc.counts);
            }
        }

        self.topic_terms.finalize();
        if let Some(filter) = self.filter.as_mut() {
            filter.finalize();
        }

        let m = corpus.len() as f64;
        let mu = self.lambda.iter().fold(DVec::zeros(k), |acc, x| acc + x) / m;
        let mut sigma = Mat::zeros(k, k);
        for (lambda, vsq) in self.lambda.iter().zip(&self.vsq) {
            let dev = lambda - &mu;
            sigma += &dev * dev.transpose();
            for i in 0..k {
                sigma[(i, i)] += vsq[i];
            }
        }
        self.mu = mu;
        self.set_sigma(sigma / m);
    }

    fn update_elbo(&mut self) -> f64 {
        self.elbo = (0..self.corpus.len()).map(|d| self.doc_elbo(d)).sum();
        self.elbo
    }

    fn elbo(&self) -> f64 {
        self.elbo
    }

    fn topic_dist(&self, d: usize) -> DVec {
        let mut theta = self.lambda[d].clone();
        matrix_param::special::additive_logistic(&mut theta);
        theta
    }

    fn topic_term(&self) -> Mat {
        self.topic_terms.topics().clone()
    }
}
