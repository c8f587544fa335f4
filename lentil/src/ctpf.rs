//! Collaborative topic Poisson factorization.
//!
//! ```text
//! β_kv ~ Gamma(a, b)      term-topic
//! θ_dk ~ Gamma(c, d)      document-topic from content
//! η_uk ~ Gamma(e, f)      user-topic
//! ε_dk ~ Gamma(g, h)      document-topic from feedback
//! w_dv ~ Poisson(θ_d·β_v)
//! r_du ~ Poisson(η_u·(θ_d + ε_d))
//! ```
//!
//! Every Gamma factor is a K x N [`GammaMatrix`] whose rate is shared
//! across its columns.

use crate::common::*;
use crate::error::TopicError;
use crate::train::{nothing_to_fit, TrainArgs, VariationalModel};
use matrix_param::special::ln_gamma;
use matrix_param::{GammaMatrix, Inference, TwoStatParam};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Shape/rate hyperparameters of the four Gamma priors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CtpfPriors {
    /// a
    pub term_shape: f64,
    /// b
    pub term_rate: f64,
    /// c
    pub content_shape: f64,
    /// d
    pub content_rate: f64,
    /// e
    pub user_shape: f64,
    /// f
    pub user_rate: f64,
    /// g
    pub feedback_shape: f64,
    /// h
    pub feedback_rate: f64,
}

impl Default for CtpfPriors {
    fn default() -> Self {
        CtpfPriors {
            term_shape: 0.1,
            term_rate: 0.1,
            content_shape: 0.1,
            content_rate: 0.1,
            user_shape: 0.1,
            user_rate: 0.1,
            feedback_shape: 0.1,
            feedback_rate: 0.1,
        }
    }
}

impl CtpfPriors {
    fn all(&self) -> [f64; 8] {
        [
            self.term_shape,
            self.term_rate,
            self.content_shape,
            self.content_rate,
            self.user_shape,
            self.user_rate,
            self.feedback_shape,
            self.feedback_rate,
        ]
    }

    /// Every hyperparameter finite and positive
    pub fn is_valid(&self) -> bool {
        self.all().iter().all(|x| x.is_finite() && *x > 0.0)
    }
}

/// Collaborative topic Poisson factorization
#[derive(Debug, Clone)]
pub struct Ctpf {
    corpus: Arc<Corpus>,
    num_topics: usize,
    priors: CtpfPriors,
    /// β, K x V
    pub term_topic: GammaMatrix,
    /// η, K x U
    pub user_topic: GammaMatrix,
    /// θ, K x M
    pub doc_content: GammaMatrix,
    /// ε, K x M
    pub doc_feedback: GammaMatrix,
    elbo: f64,
}

/// Local assignments of one document
pub(crate) struct CtpfLocal {
    /// token-topic, K x n
    pub phi: Mat,
    /// rating-topic over [content; feedback], 2K x r
    pub xi: Mat,
}

impl Ctpf {
    /// CTPF with `k` topics and default priors
    pub fn new(corpus: Arc<Corpus>, k: usize, rseed: u64) -> Result<Self, TopicError> {
        Self::with_priors(corpus, k, CtpfPriors::default(), rseed)
    }

    /// CTPF with `k` topics and explicit priors
    pub fn with_priors(
        corpus: Arc<Corpus>,
        k: usize,
        priors: CtpfPriors,
        rseed: u64,
    ) -> Result<Self, TopicError> {
        if k == 0 {
            return Err(TopicError::InvalidArgument("number of topics must be positive"));
        }
        if !priors.is_valid() {
            return Err(TopicError::InvalidArgument("Gamma hyperparameters must be positive"));
        }
        corpus.check().map_err(|_| TopicError::InvalidCorpus)?;

        let (m, v, u) = (corpus.len(), corpus.vocab_size(), corpus.num_users());
        let p = &priors;
        let mut rng = StdRng::seed_from_u64(rseed);

        let mut term_topic = GammaMatrix::new((k, v), p.term_shape, p.term_rate);
        let mut user_topic = GammaMatrix::new((k, u), p.user_shape, p.user_rate);
        let mut doc_content = GammaMatrix::new((k, m), p.content_shape, p.content_rate);
        let mut doc_feedback = GammaMatrix::new((k, m), p.feedback_shape, p.feedback_rate);
        term_topic.perturb_shape(&mut rng);
        user_topic.perturb_shape(&mut rng);
        doc_content.perturb_shape(&mut rng);
        doc_feedback.perturb_shape(&mut rng);

        Ok(Self {
            corpus,
            num_topics: k,
            priors,
            term_topic,
            user_topic,
            doc_content,
            doc_feedback,
            elbo: 0.0,
        })
    }

    /// Gamma hyperparameters
    pub fn priors(&self) -> &CtpfPriors {
        &self.priors
    }

    /// Assignments of document `d` under the current expectations:
    ///
    /// φ_j ∝ exp(E[log θ_d] + E[log β_{w_j}])
    /// ξ_u ∝ exp([E[log θ_d]; E[log ε_d]] + E[log η_u])
    pub(crate) fn local_assignments(&self, d: usize) -> CtpfLocal {
        let k = self.num_topics;
        let doc = self.corpus.document(d);
        let elog_theta = self.doc_content.posterior_log_mean().column(d);
        let elog_eps = self.doc_feedback.posterior_log_mean().column(d);
        let elog_beta = self.term_topic.posterior_log_mean();
        let elog_eta = self.user_topic.posterior_log_mean();

        let mut phi = Mat::zeros(k, doc.len());
        for (j, &t) in doc.terms.iter().enumerate() {
            let w = t as usize - 1;
            for i in 0..k {
                phi[(i, j)] = elog_theta[i] + elog_beta[(i, w)];
            }
        }
        additive_logistic_columns(&mut phi);

        let mut xi = Mat::zeros(2 * k, doc.num_readers());
        for (j, &r) in doc.readers.iter().enumerate() {
            let u = r as usize - 1;
            for i in 0..k {
                xi[(i, j)] = elog_theta[i] + elog_eta[(i, u)];
                xi[(k + i, j)] = elog_eps[i] + elog_eta[(i, u)];
            }
        }
        additive_logistic_columns(&mut xi);

        CtpfLocal { phi, xi }
    }

    /// Shape statistics of document `d`: (content, feedback) without priors
    fn doc_shape_stats(&self, d: usize, local: &CtpfLocal) -> (DVec, DVec) {
        let k = self.num_topics;
        let doc = self.corpus.document(d);
        let counts = count_vector(&doc);
        let ratings = rating_vector(&doc);
        let xi_r = &local.xi * &ratings;
        let content = &local.phi * &counts + xi_r.rows(0, k);
        let feedback = xi_r.rows(k, k).into_owned();
        (content, feedback)
    }

    fn doc_elbo(&self, d: usize, beta_sum: &DVec, eta_sum: &DVec) -> f64 {
        let k = self.num_topics;
        let doc = self.corpus.document(d);
        let local = self.local_assignments(d);
        let elog_theta = self.doc_content.posterior_log_mean().column(d);
        let elog_eps = self.doc_feedback.posterior_log_mean().column(d);
        let e_theta = self.doc_content.posterior_mean().column(d);
        let e_eps = self.doc_feedback.posterior_mean().column(d);
        let elog_beta = self.term_topic.posterior_log_mean();
        let elog_eta = self.user_topic.posterior_log_mean();

        let mut elbo = 0.0;
        for (j, (&t, &c)) in doc.terms.iter().zip(doc.counts).enumerate() {
            let w = t as usize - 1;
            let c = c as f64;
            let mut s = 0.0;
            for i in 0..k {
                let p = local.phi[(i, j)];
                s += p * (elog_theta[i] + elog_beta[(i, w)]) - xlogy(p, p);
            }
            elbo += c * s - ln_gamma(c + 1.0);
        }
        elbo -= e_theta.dot(beta_sum);

        for (j, (&r, &y)) in doc.readers.iter().zip(doc.ratings).enumerate() {
            let u = r as usize - 1;
            let y = y as f64;
            let mut s = 0.0;
            for i in 0..k {
                let p = local.xi[(i, j)];
                let q = local.xi[(k + i, j)];
                s += p * (elog_theta[i] + elog_eta[(i, u)]) - xlogy(p, p);
                s += q * (elog_eps[i] + elog_eta[(i, u)]) - xlogy(q, q);
            }
            elbo += y * s - ln_gamma(y + 1.0);
        }
        elbo -= (e_theta + e_eps).dot(eta_sum);

        elbo + self.doc_content.elbo_prior_entropy_col(d) + self.doc_feedback.elbo_prior_entropy_col(d)
    }

    /// Corpus-level rates, in order: term-topic, user-topic, then the
    /// two document factors from the refreshed term and user means.
    pub(crate) fn update_rates(&mut self) {
        let theta_sum = self.doc_content.posterior_mean().column_sum();
        let eps_sum = self.doc_feedback.posterior_mean().column_sum();

        self.term_topic.update_rate(&theta_sum);
        self.term_topic.calibrate();
        self.user_topic.update_rate(&(&theta_sum + &eps_sum));
        self.user_topic.calibrate();

        let beta_sum = self.term_topic.posterior_mean().column_sum();
        let eta_sum = self.user_topic.posterior_mean().column_sum();
        self.doc_content.update_rate(&(beta_sum + &eta_sum));
        self.doc_content.calibrate();
        self.doc_feedback.update_rate(&eta_sum);
        self.doc_feedback.calibrate();
    }

    /// Expected rating rate E[η_u]·(E[θ_d] + E[ε_d]) (zero-based indices)
    pub fn score(&self, d: usize, u: usize) -> f64 {
        let e_eta = self.user_topic.posterior_mean().column(u);
        let e_theta = self.doc_content.posterior_mean().column(d);
        let e_eps = self.doc_feedback.posterior_mean().column(d);
        e_eta.dot(&(e_theta + e_eps))
    }
}

impl VariationalModel for Ctpf {
    fn name(&self) -> &'static str {
        "CTPF"
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
        let corpus = self.corpus.clone();
        if nothing_to_fit(&corpus) {
            return;
        }

        for (d, doc) in corpus.iter().enumerate() {
            let mut local = self.local_assignments(d);
            for it in 0..args.viter {
                if it > 0 {
                    local = self.local_assignments(d);
                }
                let (content, feedback) = self.doc_shape_stats(d, &local);
                let (c0, _) = self.doc_content.prior();
                let delta = (content.add_scalar(c0) - self.doc_content.shape().column(d)).norm();

                self.doc_content.update_stat_col(d, &content);
                self.doc_content.calibrate_col(d);
                self.doc_feedback.update_stat_col(d, &feedback);
                self.doc_feedback.calibrate_col(d);
                if delta < vtol {
                    break;
                }
            }

            for (j, (&t, &c)) in doc.terms.iter().zip(doc.counts).enumerate() {
                let stat = local.phi.column(j) * c as f64;
                self.term_topic.add_stat_col(t as usize - 1, &stat);
            }
            for (j, (&r, &y)) in doc.readers.iter().zip(doc.ratings).enumerate() {
                let stat = (local.xi.rows(0, k) + local.xi.rows(k, k)).column(j) * y as f64;
                self.user_topic.add_stat_col(r as usize - 1, &stat);
            }
        }

        self.term_topic.commit_stat();
        self.user_topic.commit_stat();
        self.update_rates();
    }

    fn update_elbo(&mut self) -> f64 {
        let beta_sum = self.term_topic.posterior_mean().column_sum();
        let eta_sum = self.user_topic.posterior_mean().column_sum();
        let docs: f64 = (0..self.corpus.len())
            .map(|d| self.doc_elbo(d, &beta_sum, &eta_sum))
            .sum();
        self.elbo = docs + self.term_topic.elbo_prior_entropy() + self.user_topic.elbo_prior_entropy();
        self.elbo
    }

    fn elbo(&self) -> f64 {
        self.elbo
    }

    fn topic_dist(&self, d: usize) -> DVec {
        let theta = self.doc_content.posterior_mean().column(d).into_owned();
        let tot = theta.sum();
        theta / tot
    }

    /// E[β] normalised per topic
    fn topic_term(&self) -> Mat {
        let mut beta = self.term_topic.posterior_mean().clone();
        matrix_param::special::normalize_rows(&mut beta);
        beta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::train;
    use approx::assert_abs_diff_eq;

    fn toy() -> Arc<Corpus> {
        Arc::new(
            Corpus::from_documents(vec![
                Document::new(vec![1, 2, 3], vec![4, 2, 1]).with_readers(vec![1, 2], vec![1, 2]),
                Document::new(vec![4, 5], vec![3, 3]).with_readers(vec![3], vec![1]),
                Document::new(vec![1, 5], vec![2, 1]).with_readers(vec![1], vec![3]),
                Document::new(vec![4, 6], vec![5, 1]),
            ])
            .with_numeric_labels(),
        )
    }

    #[test]
    fn test_rates_follow_means() {
        let mut ctpf = Ctpf::new(toy(), 2, 3).unwrap();
        let args = TrainArgs {
            iter: 2,
            tol: 0.0,
            ..Default::default()
        };
        train(&mut ctpf, &args).unwrap();

        let p = *ctpf.priors();
        let beta_sum = ctpf.term_topic.posterior_mean().column_sum();
        let eta_sum = ctpf.user_topic.posterior_mean().column_sum();
        for i in 0..2 {
            assert_abs_diff_eq!(
                ctpf.doc_feedback.rate()[i],
                p.feedback_rate + eta_sum[i],
                epsilon = 1e-10
            );
            assert_abs_diff_eq!(
                ctpf.doc_content.rate()[i],
                p.content_rate + beta_sum[i] + eta_sum[i],
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn test_shapes_exceed_priors() {
        let mut ctpf = Ctpf::new(toy(), 3, 4).unwrap();
        train(&mut ctpf, &TrainArgs { iter: 3, ..Default::default() }).unwrap();
        let p = *ctpf.priors();
        assert!(ctpf.term_topic.shape().iter().all(|&a| a >= p.term_shape));
        assert!(ctpf.doc_feedback.shape().iter().all(|&a| a >= p.feedback_shape));
        // document 3 has no readers: its feedback shape is the prior
        for i in 0..3 {
            assert_abs_diff_eq!(ctpf.doc_feedback.shape()[(i, 3)], p.feedback_shape, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_invalid_priors_rejected() {
        let priors = CtpfPriors {
            user_rate: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            Ctpf::with_priors(toy(), 2, priors, 1),
            Err(TopicError::InvalidArgument(_))
        ));
    }
}
