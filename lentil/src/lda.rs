use crate::accumulator::TopicTermAccumulator;
use crate::common::*;
use crate::error::TopicError;
use crate::filter::TokenFilter;
use crate::newton::{update_dirichlet_alpha, NewtonReport};
use crate::train::{nothing_to_fit, TrainArgs, VariationalModel};
use matrix_param::dirichlet::*;
use matrix_param::special::entropy_categorical;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Token-topic assignments of one document, K x n:
/// `φ_j ∝ exp(τ_j log β_{·,w_j} + weight)`, where `weight` is the
/// document's expected log topic weight and τ_j = 1 without a filter.
pub(crate) fn token_assignments(
    terms: &[u32],
    log_topics: &Mat,
    weight: &DVec,
    tau: Option<&[f64]>,
) -> Mat {
    let k = weight.len();
    let mut phi = Mat::zeros(k, terms.len());
    for (j, &t) in terms.iter().enumerate() {
        let w = t as usize - 1;
        let tau_j = tau.map(|x| x[j]).unwrap_or(1.0);
        for i in 0..k {
            phi[(i, j)] = tau_j * log_topics[(i, w)] + weight[i];
        }
    }
    additive_logistic_columns(&mut phi);
    phi
}

/// Σ_j c_j H(φ_j)
pub(crate) fn assignment_entropy(phi: &Mat, counts: &DVec) -> f64 {
    phi.column_iter()
        .zip(counts.iter())
        .map(|(col, &c)| c * entropy_categorical(col.iter()))
        .sum()
}

/// Σ_j c_j φ_j·log β_{·,w_j}
pub(crate) fn thematic_log_likelihood(phi: &Mat, terms: &[u32], counts: &DVec, log_topics: &Mat) -> f64 {
    terms
        .iter()
        .enumerate()
        .map(|(j, &t)| counts[j] * phi.column(j).dot(&log_topics.column(t as usize - 1)))
        .sum()
}

/// Latent Dirichlet allocation, optionally with a background filter.
///
/// Per document d with terms w and counts c:
///
/// ```text
/// φ_j   ∝ exp(τ_j log β_{·,w_j} + E[log θ_d])
/// γ_d   = α + Σ_j c_j φ_j
/// ```
///
/// and per epoch `β ∝ Σ_d Σ_j τ_j c_j φ_j e_{w_j}ᵀ`, α by interior-point
/// Newton on `Σ_d E[log θ_d]`.
#[derive(Debug, Clone)]
pub struct Lda {
    corpus: Arc<Corpus>,
    num_topics: usize,
    /// Dirichlet concentration α (length K)
    pub alpha: DVec,
    /// β and its accumulator
    pub topic_terms: TopicTermAccumulator,
    /// γ_d per document
    pub gamma: Vec<DVec>,
    /// background filter of fLDA
    pub filter: Option<TokenFilter>,
    /// outcome of the latest α update
    pub alpha_report: Option<NewtonReport>,
    elbo: f64,
}

impl Lda {
    /// Plain LDA with `k` topics
    pub fn new(corpus: Arc<Corpus>, k: usize, rseed: u64) -> Result<Self, TopicError> {
        if k == 0 {
            return Err(TopicError::InvalidArgument("number of topics must be positive"));
        }
        corpus.check().map_err(|_| TopicError::InvalidCorpus)?;

        let mut rng = StdRng::seed_from_u64(rseed);
        let topic_terms = TopicTermAccumulator::random(k, corpus.vocab_size(), &mut rng);
        Ok(Self {
            alpha: DVec::from_element(k, 1.0),
            gamma: vec![DVec::from_element(k, 1.0); corpus.len()],
            topic_terms,
            filter: None,
            alpha_report: None,
            num_topics: k,
            corpus,
            elbo: 0.0,
        })
    }

    /// Filtered LDA (fLDA) with `k` topics
    pub fn filtered(corpus: Arc<Corpus>, k: usize, rseed: u64) -> Result<Self, TopicError> {
        let mut ret = Self::new(corpus, k, rseed)?;
        let mut rng = StdRng::seed_from_u64(rseed.wrapping_add(1));
        ret.filter = Some(TokenFilter::random(&ret.corpus, &mut rng));
        Ok(ret)
    }

    fn token_range(&self, d: usize) -> std::ops::Range<usize> {
        let offsets = self.corpus.token_offsets();
        offsets[d]..offsets[d + 1]
    }

    fn doc_elbo(&self, d: usize) -> f64 {
        let doc = self.corpus.document(d);
        let range = self.token_range(d);
        let counts = count_vector(&doc);
        let log_topics = self.topic_terms.log_topics();

        let elog_theta = expected_log_dirichlet(&self.gamma[d]);
        let tau = self.filter.as_ref().map(|f| f.tau_range(range.clone()));
        let phi = token_assignments(doc.terms, log_topics, &elog_theta, tau);

        let elogptheta = expected_log_dirichlet_prior(&self.alpha, &elog_theta);
        let elogpz = (&phi * &counts).dot(&elog_theta);
        let elogpw = match &self.filter {
            Some(filter) => filter.doc_elbo(range.start, doc.terms, doc.counts, &phi, log_topics),
            None => thematic_log_likelihood(&phi, doc.terms, &counts, log_topics),
        };
        let entropy = dirichlet_entropy(&self.gamma[d]) + assignment_entropy(&phi, &counts);

        elogptheta + elogpz + elogpw + entropy
    }
}

impl VariationalModel for Lda {
    fn name(&self) -> &'static str {
        if self.filter.is_some() {
            "fLDA"
        } else {
            "LDA"
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
        let mut sum_elog_theta = DVec::zeros(k);

        for (d, doc) in corpus.iter().enumerate() {
            let range = offsets[d]..offsets[d + 1];
            let counts = count_vector(&doc);
            let log_topics = self.topic_terms.log_topics();

            let mut phi = Mat::zeros(k, doc.len());
            for _ in 0..args.viter {
                let elog_theta = expected_log_dirichlet(&self.gamma[d]);
                let tau = self.filter.as_ref().map(|f| f.tau_range(range.clone()));
                phi = token_assignments(doc.terms, log_topics, &elog_theta, tau);

                if let Some(filter) = self.filter.as_mut() {
                    filter.update_tau(range.start, doc.terms, &phi, log_topics);
                }

                let gamma = (&self.alpha + &phi * &counts).map(|x| x.max(EPSILON));
                let delta = (&gamma - &self.gamma[d]).norm();
                self.gamma[d] = gamma;
                if delta < vtol {
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
            sum_elog_theta += expected_log_dirichlet(&self.gamma[d]);
        }

        self.topic_terms.finalize();
        if let Some(filter) = self.filter.as_mut() {
            filter.finalize();
        }
        let report = update_dirichlet_alpha(&mut self.alpha, corpus.len(), &sum_elog_theta, args.niter, ntol);
        debug!(
            "alpha = {:?} after {} Newton iterations (converged: {})",
            self.alpha.as_slice(),
            report.iterations,
            report.converged
        );
        self.alpha_report = Some(report);
    }

    fn update_elbo(&mut self) -> f64 {
        self.elbo = (0..self.corpus.len()).map(|d| self.doc_elbo(d)).sum();
        self.elbo
    }

    fn elbo(&self) -> f64 {
        self.elbo
    }

    fn topic_dist(&self, d: usize) -> DVec {
        let gamma = &self.gamma[d];
        gamma / gamma.sum()
    }

    fn topic_term(&self) -> Mat {
        self.topic_terms.topics().clone()
    }
}
