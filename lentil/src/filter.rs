//! Background filter of fLDA/fCTM.
//!
//! Each token carries a latent switch: with probability η it is drawn
//! from its topic's term distribution, otherwise from the corpus-wide
//! background distribution κ. The variational switch probability τ is
//! stored flat, aligned with the corpus term arena.

use crate::common::*;
use matrix_param::dirichlet::sample_dirichlet;
use rand::Rng;

/// Mixing rate used when none is given
pub const DEFAULT_MIXING_RATE: f64 = 0.95;

/// Per-token filter probabilities plus the background distribution.
#[derive(Debug, Clone)]
pub struct TokenFilter {
    /// η, prior probability that a token is thematic
    pub mixing_rate: f64,
    /// Re-estimate η as Σ τc / Σ c after every epoch. Default: false
    pub update_mixing_rate: bool,
    background: DVec,
    log_background: DVec,
    tau: Vec<f64>,
    background_stat: DVec,
    thematic_count: f64,
    total_count: f64,
}

impl TokenFilter {
    /// τ = 0.5 for every token; κ drawn from a flat Dirichlet
    pub fn random<R: Rng>(corpus: &Corpus, rng: &mut R) -> Self {
        let v = corpus.vocab_size();
        let background = if v > 0 {
            sample_dirichlet(&DVec::from_element(v, 1.0), rng)
        } else {
            DVec::zeros(0)
        };
        let mut ret = Self {
            mixing_rate: DEFAULT_MIXING_RATE,
            update_mixing_rate: false,
            log_background: DVec::zeros(v),
            background: DVec::zeros(v),
            tau: vec![0.5; corpus.term_arena().len()],
            background_stat: DVec::zeros(v),
            thematic_count: 0.0,
            total_count: 0.0,
        };
        ret.set_background(background);
        ret
    }

    /// κ
    pub fn background(&self) -> &DVec {
        &self.background
    }

    /// ln κ
    pub fn log_background(&self) -> &DVec {
        &self.log_background
    }

    /// τ for every token of the corpus
    pub fn tau(&self) -> &[f64] {
        &self.tau
    }

    /// τ of the tokens `range` of the term arena
    pub fn tau_range(&self, range: std::ops::Range<usize>) -> &[f64] {
        &self.tau[range]
    }

    /// Replace κ (normalised after an `EPSILON` bump)
    pub fn set_background(&mut self, mut background: DVec) {
        background.add_scalar_mut(EPSILON);
        let tot = background.sum();
        if tot > 0.0 {
            background /= tot;
        }
        self.log_background = background.map(|x| x.ln());
        self.background = background;
    }

    /// τ = η / (η + (1 − η) κ_w Π_k β_kw^{−φ_k}), evaluated as a logistic
    /// function of the log odds.
    ///
    /// * `offset` - first token of the document in the term arena
    /// * `terms` - 1-based term ids of the document
    /// * `phi` - K x n token-topic assignments
    /// * `log_topics` - K x V log topic-term probabilities
    pub fn update_tau(&mut self, offset: usize, terms: &[u32], phi: &Mat, log_topics: &Mat) {
        let eta = self.mixing_rate;
        let logit_eta = eta.ln() - (1.0 - eta).ln();
        for (j, &t) in terms.iter().enumerate() {
            let w = t as usize - 1;
            let thematic = phi.column(j).dot(&log_topics.column(w));
            self.tau[offset + j] = logistic(logit_eta + thematic - self.log_background[w]);
        }
    }

    /// Background sufficient statistics of one document
    pub fn accumulate(&mut self, offset: usize, terms: &[u32], counts: &[u32]) {
        for (j, (&t, &c)) in terms.iter().zip(counts).enumerate() {
            let c = c as f64;
            let tau = self.tau[offset + j];
            self.background_stat[t as usize - 1] += (1.0 - tau) * c;
            self.thematic_count += tau * c;
            self.total_count += c;
        }
    }

    /// New κ (and η when enabled) from the epoch's statistics
    pub fn finalize(&mut self) {
        let v = self.background_stat.len();
        let stat = std::mem::replace(&mut self.background_stat, DVec::zeros(v));
        self.set_background(stat);

        if self.update_mixing_rate && self.total_count > 0.0 {
            self.mixing_rate = self.thematic_count / self.total_count;
            debug!("mixing rate updated to {:.4}", self.mixing_rate);
        }
        self.thematic_count = 0.0;
        self.total_count = 0.0;
    }

    /// Filter terms of a document's ELBO given its assignments:
    ///
    /// Σ_j c_j [ τ_j φ_j·log β_w + (1−τ_j) log κ_w ]
    /// + Σ_j c_j [ τ_j log η + (1−τ_j) log(1−η) ]
    /// − Σ_j c_j [ τ_j log τ_j + (1−τ_j) log(1−τ_j) ]
    pub fn doc_elbo(
        &self,
        offset: usize,
        terms: &[u32],
        counts: &[u32],
        phi: &Mat,
        log_topics: &Mat,
    ) -> f64 {
        let eta = self.mixing_rate;
        let mut elbo = 0.0;
        for (j, (&t, &c)) in terms.iter().zip(counts).enumerate() {
            let w = t as usize - 1;
            let c = c as f64;
            let tau = self.tau[offset + j];
            let thematic = phi.column(j).dot(&log_topics.column(w));
            let elogpw = tau * thematic + (1.0 - tau) * self.log_background[w];
            let elogpc = xlogy(tau, eta) + xlogy(1.0 - tau, 1.0 - eta);
            let elogqc = xlogy(tau, tau) + xlogy(1.0 - tau, 1.0 - tau);
            elbo += c * (elogpw + elogpc - elogqc);
        }
        elbo
    }

    /// Whether η and every τ lie in [0, 1] and κ is a distribution
    pub fn is_valid(&self, num_terms: usize, num_tokens: usize) -> bool {
        let unit = |x: f64| (0.0..=1.0).contains(&x);
        self.background.len() == num_terms
            && self.tau.len() == num_tokens
            && unit(self.mixing_rate)
            && self.tau.iter().all(|&t| unit(t))
            && self.background.iter().all(|&x| x.is_finite() && x >= 0.0)
            && (num_terms == 0 || (self.background.sum() - 1.0).abs() < 1e-6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn corpus() -> Corpus {
        Corpus::from_documents(vec![Document::new(vec![1, 2], vec![3, 1])]).with_numeric_labels()
    }

    #[test]
    fn test_tau_matches_closed_form() {
        let corpus = corpus();
        let mut rng = StdRng::seed_from_u64(3);
        let mut filter = TokenFilter::random(&corpus, &mut rng);
        filter.set_background(DVec::from_vec(vec![0.9, 0.1]));

        let topics = Mat::from_row_slice(2, 2, &[0.2, 0.8, 0.6, 0.4]);
        let log_topics = topics.map(|x| x.ln());
        let phi = Mat::from_column_slice(2, 2, &[0.3, 0.7, 0.5, 0.5]);
        filter.update_tau(0, &[1, 2], &phi, &log_topics);

        let eta = DEFAULT_MIXING_RATE;
        let prod: f64 = (0..2).map(|k| topics[(k, 0)].powf(-phi[(k, 0)])).product();
        let expected = eta / (eta + (1.0 - eta) * filter.background()[0] * prod);
        assert_abs_diff_eq!(filter.tau()[0], expected, epsilon = 1e-12);
        assert!(filter.is_valid(2, 2));
    }

    #[test]
    fn test_mixing_rate_toggle() {
        let corpus = corpus();
        let mut rng = StdRng::seed_from_u64(4);
        let mut filter = TokenFilter::random(&corpus, &mut rng);

        filter.accumulate(0, &[1, 2], &[3, 1]);
        filter.finalize();
        assert_eq!(filter.mixing_rate, DEFAULT_MIXING_RATE);
        // every τ is 0.5, so κ follows the raw counts
        assert_abs_diff_eq!(filter.background()[0], 0.75, epsilon = 1e-10);

        filter.update_mixing_rate = true;
        filter.accumulate(0, &[1, 2], &[3, 1]);
        filter.finalize();
        assert_abs_diff_eq!(filter.mixing_rate, 0.5, epsilon = 1e-12);
    }
}
