//! Structural checks run before (and optionally after) training.
//!
//! A failing check says only "invalid"; it is a precondition gate, not a
//! diagnosis.

use crate::common::*;
use crate::ctm::Ctm;
use crate::ctpf::Ctpf;
use crate::error::TopicError;
use crate::lda::Lda;
use crate::train::VariationalModel;
use matrix_param::{GammaMatrix, Inference};

const ROW_SUM_TOL: f64 = 1e-6;

/// Model validation contract
pub trait Validate {
    /// `Ok(())` when every structural invariant holds
    fn validate(&self) -> Result<(), TopicError>;
}

fn ensure(ok: bool) -> Result<(), TopicError> {
    if ok {
        Ok(())
    } else {
        Err(TopicError::InvalidModel)
    }
}

fn check_corpus(corpus: &Corpus) -> Result<(), TopicError> {
    corpus.check().map_err(|_| TopicError::InvalidCorpus)
}

fn positive<'a, I: IntoIterator<Item = &'a f64>>(xx: I) -> bool {
    xx.into_iter().all(|x| x.is_finite() && *x > 0.0)
}

fn finite<'a, I: IntoIterator<Item = &'a f64>>(xx: I) -> bool {
    xx.into_iter().all(|x| x.is_finite())
}

/// Every row is a probability distribution
pub fn is_row_stochastic(mat: &Mat) -> bool {
    mat.iter().all(|x| x.is_finite() && *x >= 0.0)
        && mat
            .row_iter()
            .all(|row| (row.sum() - 1.0).abs() < ROW_SUM_TOL)
}

fn check_topic_terms(model: &impl VariationalModel, topics: &Mat) -> Result<(), TopicError> {
    let (k, v) = (model.num_topics(), model.corpus().vocab_size());
    ensure(topics.shape() == (k, v) && (v == 0 || is_row_stochastic(topics)))
}

fn check_gamma(param: &GammaMatrix, dims: (usize, usize)) -> bool {
    param.nrows() == dims.0
        && param.ncols() == dims.1
        && param.rate().len() == dims.0
        && positive(param.shape().iter())
        && positive(param.rate().iter())
}

impl Validate for Lda {
    fn validate(&self) -> Result<(), TopicError> {
        let corpus = self.corpus();
        check_corpus(corpus)?;
        let k = self.num_topics();

        check_topic_terms(self, self.topic_terms.topics())?;
        ensure(self.alpha.len() == k && positive(self.alpha.iter()))?;
        ensure(self.gamma.len() == corpus.len())?;
        ensure(self.gamma.iter().all(|g| g.len() == k && positive(g.iter())))?;
        if let Some(filter) = &self.filter {
            ensure(filter.is_valid(corpus.vocab_size(), corpus.term_arena().len()))?;
        }
        ensure(self.elbo().is_finite())
    }
}

impl Validate for Ctm {
    fn validate(&self) -> Result<(), TopicError> {
        let corpus = self.corpus();
        check_corpus(corpus)?;
        let (k, m) = (self.num_topics(), corpus.len());

        check_topic_terms(self, self.topic_terms.topics())?;
        ensure(self.mu.len() == k && finite(self.mu.iter()))?;
        ensure(self.sigma.shape() == (k, k) && finite(self.sigma.iter()))?;
        ensure(self.sigma.clone().cholesky().is_some())?;
        ensure(self.lambda.len() == m && self.vsq.len() == m && self.log_zeta.len() == m)?;
        ensure(self.lambda.iter().all(|l| l.len() == k && finite(l.iter())))?;
        ensure(self.vsq.iter().all(|v| v.len() == k && positive(v.iter())))?;
        ensure(finite(self.log_zeta.iter()))?;
        if let Some(filter) = &self.filter {
            ensure(filter.is_valid(corpus.vocab_size(), corpus.term_arena().len()))?;
        }
        ensure(self.elbo().is_finite())
    }
}

impl Validate for Ctpf {
    fn validate(&self) -> Result<(), TopicError> {
        let corpus = self.corpus();
        check_corpus(corpus)?;
        let k = self.num_topics();
        let (m, v, u) = (corpus.len(), corpus.vocab_size(), corpus.num_users());

        ensure(self.priors().is_valid())?;
        ensure(check_gamma(&self.term_topic, (k, v)))?;
        ensure(check_gamma(&self.user_topic, (k, u)))?;
        ensure(check_gamma(&self.doc_content, (k, m)))?;
        ensure(check_gamma(&self.doc_feedback, (k, m)))?;
        ensure(self.elbo().is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Arc<Corpus> {
        Arc::new(
            Corpus::from_documents(vec![
                Document::new(vec![1, 2], vec![1, 1]).with_readers(vec![1], vec![2]),
                Document::new(vec![3], vec![2]),
            ])
            .with_numeric_labels(),
        )
    }

    #[test]
    fn test_fresh_models_are_valid() {
        assert!(Lda::new(toy(), 2, 1).unwrap().validate().is_ok());
        assert!(Lda::filtered(toy(), 2, 1).unwrap().validate().is_ok());
        assert!(Ctm::new(toy(), 2, 1).unwrap().validate().is_ok());
        assert!(Ctpf::new(toy(), 2, 1).unwrap().validate().is_ok());
    }

    #[test]
    fn test_corrupt_models_are_invalid() {
        let mut lda = Lda::new(toy(), 2, 1).unwrap();
        lda.alpha[0] = -1.0;
        assert!(matches!(lda.validate(), Err(TopicError::InvalidModel)));

        let mut lda = Lda::new(toy(), 2, 1).unwrap();
        lda.gamma.pop();
        assert!(matches!(lda.validate(), Err(TopicError::InvalidModel)));

        let mut ctm = Ctm::new(toy(), 2, 1).unwrap();
        ctm.sigma[(0, 1)] = 5.0;
        ctm.sigma[(1, 0)] = 5.0;
        assert!(matches!(ctm.validate(), Err(TopicError::InvalidModel)));

        let mut ctpf = Ctpf::new(toy(), 2, 1).unwrap();
        let mut rate = ctpf.user_topic.rate().clone();
        rate[1] = f64::NAN;
        ctpf.user_topic.set_rate(rate);
        assert!(matches!(ctpf.validate(), Err(TopicError::InvalidModel)));
    }

    #[test]
    fn test_row_stochastic() {
        let good = Mat::from_row_slice(2, 2, &[0.5, 0.5, 0.1, 0.9]);
        let bad = Mat::from_row_slice(2, 2, &[0.5, 0.6, 0.1, 0.9]);
        assert!(is_row_stochastic(&good));
        assert!(!is_row_stochastic(&bad));
    }
}
