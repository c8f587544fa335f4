//! Synthetic corpora sampled from a fitted model.
//!
//! Every document draws its topic weights from the model's prior family,
//! a token count from Poisson(mean document length), then one topic and
//! one term per token. Topic-term rows are smoothed as
//! `(β_kv + s) / (1 + V s)`.

use crate::common::*;
use crate::ctm::Ctm;
use crate::ctpf::Ctpf;
use crate::error::TopicError;
use crate::filter::TokenFilter;
use crate::lda::Lda;
use crate::train::VariationalModel;
use matrix_param::dirichlet::sample_dirichlet;
use matrix_param::Inference;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::weighted::WeightedIndex;
use rand_distr::{Distribution, Gamma, Poisson, StandardNormal};

/// Per-topic term samplers of `(β_k + s) / (1 + V s)`
pub struct SmoothedTopics {
    /// one sampler per topic
    pub terms: Vec<WeightedIndex<f64>>,
    /// s
    pub laplace_smooth: f64,
}

impl SmoothedTopics {
    /// Samplers for the rows of a K x V topic-term matrix
    pub fn new(topics: &Mat, laplace_smooth: f64) -> Self {
        let terms = topics
            .row_iter()
            .filter_map(|row| WeightedIndex::new(row.iter().map(|&b| b + laplace_smooth)).ok())
            .collect();
        Self {
            terms,
            laplace_smooth,
        }
    }
}

/// A model that can sample documents like the ones it was fitted on.
pub trait Generative: VariationalModel {
    /// Sample one document with `num_tokens` tokens
    fn generate_document(
        &self,
        num_tokens: usize,
        topics: &SmoothedTopics,
        rng: &mut StdRng,
    ) -> Document;
}

/// Collapse sampled zero-based term indices into a 1-based sorted document
fn tally(samples: &[usize], vocab_size: usize) -> (Vec<u32>, Vec<u32>) {
    let mut counts = vec![0u32; vocab_size];
    for &w in samples {
        counts[w] += 1;
    }
    counts
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c > 0)
        .map(|(w, &c)| (w as u32 + 1, c))
        .unzip()
}

fn sample_tokens(
    theta: &DVec,
    num_tokens: usize,
    topics: &SmoothedTopics,
    filter: Option<(&TokenFilter, &WeightedIndex<f64>)>,
    rng: &mut StdRng,
) -> Vec<usize> {
    let Ok(topic_sampler) = WeightedIndex::new(theta.iter().copied()) else {
        return vec![];
    };
    let mut out = Vec::with_capacity(num_tokens);
    for _ in 0..num_tokens {
        if let Some((filter, background)) = filter {
            if rng.random::<f64>() >= filter.mixing_rate {
                out.push(background.sample(rng));
                continue;
            }
        }
        let k = topic_sampler.sample(rng);
        if let Some(terms) = topics.terms.get(k) {
            out.push(terms.sample(rng));
        }
    }
    out
}

fn background_sampler(filter: Option<&TokenFilter>, laplace_smooth: f64) -> Option<WeightedIndex<f64>> {
    filter.and_then(|f| WeightedIndex::new(f.background().iter().map(|&x| x + laplace_smooth)).ok())
}

impl Generative for Lda {
    fn generate_document(
        &self,
        num_tokens: usize,
        topics: &SmoothedTopics,
        rng: &mut StdRng,
    ) -> Document {
        let theta = sample_dirichlet(&self.alpha, rng);
        let background = background_sampler(self.filter.as_ref(), topics.laplace_smooth);
        let filter = self.filter.as_ref().zip(background.as_ref());
        let samples = sample_tokens(&theta, num_tokens, topics, filter, rng);
        let (terms, counts) = tally(&samples, self.corpus().vocab_size());
        Document::new(terms, counts)
    }
}

impl Generative for Ctm {
    fn generate_document(
        &self,
        num_tokens: usize,
        topics: &SmoothedTopics,
        rng: &mut StdRng,
    ) -> Document {
        let k = self.num_topics();
        let z = DVec::from_fn(k, |_, _| rng.sample::<f64, _>(StandardNormal));
        let mut eta = match self.sigma.clone().cholesky() {
            Some(chol) => &self.mu + chol.l() * z,
            None => &self.mu + z,
        };
        matrix_param::special::additive_logistic(&mut eta);

        let background = background_sampler(self.filter.as_ref(), topics.laplace_smooth);
        let filter = self.filter.as_ref().zip(background.as_ref());
        let samples = sample_tokens(&eta, num_tokens, topics, filter, rng);
        let (terms, counts) = tally(&samples, self.corpus().vocab_size());
        Document::new(terms, counts)
    }
}

impl Generative for Ctpf {
    fn generate_document(
        &self,
        num_tokens: usize,
        topics: &SmoothedTopics,
        rng: &mut StdRng,
    ) -> Document {
        let p = self.priors();
        let k = self.num_topics();
        let mut draw = |shape: f64, rate: f64| match Gamma::new(shape, 1.0 / rate) {
            Ok(gam) => gam.sample(rng),
            Err(_) => 0.0,
        };
        let theta = DVec::from_fn(k, |_, _| draw(p.content_shape, p.content_rate));
        let eps = DVec::from_fn(k, |_, _| draw(p.feedback_shape, p.feedback_rate));

        let samples = sample_tokens(&theta, num_tokens, topics, None, rng);
        let (terms, counts) = tally(&samples, self.corpus().vocab_size());

        let e_eta = self.user_topic.posterior_mean();
        let activity = &theta + &eps;
        let mut readers = vec![];
        let mut ratings = vec![];
        for u in 0..e_eta.ncols() {
            let rate = e_eta.column(u).dot(&activity);
            let r = match Poisson::new(rate) {
                Ok(pois) => pois.sample(rng) as u32,
                Err(_) => 0,
            };
            if r > 0 {
                readers.push(u as u32 + 1);
                ratings.push(r);
            }
        }
        Document::new(terms, counts).with_readers(readers, ratings)
    }
}

/// Sample a corpus of `size` documents from `model`.
///
/// * `laplace_smooth` - pseudo-count added to every topic-term (and
///   background) probability; must be finite and non-negative
/// * `rseed` - the same seed reproduces the same corpus
///
/// The vocabulary and user dictionaries are copied from the model's corpus.
pub fn gencorp<M: Generative>(
    model: &M,
    size: usize,
    laplace_smooth: f64,
    rseed: u64,
) -> Result<Corpus, TopicError> {
    if !laplace_smooth.is_finite() || laplace_smooth < 0.0 {
        return Err(TopicError::InvalidArgument(
            "laplace_smooth must be finite and non-negative",
        ));
    }
    let source = model.corpus();
    let mut rng = StdRng::seed_from_u64(rseed);

    let topics = SmoothedTopics::new(&model.topic_term(), laplace_smooth);
    let mean_length = source.mean_document_length();
    let length = Poisson::new(mean_length).ok();

    let mut corpus = Corpus::new();
    for _ in 0..size {
        let num_tokens = length.as_ref().map(|p| p.sample(&mut rng) as usize).unwrap_or(0);
        corpus.push_document(model.generate_document(num_tokens, &topics, &mut rng));
    }

    info!("generated {} documents from {}", size, model.name());
    Ok(corpus
        .with_vocab(source.vocab().to_vec())
        .with_users(source.users().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Arc<Corpus> {
        Arc::new(
            Corpus::from_documents(vec![
                Document::new(vec![1, 2], vec![3, 1]).with_readers(vec![1], vec![1]),
                Document::new(vec![3, 4], vec![2, 2]).with_readers(vec![2], vec![4]),
            ])
            .with_numeric_labels(),
        )
    }

    #[test]
    fn test_tally_sorts_and_counts() {
        let (terms, counts) = tally(&[3, 0, 3, 3, 1], 5);
        assert_eq!(terms, vec![1, 2, 4]);
        assert_eq!(counts, vec![1, 1, 3]);
    }

    #[test]
    fn test_smoothing_must_be_non_negative() {
        let lda = Lda::new(toy(), 2, 1).unwrap();
        assert!(matches!(gencorp(&lda, 3, -0.1, 1), Err(TopicError::InvalidArgument(_))));
        assert!(matches!(gencorp(&lda, 3, f64::NAN, 1), Err(TopicError::InvalidArgument(_))));
    }

    #[test]
    fn test_generated_corpora_are_valid() {
        let ctm = Ctm::filtered(toy(), 2, 3).unwrap();
        let corpus = gencorp(&ctm, 20, 0.5, 7).unwrap();
        assert_eq!(corpus.len(), 20);
        assert_eq!(corpus.vocab_size(), 4);
        assert!(corpus.check().is_ok());

        let ctpf = Ctpf::new(toy(), 2, 3).unwrap();
        let corpus = gencorp(&ctpf, 20, 0.0, 7).unwrap();
        assert_eq!(corpus.num_users(), 2);
        assert!(corpus.check().is_ok());
    }
}
