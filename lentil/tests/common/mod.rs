use lentil::corpus_beans::{Corpus, Document};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Two blocks of terms, each read by its own group of users
pub fn block_corpus(num_docs: usize, num_terms: usize, num_users: usize, seed: u64) -> Arc<Corpus> {
    let mut rng = StdRng::seed_from_u64(seed);
    let half = num_terms / 2;
    let mut docs = vec![];
    for d in 0..num_docs {
        let block = d % 2;
        let mut terms = vec![];
        let mut counts = vec![];
        for v in 0..num_terms {
            let in_block = (v < half) == (block == 0);
            let keep = if in_block { rng.random::<f64>() < 0.8 } else { rng.random::<f64>() < 0.1 };
            if keep {
                terms.push(v as u32 + 1);
                counts.push(rng.random_range(1..6));
            }
        }
        if terms.is_empty() {
            terms.push(1 + (block * half) as u32);
            counts.push(1);
        }

        let mut readers = vec![];
        let mut ratings = vec![];
        for u in 0..num_users {
            if u % 2 == block && rng.random::<f64>() < 0.6 {
                readers.push(u as u32 + 1);
                ratings.push(rng.random_range(1..4));
            }
        }
        docs.push(Document::new(terms, counts).with_readers(readers, ratings));
    }

    let users = (1..=num_users).map(|u| Box::from(format!("u{}", u))).collect();
    let corpus = Corpus::from_documents(docs)
        .with_users(users)
        .with_numeric_labels();
    Arc::new(corpus)
}
