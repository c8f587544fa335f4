use crate::document::{Document, DocumentView};
use crate::error::CorpusError;

/// Arena-backed corpus.
///
/// ```text
/// terms   : [ d0 terms | d1 terms | ... ]
/// counts  : [ d0 counts| d1 counts| ... ]
/// token_offsets : 0, |d0|, |d0|+|d1|, ...
/// ```
///
/// and likewise for readers/ratings. `vocab[i-1]` labels term `i`,
/// `users[u-1]` labels user `u`.
///
/// Models keep an `Arc<Corpus>`. The arenas are never shared between two
/// `Corpus` values, so a caller editing its own handle through
/// `Arc::make_mut` works on a private copy and never disturbs a model.
#[derive(Debug, Clone)]
pub struct Corpus {
    terms: Vec<u32>,
    counts: Vec<u32>,
    token_offsets: Vec<usize>,
    readers: Vec<u32>,
    ratings: Vec<u32>,
    rating_offsets: Vec<usize>,
    stamps: Vec<Option<f64>>,
    titles: Vec<Option<Box<str>>>,
    vocab: Vec<Box<str>>,
    users: Vec<Box<str>>,
}

impl Default for Corpus {
    fn default() -> Self {
        Self::new()
    }
}

impl Corpus {
    /// An empty corpus with empty dictionaries
    pub fn new() -> Self {
        Self {
            terms: vec![],
            counts: vec![],
            token_offsets: vec![0],
            readers: vec![],
            ratings: vec![],
            rating_offsets: vec![0],
            stamps: vec![],
            titles: vec![],
            vocab: vec![],
            users: vec![],
        }
    }

    /// Build from owned documents (no validation; call `check`)
    pub fn from_documents<I>(docs: I) -> Self
    where
        I: IntoIterator<Item = Document>,
    {
        let mut ret = Self::new();
        for doc in docs {
            ret.push_document(doc);
        }
        ret
    }

    /// Replace the vocabulary dictionary
    pub fn with_vocab(mut self, vocab: Vec<Box<str>>) -> Self {
        self.vocab = vocab;
        self
    }

    /// Replace the user dictionary
    pub fn with_users(mut self, users: Vec<Box<str>>) -> Self {
        self.users = users;
        self
    }

    /// Extend the dictionaries with numeric labels so that every
    /// referenced id has an entry.
    pub fn with_numeric_labels(mut self) -> Self {
        let max_term = self.terms.iter().copied().max().unwrap_or(0) as usize;
        for v in self.vocab.len()..max_term {
            self.vocab.push(Box::from((v + 1).to_string()));
        }
        let max_user = self.readers.iter().copied().max().unwrap_or(0) as usize;
        for u in self.users.len()..max_user {
            self.users.push(Box::from((u + 1).to_string()));
        }
        self
    }

    /// Append a document
    pub fn push_document(&mut self, doc: Document) {
        self.terms.extend_from_slice(&doc.terms);
        self.counts.extend_from_slice(&doc.counts);
        self.token_offsets.push(self.terms.len());
        self.readers.extend_from_slice(&doc.readers);
        self.ratings.extend_from_slice(&doc.ratings);
        self.rating_offsets.push(self.readers.len());
        self.stamps.push(doc.stamp);
        self.titles.push(doc.title);
    }

    /// Overwrite document `d`, splicing the arenas and shifting the
    /// offsets of every later document.
    pub fn replace_document(&mut self, d: usize, doc: Document) -> Result<(), CorpusError> {
        if d >= self.len() {
            return Err(CorpusError::Invalid);
        }

        let (lb, ub) = (self.token_offsets[d], self.token_offsets[d + 1]);
        let delta = doc.terms.len() as isize - (ub - lb) as isize;
        self.terms.splice(lb..ub, doc.terms.iter().copied());
        self.counts.splice(lb..ub, doc.counts.iter().copied());
        shift_offsets(&mut self.token_offsets[(d + 1)..], delta);

        let (lb, ub) = (self.rating_offsets[d], self.rating_offsets[d + 1]);
        let delta = doc.readers.len() as isize - (ub - lb) as isize;
        self.readers.splice(lb..ub, doc.readers.iter().copied());
        self.ratings.splice(lb..ub, doc.ratings.iter().copied());
        shift_offsets(&mut self.rating_offsets[(d + 1)..], delta);

        self.stamps[d] = doc.stamp;
        self.titles[d] = doc.title;
        Ok(())
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// No documents
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Every document has zero terms (trivially true for an empty corpus)
    pub fn all_documents_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Vocabulary size V
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Number of users U
    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    /// Term labels
    pub fn vocab(&self) -> &[Box<str>] {
        &self.vocab
    }

    /// User labels
    pub fn users(&self) -> &[Box<str>] {
        &self.users
    }

    /// Document `d` if it exists
    pub fn get(&self, d: usize) -> Option<DocumentView<'_>> {
        if d < self.len() {
            Some(self.document(d))
        } else {
            None
        }
    }

    /// Document `d`; panics when out of range
    pub fn document(&self, d: usize) -> DocumentView<'_> {
        let (lb, ub) = (self.token_offsets[d], self.token_offsets[d + 1]);
        let (rb, re) = (self.rating_offsets[d], self.rating_offsets[d + 1]);
        DocumentView {
            terms: &self.terms[lb..ub],
            counts: &self.counts[lb..ub],
            readers: &self.readers[rb..re],
            ratings: &self.ratings[rb..re],
            stamp: self.stamps[d],
            title: self.titles[d].as_deref(),
        }
    }

    /// Iterate over document views
    pub fn iter(&self) -> impl Iterator<Item = DocumentView<'_>> + '_ {
        (0..self.len()).map(move |d| self.document(d))
    }

    /// Σ counts over the corpus
    pub fn total_tokens(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Σ ratings over the corpus
    pub fn total_ratings(&self) -> u64 {
        self.ratings.iter().map(|&r| r as u64).sum()
    }

    /// Average number of tokens per document (0 for an empty corpus)
    pub fn mean_document_length(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.total_tokens() as f64 / self.len() as f64
        }
    }

    /// Flat term arena
    pub fn term_arena(&self) -> &[u32] {
        &self.terms
    }

    /// Flat count arena
    pub fn count_arena(&self) -> &[u32] {
        &self.counts
    }

    /// Token offsets, length M + 1
    pub fn token_offsets(&self) -> &[usize] {
        &self.token_offsets
    }

    /// Flat reader arena
    pub fn reader_arena(&self) -> &[u32] {
        &self.readers
    }

    /// Flat rating arena
    pub fn rating_arena(&self) -> &[u32] {
        &self.ratings
    }

    /// Rating offsets, length M + 1
    pub fn rating_offsets(&self) -> &[usize] {
        &self.rating_offsets
    }

    /// For each user (0-based), the documents (0-based) in its library
    pub fn libraries(&self) -> Vec<Vec<usize>> {
        let mut libs = vec![vec![]; self.num_users()];
        for (d, doc) in self.iter().enumerate() {
            for &u in doc.readers {
                if let Some(lib) = (u as usize).checked_sub(1).and_then(|i| libs.get_mut(i)) {
                    lib.push(d);
                }
            }
        }
        libs
    }

    /// Validate every corpus invariant
    pub fn check(&self) -> Result<(), CorpusError> {
        let m = self.len();
        let offsets_ok = |offsets: &[usize], arena_len: usize| {
            offsets.len() == m + 1
                && offsets[0] == 0
                && offsets.windows(2).all(|w| w[0] <= w[1])
                && offsets[m] == arena_len
        };

        if !offsets_ok(&self.token_offsets, self.terms.len())
            || !offsets_ok(&self.rating_offsets, self.readers.len())
            || self.counts.len() != self.terms.len()
            || self.ratings.len() != self.readers.len()
            || self.titles.len() != m
        {
            return Err(CorpusError::Invalid);
        }

        for doc in self.iter() {
            doc.to_document().check()?;
        }

        let vv = self.vocab_size() as u32;
        let uu = self.num_users() as u32;
        if self.terms.iter().any(|&t| t > vv) || self.readers.iter().any(|&u| u > uu) {
            return Err(CorpusError::Invalid);
        }
        Ok(())
    }
}

fn shift_offsets(offsets: &mut [usize], delta: isize) {
    for o in offsets.iter_mut() {
        *o = (*o as isize + delta) as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Corpus {
        Corpus::from_documents(vec![
            Document::new(vec![1, 2], vec![2, 1]).with_readers(vec![1], vec![1]),
            Document::new(vec![3], vec![4]),
            Document::new(vec![2, 4, 5], vec![1, 1, 1]).with_readers(vec![2, 1], vec![3, 1]),
        ])
        .with_numeric_labels()
    }

    #[test]
    fn test_arena_layout() {
        let corpus = toy();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.vocab_size(), 5);
        assert_eq!(corpus.num_users(), 2);
        assert_eq!(corpus.token_offsets(), &[0, 2, 3, 6]);
        assert_eq!(corpus.rating_offsets(), &[0, 1, 1, 3]);
        assert_eq!(corpus.document(2).terms, &[2, 4, 5]);
        assert_eq!(corpus.total_tokens(), 10);
        assert!(corpus.check().is_ok());
    }

    #[test]
    fn test_replace_document_shifts_offsets() {
        let mut corpus = toy();
        corpus
            .replace_document(0, Document::new(vec![5, 1, 3], vec![1, 1, 1]))
            .unwrap();
        assert_eq!(corpus.token_offsets(), &[0, 3, 4, 7]);
        assert_eq!(corpus.rating_offsets(), &[0, 0, 0, 2]);
        assert_eq!(corpus.document(1).terms, &[3]);
        assert_eq!(corpus.document(2).readers, &[2, 1]);
        assert!(corpus.check().is_ok());
        assert!(corpus.replace_document(9, Document::default()).is_err());
    }

    #[test]
    fn test_out_of_range_ids_are_invalid() {
        let corpus = toy().with_vocab(vec![Box::from("a")]);
        assert!(matches!(corpus.check(), Err(CorpusError::Invalid)));
    }

    #[test]
    fn test_libraries() {
        let libs = toy().libraries();
        assert_eq!(libs, vec![vec![0, 2], vec![2]]);
    }
}
