use crate::error::CorpusError;
use std::collections::HashSet;

/// An owned document, used to build or edit a corpus.
///
/// * `terms` - term ids (1-based, unique within the document)
/// * `counts` - number of occurrences of each term (positive)
/// * `readers` - user ids who interacted with the document (1-based, unique)
/// * `ratings` - interaction strength of each reader (positive)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    /// Term ids
    pub terms: Vec<u32>,
    /// Term counts, aligned with `terms`
    pub counts: Vec<u32>,
    /// Reader ids
    pub readers: Vec<u32>,
    /// Ratings, aligned with `readers`
    pub ratings: Vec<u32>,
    /// Optional timestamp
    pub stamp: Option<f64>,
    /// Optional title
    pub title: Option<Box<str>>,
}

impl Document {
    /// A document with terms and counts only
    pub fn new(terms: Vec<u32>, counts: Vec<u32>) -> Self {
        Self {
            terms,
            counts,
            ..Default::default()
        }
    }

    /// Attach readers and ratings
    pub fn with_readers(mut self, readers: Vec<u32>, ratings: Vec<u32>) -> Self {
        self.readers = readers;
        self.ratings = ratings;
        self
    }

    /// Document-local invariants: aligned lists, positive ids and values,
    /// unique term and reader ids.
    pub fn check(&self) -> Result<(), CorpusError> {
        check_lists(&self.terms, &self.counts)?;
        check_lists(&self.readers, &self.ratings)
    }

    /// Borrow as a view
    pub fn view(&self) -> DocumentView<'_> {
        DocumentView {
            terms: &self.terms,
            counts: &self.counts,
            readers: &self.readers,
            ratings: &self.ratings,
            stamp: self.stamp,
            title: self.title.as_deref(),
        }
    }
}

fn check_lists(ids: &[u32], values: &[u32]) -> Result<(), CorpusError> {
    if ids.len() != values.len() {
        return Err(CorpusError::Invalid);
    }
    if ids.iter().any(|&i| i == 0) || values.iter().any(|&v| v == 0) {
        return Err(CorpusError::Invalid);
    }
    let mut seen = HashSet::with_capacity(ids.len());
    if !ids.iter().all(|i| seen.insert(*i)) {
        return Err(CorpusError::Invalid);
    }
    Ok(())
}

/// A document as ranges into the corpus arenas.
#[derive(Debug, Clone, Copy)]
pub struct DocumentView<'a> {
    /// Term ids
    pub terms: &'a [u32],
    /// Term counts
    pub counts: &'a [u32],
    /// Reader ids
    pub readers: &'a [u32],
    /// Ratings
    pub ratings: &'a [u32],
    /// Timestamp
    pub stamp: Option<f64>,
    /// Title
    pub title: Option<&'a str>,
}

impl DocumentView<'_> {
    /// Number of unique terms
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// No terms at all
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Number of readers
    pub fn num_readers(&self) -> usize {
        self.readers.len()
    }

    /// Total number of tokens, Σ counts
    pub fn total_count(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Σ ratings
    pub fn total_rating(&self) -> u64 {
        self.ratings.iter().map(|&r| r as u64).sum()
    }

    /// Copy into an owned document
    pub fn to_document(&self) -> Document {
        Document {
            terms: self.terms.to_vec(),
            counts: self.counts.to_vec(),
            readers: self.readers.to_vec(),
            ratings: self.ratings.to_vec(),
            stamp: self.stamp,
            title: self.title.map(Box::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_check() {
        let doc = Document::new(vec![1, 4, 2], vec![3, 1, 1]).with_readers(vec![2], vec![5]);
        assert!(doc.check().is_ok());
        assert_eq!(doc.view().total_count(), 5);
        assert_eq!(doc.view().total_rating(), 5);
    }

    #[test]
    fn test_document_rejects_malformed_lists() {
        // misaligned
        assert!(Document::new(vec![1, 2], vec![1]).check().is_err());
        // zero id
        assert!(Document::new(vec![0], vec![1]).check().is_err());
        // zero count
        assert!(Document::new(vec![1], vec![0]).check().is_err());
        // duplicate term
        assert!(Document::new(vec![3, 3], vec![1, 1]).check().is_err());
        // duplicate reader
        let doc = Document::new(vec![1], vec![1]).with_readers(vec![2, 2], vec![1, 1]);
        assert!(doc.check().is_err());
    }

    #[test]
    fn test_empty_document_is_valid() {
        let doc = Document::default();
        assert!(doc.check().is_ok());
        assert!(doc.view().is_empty());
    }
}
