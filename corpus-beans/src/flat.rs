//! Ragged-to-flat encoding.
//!
//! Every token `(d, term, count)` and every rating `(d, user, rating)` of
//! the corpus becomes one entry of a flat array. Entries of the same
//! document are already contiguous (the arena order), so per-document
//! reductions only need the document offsets. Entries that land on the
//! same term (user) column are scattered across documents; for those we
//! compute, once at load time, a stable sort permutation keyed by the
//! column id so that each column owns one contiguous segment.

use crate::corpus::Corpus;
use rayon::prelude::*;
use std::ops::Range;

/// Segments of a flat array after a stable sort by key.
///
/// `permutation[i]` is the original position of the i-th sorted entry,
/// and segment `s` spans sorted positions `offsets[s]..offsets[s + 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentIndex {
    /// sorted position -> original position
    pub permutation: Vec<u32>,
    /// key of each sorted entry
    pub sorted_keys: Vec<u32>,
    /// segment boundaries, length `num_segments + 1`
    pub offsets: Vec<usize>,
}

impl SegmentIndex {
    /// Stable counting sort of `keys` (each `< num_segments`)
    pub fn by_key(keys: &[u32], num_segments: usize) -> Self {
        let mut offsets = vec![0usize; num_segments + 1];
        for &k in keys {
            offsets[k as usize + 1] += 1;
        }
        for s in 0..num_segments {
            offsets[s + 1] += offsets[s];
        }

        let mut next = offsets[..num_segments].to_vec();
        let mut permutation = vec![0u32; keys.len()];
        let mut sorted_keys = vec![0u32; keys.len()];
        for (i, &k) in keys.iter().enumerate() {
            let pos = next[k as usize];
            permutation[pos] = i as u32;
            sorted_keys[pos] = k;
            next[k as usize] += 1;
        }

        Self {
            permutation,
            sorted_keys,
            offsets,
        }
    }

    /// Segments that are already contiguous in the original order
    pub fn contiguous(offsets: &[usize]) -> Self {
        let n = offsets.last().copied().unwrap_or(0);
        let mut sorted_keys = vec![0u32; n];
        for (s, w) in offsets.windows(2).enumerate() {
            sorted_keys[w[0]..w[1]].fill(s as u32);
        }
        Self {
            permutation: (0..n as u32).collect(),
            sorted_keys,
            offsets: offsets.to_vec(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.permutation.len()
    }

    /// No entries
    pub fn is_empty(&self) -> bool {
        self.permutation.is_empty()
    }

    /// Number of segments
    pub fn num_segments(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Sorted positions of segment `s`
    pub fn segment(&self, s: usize) -> Range<usize> {
        self.offsets[s]..self.offsets[s + 1]
    }

    /// Sorted position of each segment's last entry; `len()` for an empty
    /// segment so that a gather can point it at a zero padding row.
    pub fn last_positions(&self) -> Vec<u32> {
        self.offsets
            .windows(2)
            .map(|w| {
                if w[1] > w[0] {
                    (w[1] - 1) as u32
                } else {
                    self.len() as u32
                }
            })
            .collect()
    }

    /// Segmented reduction of row-major `values` (`len() x width`, original
    /// order). Each segment is reduced sequentially by one task and writes
    /// only its own output row, so no two tasks touch the same slot.
    pub fn reduce(&self, values: &[f64], width: usize) -> Vec<f64> {
        debug_assert_eq!(values.len(), self.len() * width);
        let mut out = vec![0.0; self.num_segments() * width];
        out.par_chunks_mut(width.max(1))
            .enumerate()
            .for_each(|(s, acc)| {
                for pos in self.segment(s) {
                    let i = self.permutation[pos] as usize;
                    for (a, v) in acc.iter_mut().zip(&values[i * width..(i + 1) * width]) {
                        *a += v;
                    }
                }
            });
        out
    }
}

/// Flattened, zero-based view of a corpus.
#[derive(Debug, Clone)]
pub struct FlatCorpus {
    /// M
    pub num_docs: usize,
    /// V
    pub num_terms: usize,
    /// U
    pub num_users: usize,
    /// zero-based term of each token
    pub token_terms: Vec<u32>,
    /// count of each token
    pub token_counts: Vec<f64>,
    /// document of each token
    pub token_docs: Vec<u32>,
    /// per-document token boundaries, length M + 1
    pub doc_token_offsets: Vec<usize>,
    /// zero-based user of each rating
    pub rating_users: Vec<u32>,
    /// value of each rating
    pub rating_values: Vec<f64>,
    /// document of each rating
    pub rating_docs: Vec<u32>,
    /// per-document rating boundaries, length M + 1
    pub doc_rating_offsets: Vec<usize>,
    /// tokens sorted by term
    pub term_segments: SegmentIndex,
    /// ratings sorted by user
    pub user_segments: SegmentIndex,
}

impl FlatCorpus {
    /// Encode a validated corpus
    pub fn encode(corpus: &Corpus) -> Self {
        let num_docs = corpus.len();
        let num_terms = corpus.vocab_size();
        let num_users = corpus.num_users();

        let token_terms: Vec<u32> = corpus.term_arena().iter().map(|&t| t - 1).collect();
        let token_counts: Vec<f64> = corpus.count_arena().iter().map(|&c| c as f64).collect();
        let doc_token_offsets = corpus.token_offsets().to_vec();
        let token_docs = segment_owners(&doc_token_offsets);

        let rating_users: Vec<u32> = corpus.reader_arena().iter().map(|&u| u - 1).collect();
        let rating_values: Vec<f64> = corpus.rating_arena().iter().map(|&r| r as f64).collect();
        let doc_rating_offsets = corpus.rating_offsets().to_vec();
        let rating_docs = segment_owners(&doc_rating_offsets);

        let term_segments = SegmentIndex::by_key(&token_terms, num_terms);
        let user_segments = SegmentIndex::by_key(&rating_users, num_users);

        log::debug!(
            "flattened {} documents: {} tokens over {} terms, {} ratings over {} users",
            num_docs,
            token_terms.len(),
            num_terms,
            rating_users.len(),
            num_users
        );

        Self {
            num_docs,
            num_terms,
            num_users,
            token_terms,
            token_counts,
            token_docs,
            doc_token_offsets,
            rating_users,
            rating_values,
            rating_docs,
            doc_rating_offsets,
            term_segments,
            user_segments,
        }
    }

    /// Number of token entries
    pub fn num_tokens(&self) -> usize {
        self.token_terms.len()
    }

    /// Number of rating entries
    pub fn num_ratings(&self) -> usize {
        self.rating_users.len()
    }

    /// Tokens grouped by document (identity permutation)
    pub fn doc_token_segments(&self) -> SegmentIndex {
        SegmentIndex::contiguous(&self.doc_token_offsets)
    }

    /// Ratings grouped by document (identity permutation)
    pub fn doc_rating_segments(&self) -> SegmentIndex {
        SegmentIndex::contiguous(&self.doc_rating_offsets)
    }
}

fn segment_owners(offsets: &[usize]) -> Vec<u32> {
    let n = offsets.last().copied().unwrap_or(0);
    let mut owners = vec![0u32; n];
    for (s, w) in offsets.windows(2).enumerate() {
        owners[w[0]..w[1]].fill(s as u32);
    }
    owners
}
