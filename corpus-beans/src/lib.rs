//! Sparse document store for topic models.
//!
//! A corpus keeps every document's `(term, count)` and `(reader, rating)`
//! lists in shared flat arenas indexed by monotonic per-document offsets.
//! A document is a pair of ranges into those arenas rather than an owned
//! nested container, which lets the CPU models and the GPU kernels read
//! the same layout.
//!
//! Term ids and user ids are 1-based and dense: id `i` is labelled by
//! entry `i - 1` of the vocabulary (users) dictionary.

#![deny(missing_docs)]

/// Owned documents and borrowed document views
pub mod document;

/// Arena-backed corpus container and its validation
pub mod corpus;

/// Ragged-to-flat encoding with segment boundaries and sort permutations
pub mod flat;

/// Plaintext docfile reader and writer
pub mod io;

mod error;

pub use corpus::Corpus;
pub use document::{Document, DocumentView};
pub use error::CorpusError;
pub use flat::{FlatCorpus, SegmentIndex};
