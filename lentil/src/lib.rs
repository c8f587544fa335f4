#![deny(missing_docs)]
//! Variational Bayesian topic models.
//!
//! * [`Lda`]: latent Dirichlet allocation, optionally with a per-token
//!   background filter (fLDA)
//! * [`Ctm`]: correlated topic model with a logistic-normal prior,
//!   optionally filtered (fCTM)
//! * [`Ctpf`]: collaborative topic Poisson factorization over term counts
//!   and reader ratings, with a candle tensor pipeline in [`gpu`]
//!
//! Every model is fitted by [`train`], which alternates per-document
//! local updates with corpus-level global updates until the ELBO
//! stabilises.

/// Shared aliases and small numerical helpers
pub mod common;

/// Error taxonomy
pub mod error;

/// Training arguments, convergence control and the training entry point
pub mod train;

/// Interior-point Newton for the Dirichlet concentration
pub mod newton;

/// Topic-term sufficient statistics
pub mod accumulator;

/// Per-token background filter of the filtered variants
pub mod filter;

/// Latent Dirichlet allocation
pub mod lda;

/// Correlated topic model
pub mod ctm;

/// Collaborative topic Poisson factorization
pub mod ctpf;

/// Model validation contract
pub mod validate;

/// Synthetic corpora from fitted models
pub mod generate;

/// Recommendation lists of a fitted CTPF model
pub mod rank;

/// Candle tensor pipeline for CTPF
pub mod gpu;

pub use accumulator::TopicTermAccumulator;
pub use ctm::Ctm;
pub use ctpf::{Ctpf, CtpfPriors};
pub use error::TopicError;
pub use filter::TokenFilter;
pub use generate::{gencorp, Generative, SmoothedTopics};
pub use lda::Lda;
pub use train::{train, CheckElbo, Convergence, ElboCheck, TrainArgs, TrainSummary, VariationalModel};
pub use validate::Validate;

pub use corpus_beans;
