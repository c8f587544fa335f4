//! Variational parameter families shared by the topic models:
//! Gamma shape/rate arrays, Dirichlet expectations and the special
//! functions they need.

/// Digamma, trigamma, log-sum-exp and softmax helpers
pub mod special;

/// Dirichlet expectations, entropy and sampling
pub mod dirichlet;

/// Traits for two-statistic parameter arrays
pub mod traits;

/// Gamma shape/rate matrix with a column-shared rate
pub mod dmatrix_gamma;

pub use dmatrix_gamma::GammaMatrix;
pub use traits::{Inference, TwoStatParam};
