//! CTPF on a candle device.
//!
//! The corpus is flattened once ([`corpus_beans::FlatCorpus`]) and kept on
//! the device together with every Gamma factor. An epoch is a fixed
//! sequence of tensor programs:
//!
//! ```text
//! repeat viter times:
//!   (a) φ, ξ          one softmax row per token / rating
//!   (b) θ, ε shapes   segmented sums over each document's entries
//! (d) β, η shapes     permute into term / user order, segmented sums
//! (c) rates           β, η, then θ and ε
//! ```
//!
//! Every stage finishes before the next begins. Parameters travel back to
//! the host model only when the ELBO is evaluated and at the end of
//! training.

/// Tensor programs of the update equations
pub mod kernels;

mod ctpf;

pub use ctpf::{train_gpu, GpuCtpf};

use candle_core::{DType, Device};

/// Where and in which precision the kernels run
#[derive(Debug, Clone)]
pub struct GpuOptions {
    /// Default: `Device::Cpu`
    pub device: Device,
    /// Default: `DType::F64`
    pub dtype: DType,
}

impl Default for GpuOptions {
    fn default() -> Self {
        GpuOptions {
            device: Device::Cpu,
            dtype: DType::F64,
        }
    }
}
