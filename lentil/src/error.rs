use corpus_beans::CorpusError;
use thiserror::Error;

/// Errors surfaced by the training, validation and generative entry points.
///
/// Numerical non-convergence of an inner Newton solve is not an error;
/// the best-effort iterate is kept and training proceeds.
#[derive(Debug, Error)]
pub enum TopicError {
    /// A training or generation argument is out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The attached corpus fails validation
    #[error("corpus invalid")]
    InvalidCorpus,

    /// The model fails validation
    #[error("model invalid")]
    InvalidModel,

    /// Corpus store failure
    #[error(transparent)]
    Corpus(#[from] CorpusError),
}
