use thiserror::Error;

/// Errors raised by the document store.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// A document or corpus invariant does not hold.
    #[error("corpus invalid")]
    Invalid,

    /// A docfile line could not be parsed.
    #[error("docfile line {line}: {what}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// what was expected at that line
        what: &'static str,
    },
}
