use crate::common::*;
use crate::error::TopicError;
use crate::validate::Validate;
use indicatif::{ProgressBar, ProgressDrawTarget};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// How often the ELBO is evaluated during training
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckElbo {
    /// every `n` epochs (n ≥ 1)
    Every(usize),
    /// never during training ("inf")
    Never,
}

impl Default for CheckElbo {
    fn default() -> Self {
        CheckElbo::Every(1)
    }
}

impl FromStr for CheckElbo {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("inf") || s.eq_ignore_ascii_case("never") {
            return Ok(CheckElbo::Never);
        }
        match s.parse::<usize>() {
            Ok(n) if n > 0 => Ok(CheckElbo::Every(n)),
            _ => Err(TopicError::InvalidArgument(
                "check_elbo must be a positive integer or inf",
            )),
        }
    }
}

impl fmt::Display for CheckElbo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckElbo::Every(n) => write!(f, "{}", n),
            CheckElbo::Never => write!(f, "inf"),
        }
    }
}

/// Arguments of the training entry point.
#[derive(Debug, Clone)]
pub struct TrainArgs {
    /// Maximum number of epochs. Default: 150
    pub iter: usize,
    /// Stop once |ΔELBO| between two checks falls below this. Default: 1.0
    pub tol: f64,
    /// Maximum Newton iterations. Default: 1000
    pub niter: usize,
    /// Newton gradient-norm tolerance. Default: 1/K²
    pub ntol: Option<f64>,
    /// Maximum local iterations per document. Default: 10
    pub viter: usize,
    /// Local convergence tolerance. Default: 1/K²
    pub vtol: Option<f64>,
    /// ELBO evaluation cadence. Default: every epoch
    pub check_elbo: CheckElbo,
    /// Draw an epoch progress bar. Default: false
    pub show_progress: bool,
}

impl Default for TrainArgs {
    fn default() -> Self {
        TrainArgs {
            iter: 150,
            tol: 1.0,
            niter: 1000,
            ntol: None,
            viter: 10,
            vtol: None,
            check_elbo: CheckElbo::Every(1),
            show_progress: false,
        }
    }
}

impl TrainArgs {
    /// Reject malformed arguments before any work is done
    pub fn validate(&self) -> Result<(), TopicError> {
        let bad_tol = |x: f64| x.is_nan() || x < 0.0;
        if bad_tol(self.tol) {
            return Err(TopicError::InvalidArgument("tol must be non-negative"));
        }
        if self.ntol.is_some_and(bad_tol) {
            return Err(TopicError::InvalidArgument("ntol must be non-negative"));
        }
        if self.vtol.is_some_and(bad_tol) {
            return Err(TopicError::InvalidArgument("vtol must be non-negative"));
        }
        if self.niter == 0 {
            return Err(TopicError::InvalidArgument("niter must be positive"));
        }
        if self.viter == 0 {
            return Err(TopicError::InvalidArgument("viter must be positive"));
        }
        if self.check_elbo == CheckElbo::Every(0) {
            return Err(TopicError::InvalidArgument(
                "check_elbo must be a positive integer or inf",
            ));
        }
        Ok(())
    }

    /// Newton tolerance for `k` topics
    pub fn newton_tol(&self, k: usize) -> f64 {
        self.ntol.unwrap_or_else(|| default_tol(k))
    }

    /// Local convergence tolerance for `k` topics
    pub fn local_tol(&self, k: usize) -> f64 {
        self.vtol.unwrap_or_else(|| default_tol(k))
    }
}

fn default_tol(k: usize) -> f64 {
    1.0 / (k.max(1) as f64).powi(2)
}

/// One ELBO evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ElboCheck {
    /// epochs completed when evaluated (0 = before training)
    pub epoch: usize,
    /// evidence lower bound
    pub elbo: f64,
}

/// What a training run did
#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    /// model name
    pub model: String,
    /// K
    pub num_topics: usize,
    /// M
    pub num_docs: usize,
    /// V
    pub num_terms: usize,
    /// U
    pub num_users: usize,
    /// epochs actually run
    pub epochs: usize,
    /// stopped on the ELBO tolerance rather than the epoch cap
    pub converged: bool,
    /// every ELBO evaluation, in order
    pub elbo_trace: Vec<ElboCheck>,
}

impl TrainSummary {
    /// A run that has not executed any epoch yet
    pub fn start<M: VariationalModel + ?Sized>(model: &M) -> Self {
        let corpus = model.corpus();
        TrainSummary {
            model: model.name().to_string(),
            num_topics: model.num_topics(),
            num_docs: corpus.len(),
            num_terms: corpus.vocab_size(),
            num_users: corpus.num_users(),
            epochs: 0,
            converged: false,
            elbo_trace: vec![],
        }
    }

    /// Last evaluated ELBO
    pub fn last_elbo(&self) -> Option<f64> {
        self.elbo_trace.last().map(|x| x.elbo)
    }
}

/// A model fitted by variational coordinate ascent.
pub trait VariationalModel {
    /// Short name used in logs and summaries
    fn name(&self) -> &'static str;

    /// The attached corpus
    fn corpus(&self) -> &Corpus;

    /// K
    fn num_topics(&self) -> usize;

    /// One pass over the corpus: local updates for every document, then
    /// the global updates from the accumulated statistics.
    fn epoch(&mut self, args: &TrainArgs);

    /// Evaluate (and cache) the ELBO at the current parameters
    fn update_elbo(&mut self) -> f64;

    /// The ELBO cached by the last `update_elbo`
    fn elbo(&self) -> f64;

    /// Normalised topic weights of document `d`
    fn topic_dist(&self, d: usize) -> DVec;

    /// K x V topic-term probabilities
    fn topic_term(&self) -> Mat;

    /// The `n` most probable term indices (zero-based) of topic `k`
    fn top_terms(&self, k: usize, n: usize) -> Vec<usize> {
        let beta = self.topic_term();
        if k >= beta.nrows() {
            return vec![];
        }
        let row: Vec<f64> = beta.row(k).iter().copied().collect();
        top_indices(&row, n)
    }
}

/// Decides when to evaluate the ELBO and when to stop.
///
/// The initial ELBO is evaluated before the first epoch whenever at least
/// one check falls inside the epoch cap. Each later check is compared with
/// the previous evaluation.
#[derive(Debug, Clone)]
pub struct Convergence {
    check_elbo: CheckElbo,
    tol: f64,
    iter: usize,
    trace: Vec<ElboCheck>,
    converged: bool,
}

impl Convergence {
    /// Controller for validated `args`
    pub fn new(args: &TrainArgs) -> Self {
        Convergence {
            check_elbo: args.check_elbo,
            tol: args.tol,
            iter: args.iter,
            trace: vec![],
            converged: false,
        }
    }

    /// Whether an ELBO is needed before the first epoch
    pub fn wants_initial(&self) -> bool {
        match self.check_elbo {
            CheckElbo::Every(n) => n > 0 && n <= self.iter,
            CheckElbo::Never => false,
        }
    }

    /// Whether the ELBO is evaluated after `epoch` (1-based)
    pub fn is_check_epoch(&self, epoch: usize) -> bool {
        match self.check_elbo {
            CheckElbo::Every(n) => n > 0 && epoch % n == 0,
            CheckElbo::Never => false,
        }
    }

    /// Record an evaluation; returns true once |ΔELBO| < tol
    pub fn record(&mut self, epoch: usize, elbo: f64) -> bool {
        if let Some(prev) = self.trace.last() {
            let delta = elbo - prev.elbo;
            info!("epoch {}: ELBO = {:.6}, ΔELBO = {:.3e}", epoch, elbo, delta);
            if delta.abs() < self.tol {
                self.converged = true;
            }
        } else {
            info!("epoch {}: ELBO = {:.6}", epoch, elbo);
        }
        self.trace.push(ElboCheck { epoch, elbo });
        self.converged
    }

    /// Whether the tolerance was met
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Evaluations so far
    pub fn trace(&self) -> &[ElboCheck] {
        &self.trace
    }

    /// Move the evaluations into a summary
    pub fn finish(self, summary: &mut TrainSummary, epochs: usize) {
        summary.epochs = epochs;
        summary.converged = self.converged;
        summary.elbo_trace = self.trace;
    }
}

/// An epoch progress bar, hidden unless requested
pub(crate) fn epoch_progress(args: &TrainArgs) -> ProgressBar {
    let pb = ProgressBar::new(args.iter as u64);
    if !args.show_progress {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb
}

/// Nothing to fit: no documents, or every document is empty
pub(crate) fn nothing_to_fit(corpus: &Corpus) -> bool {
    corpus.is_empty() || corpus.all_documents_empty()
}

/// Fit `model` by variational coordinate ascent.
///
/// Arguments and the model are validated first; nothing is touched when
/// either fails. A corpus without documents (or without a single token)
/// runs zero epochs and leaves every parameter at its initial value.
pub fn train<M>(model: &mut M, args: &TrainArgs) -> Result<TrainSummary, TopicError>
where
    M: VariationalModel + Validate,
{
    args.validate()?;
    model.validate()?;

    let mut summary = TrainSummary::start(model);

    if nothing_to_fit(model.corpus()) {
        info!("{}: no tokens to fit, skipping training", model.name());
        return Ok(summary);
    }

    info!(
        "{}: K = {}, {} documents, {} terms, {} users",
        model.name(),
        model.num_topics(),
        summary.num_docs,
        summary.num_terms,
        summary.num_users
    );

    let mut conv = Convergence::new(args);
    if conv.wants_initial() {
        let elbo = model.update_elbo();
        conv.record(0, elbo);
    }

    let pb = epoch_progress(args);
    let mut epochs = 0;

    for epoch in 1..=args.iter {
        model.epoch(args);
        epochs = epoch;
        pb.inc(1);

        if conv.is_check_epoch(epoch) && conv.record(epoch, model.update_elbo()) {
            info!("{}: converged after {} epochs", model.name(), epoch);
            break;
        }
    }
    pb.finish_and_clear();

    if !conv.converged() && epochs == args.iter {
        info!("{}: reached the epoch cap ({})", model.name(), args.iter);
    }

    conv.finish(&mut summary, epochs);
    Ok(summary)
}
