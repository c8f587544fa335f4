use crate::write_outputs::*;

use clap::{Args, ValueEnum};
use lentil::corpus_beans::io::read_corpus;
use lentil::corpus_beans::Corpus;
use lentil::gpu::{train_gpu, GpuOptions};
use lentil::*;
use log::info;
use std::sync::Arc;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ModelKind {
    Lda,
    Flda,
    Ctm,
    Fctm,
    Ctpf,
    Gpuctpf,
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum FloatType {
    F32,
    F64,
}

#[derive(Args, Debug)]
pub struct TrainModelArgs {
    #[arg(
        long,
        required = true,
        help = "Docfile",
        long_help = "Docfile with one block of lines per document:\n\
		     term ids, counts (and reader ids, ratings with --readers).\n\
		     Ids are 1-based and comma-separated; `.gz` is read transparently."
    )]
    docs: Box<str>,

    #[arg(
        long,
        help = "Vocabulary file",
        long_help = "Vocabulary file (one term label per line, line i labels term i).\n\
		     Numeric labels are used if not specified."
    )]
    vocab: Option<Box<str>>,

    #[arg(
        long,
        help = "User file",
        long_help = "User file (one user label per line, line u labels user u).\n\
		     Numeric labels are used if not specified."
    )]
    users: Option<Box<str>>,

    #[arg(
        long,
        default_value_t = false,
        help = "Docfile carries readers",
        long_help = "Each document block carries two more lines:\n\
		     reader ids and their ratings."
    )]
    readers: bool,

    #[arg(
        short = 'k',
        long,
        default_value_t = 10,
        help = "Number of topics",
        long_help = "Number of topics K (positive)."
    )]
    num_topics: usize,

    #[arg(
        long,
        value_enum,
        default_value = "lda",
        help = "Model",
        long_help = "Model to fit.\n\
		     Options: lda, flda, ctm, fctm, ctpf, gpuctpf.\n\
		     gpuctpf runs CTPF on the chosen --device."
    )]
    model: ModelKind,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results.\n\
		     Specify the output file or prefix for generated files:\n\
		     - {out}.topics.tsv.gz\n\
		     - {out}.doc_topics.tsv.gz\n\
		     - {out}.top_terms.tsv\n\
		     - {out}.doc_recommendations.tsv.gz (CTPF)\n\
		     - {out}.user_recommendations.tsv.gz (CTPF)\n\
		     - {out}.summary.json\n"
    )]
    pub out: Box<str>,

    #[arg(
        long,
        default_value_t = 150,
        help = "Maximum number of epochs",
        long_help = "Maximum number of epochs (0 keeps the initial parameters)."
    )]
    iter: usize,

    #[arg(
        long,
        default_value_t = 1.0,
        help = "ELBO tolerance",
        long_help = "Stop once |ΔELBO| between two checks falls below this.\n\
		     0 runs every epoch."
    )]
    tol: f64,

    #[arg(
        long,
        default_value_t = 1000,
        help = "Maximum Newton iterations",
        long_help = "Maximum Newton iterations of the Dirichlet (LDA)\n\
		     and logistic-normal (CTM) updates."
    )]
    niter: usize,

    #[arg(
        long,
        help = "Newton tolerance",
        long_help = "Newton gradient-norm tolerance. Default: 1/K^2"
    )]
    ntol: Option<f64>,

    #[arg(
        long,
        default_value_t = 10,
        help = "Maximum local iterations",
        long_help = "Maximum local iterations per document and epoch."
    )]
    viter: usize,

    #[arg(
        long,
        help = "Local tolerance",
        long_help = "Local convergence tolerance. Default: 1/K^2"
    )]
    vtol: Option<f64>,

    #[arg(
        long,
        default_value = "1",
        help = "ELBO check cadence",
        long_help = "Evaluate the ELBO every n epochs, or never with `inf`."
    )]
    check_elbo: CheckElbo,

    #[arg(
        long,
        default_value_t = false,
        help = "Update the mixing rate",
        long_help = "Re-estimate the thematic mixing rate of the filtered\n\
		     models (flda, fctm) every epoch."
    )]
    update_mixing_rate: bool,

    #[arg(
        long,
        default_value_t = 10,
        help = "Number of top terms per topic",
        long_help = "Number of most probable terms written to {out}.top_terms.tsv"
    )]
    top_terms: usize,

    #[arg(
        long,
        default_value_t = 42,
        help = "Random seed",
        long_help = "Random seed of the initial parameters."
    )]
    seed: u64,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device of the gpuctpf model.\n\
		     Options: cpu, cuda, metal."
    )]
    device: ComputeDevice,

    #[arg(
        long,
        default_value_t = 0,
        help = "A device for cuda",
        long_help = "For cuda or metal, we may want to choose a different device."
    )]
    device_no: usize,

    #[arg(
        long,
        value_enum,
        default_value = "f64",
        help = "Device precision",
        long_help = "Floating point type of the gpuctpf device arrays.\n\
		     Options: f32, f64 (Metal supports f32 only)."
    )]
    dtype: FloatType,

    #[arg(
        long,
        short,
        help = "Verbosity",
        long_help = "Enable verbose output.\n\
		     Logs the ELBO trace in place of the epoch progress bar."
    )]
    pub verbose: bool,
}

/// A model after training
pub enum FittedModel {
    Lda(Lda),
    Ctm(Ctm),
    Ctpf(Ctpf),
}

pub fn init_logger(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}

impl TrainModelArgs {
    fn train_args(&self) -> TrainArgs {
        TrainArgs {
            iter: self.iter,
            tol: self.tol,
            niter: self.niter,
            ntol: self.ntol,
            viter: self.viter,
            vtol: self.vtol,
            check_elbo: self.check_elbo,
            show_progress: !self.verbose,
        }
    }

    fn gpu_options(&self) -> anyhow::Result<GpuOptions> {
        let device = match self.device {
            ComputeDevice::Metal => candle_core::Device::new_metal(self.device_no)?,
            ComputeDevice::Cuda => candle_core::Device::new_cuda(self.device_no)?,
            _ => candle_core::Device::Cpu,
        };
        let dtype = match self.dtype {
            FloatType::F32 => candle_core::DType::F32,
            FloatType::F64 => candle_core::DType::F64,
        };
        Ok(GpuOptions { device, dtype })
    }

    fn read_corpus(&self) -> anyhow::Result<Arc<Corpus>> {
        let corpus = read_corpus(&self.docs, self.vocab.as_deref(), self.users.as_deref(), self.readers)?;
        Ok(Arc::new(corpus))
    }
}

/// Read the corpus and fit the requested model
pub fn fit_model(args: &TrainModelArgs) -> anyhow::Result<(FittedModel, TrainSummary)> {
    let corpus = args.read_corpus()?;
    let train_args = args.train_args();
    let (k, seed) = (args.num_topics, args.seed);

    let ret = match args.model {
        ModelKind::Lda | ModelKind::Flda => {
            let mut lda = if args.model == ModelKind::Flda {
                Lda::filtered(corpus, k, seed)?
            } else {
                Lda::new(corpus, k, seed)?
            };
            if let Some(filter) = lda.filter.as_mut() {
                filter.update_mixing_rate = args.update_mixing_rate;
            }
            let summary = train(&mut lda, &train_args)?;
            (FittedModel::Lda(lda), summary)
        }
        ModelKind::Ctm | ModelKind::Fctm => {
            let mut ctm = if args.model == ModelKind::Fctm {
                Ctm::filtered(corpus, k, seed)?
            } else {
                Ctm::new(corpus, k, seed)?
            };
            if let Some(filter) = ctm.filter.as_mut() {
                filter.update_mixing_rate = args.update_mixing_rate;
            }
            let summary = train(&mut ctm, &train_args)?;
            (FittedModel::Ctm(ctm), summary)
        }
        ModelKind::Ctpf => {
            let mut ctpf = Ctpf::new(corpus, k, seed)?;
            let summary = train(&mut ctpf, &train_args)?;
            (FittedModel::Ctpf(ctpf), summary)
        }
        ModelKind::Gpuctpf => {
            let options = args.gpu_options()?;
            info!("CTPF on {:?} ({:?})", options.device, options.dtype);
            let mut ctpf = Ctpf::new(corpus, k, seed)?;
            let summary = train_gpu(&mut ctpf, &train_args, &options)?;
            (FittedModel::Ctpf(ctpf), summary)
        }
    };

    let (_, summary) = &ret;
    info!(
        "{}: {} epochs, converged: {}, final ELBO: {:?}",
        summary.model,
        summary.epochs,
        summary.converged,
        summary.last_elbo()
    );
    Ok(ret)
}

pub fn run_train(args: &TrainModelArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let (model, summary) = fit_model(args)?;
    let out = &args.out;

    match &model {
        FittedModel::Lda(m) => write_topic_outputs(m, out, args.top_terms)?,
        FittedModel::Ctm(m) => write_topic_outputs(m, out, args.top_terms)?,
        FittedModel::Ctpf(m) => {
            write_topic_outputs(m, out, args.top_terms)?;
            write_recommendations(m, out)?;
        }
    }
    write_summary(&summary, &format!("{}.summary.json", out))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cmd {
        #[command(flatten)]
        args: TrainModelArgs,
    }

    fn parse(extra: &[&str]) -> TrainModelArgs {
        let argv = ["lentil", "--docs", "docs.txt.gz", "-o", "out"];
        Cmd::parse_from(argv.iter().chain(extra)).args
    }

    #[test]
    fn test_verbose_replaces_progress_bar() {
        let quiet = parse(&[]).train_args();
        assert!(quiet.show_progress);

        let verbose = parse(&["--verbose"]).train_args();
        assert!(!verbose.show_progress);
        assert_eq!(verbose.iter, quiet.iter);
    }
}
