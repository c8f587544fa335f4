use crate::fit_model::*;

use clap::Args;
use lentil::corpus_beans::io::{write_corpus, write_labels};
use lentil::gencorp;
use log::info;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    fit: TrainModelArgs,

    #[arg(
        long,
        default_value_t = 100,
        help = "Number of documents",
        long_help = "Number of synthetic documents to sample.\n\
		     Document lengths are Poisson around the input mean length."
    )]
    size: usize,

    #[arg(
        long,
        default_value_t = 0.0,
        help = "Laplace smoothing",
        long_help = "Pseudo-count added to every topic-term probability\n\
		     before sampling (finite, non-negative)."
    )]
    laplace_smooth: f64,

    #[arg(
        long,
        default_value_t = 7,
        help = "Sampling seed",
        long_help = "Random seed of the sampler; the same seed reproduces\n\
		     the same corpus."
    )]
    gen_seed: u64,
}

/// Fit, then write `{out}.docs.txt.gz`, `{out}.vocab.txt` and (with
/// users) `{out}.users.txt`
pub fn run_generate(args: &GenerateArgs) -> anyhow::Result<()> {
    init_logger(args.fit.verbose);

    let (model, _) = fit_model(&args.fit)?;
    let (size, s, seed) = (args.size, args.laplace_smooth, args.gen_seed);

    let corpus = match &model {
        FittedModel::Lda(m) => gencorp(m, size, s, seed)?,
        FittedModel::Ctm(m) => gencorp(m, size, s, seed)?,
        FittedModel::Ctpf(m) => gencorp(m, size, s, seed)?,
    };

    let out = &args.fit.out;
    let with_readers = corpus.num_users() > 0;
    write_corpus(&corpus, &format!("{}.docs.txt.gz", out), with_readers)?;
    write_labels(corpus.vocab(), &format!("{}.vocab.txt", out))?;
    if with_readers {
        write_labels(corpus.users(), &format!("{}.users.txt", out))?;
    }
    info!("wrote {} synthetic documents to {}.docs.txt.gz", corpus.len(), out);
    Ok(())
}
