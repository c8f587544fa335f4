mod fit_model;
mod gen_corpus;
mod write_outputs;

use clap::{Parser, Subcommand};
use fit_model::*;
use gen_corpus::*;
use log::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Variational Bayesian topic models\n\
		  LDA, filtered LDA, CTM, filtered CTM and collaborative topic\n\
		  Poisson factorization (CTPF), the latter also on a candle device.\n\
		  Documents are read from docfiles: one line of term ids and one line\n\
		  of counts per document (plus reader ids and ratings with --readers)."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Fit a topic model",
        long_about = "Fit a topic model by variational coordinate ascent:\n\
		      (1) Local updates of every document's variational posterior\n\
		      (2) Global updates from the aggregated statistics\n\
		      (3) ELBO checks until |ΔELBO| falls below the tolerance.\n"
    )]
    Train(TrainModelArgs),

    #[command(
        about = "Generate a synthetic corpus from a fitted model",
        long_about = "Fit a topic model (possibly for zero epochs) and sample\n\
		      a synthetic corpus from its generative process.\n\
		      The vocabulary and users of the input corpus are kept."
    )]
    Generate(GenerateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            run_train(args)?;
        }
        Commands::Generate(args) => {
            run_generate(args)?;
        }
    }

    info!("Done");
    Ok(())
}
