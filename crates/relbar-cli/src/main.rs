mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pipeline::{SampleArgs, TrainArgs};

/// relbar: adversarial text generation with a variance-tuned REBAR estimator.
#[derive(Parser)]
#[command(name = "relbar", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pretrain and adversarially train a generator/discriminator pair.
    Train {
        /// Path to the TOML config file.
        #[arg(long, default_value = "configs/relbar.toml")]
        config: PathBuf,
        /// Training corpus, one whitespace-tokenized sentence per line.
        #[arg(long)]
        data: PathBuf,
        /// Held-out corpus used as the BLEU reference.
        #[arg(long)]
        test_data: Option<PathBuf>,
        /// Directory for checkpoints, vocabulary and the run report.
        #[arg(long)]
        output_dir: PathBuf,
        /// Generator record to start from; skips MLE pretraining.
        #[arg(long)]
        gen_pretrained: Option<PathBuf>,
        /// Discriminator record to start from; skips discriminator pretraining.
        #[arg(long)]
        dis_pretrained: Option<PathBuf>,
        /// Override the random seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Override the number of adversarial rounds.
        #[arg(long)]
        adv_epochs: Option<usize>,
        /// JSON file with `pre_sig` / `adv_sig` flags, re-read every epoch.
        #[arg(long)]
        signal_file: Option<PathBuf>,
        /// Stop every phase after this many minutes of wall-clock time.
        #[arg(long)]
        max_minutes: Option<u64>,
    },
    /// Print sentences sampled from a trained generator.
    Sample {
        /// Path to the TOML config file.
        #[arg(long, default_value = "configs/relbar.toml")]
        config: PathBuf,
        /// Training corpus the vocabulary was built from.
        #[arg(long)]
        data: PathBuf,
        /// Held-out corpus that was part of the vocabulary, if any.
        #[arg(long)]
        test_data: Option<PathBuf>,
        /// Generator record (e.g. `out/ADV_00100/generator`).
        #[arg(long)]
        checkpoint: PathBuf,
        /// Number of sentences.
        #[arg(long, default_value_t = 10)]
        num: usize,
        /// Override the random seed.
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            data,
            test_data,
            output_dir,
            gen_pretrained,
            dis_pretrained,
            seed,
            adv_epochs,
            signal_file,
            max_minutes,
        } => pipeline::run_train(TrainArgs {
            config,
            data,
            test_data,
            output_dir,
            gen_pretrained,
            dis_pretrained,
            seed,
            adv_epochs,
            signal_file,
            max_minutes,
        }),
        Command::Sample {
            config,
            data,
            test_data,
            checkpoint,
            num,
            seed,
        } => pipeline::run_sample(SampleArgs {
            config,
            data,
            test_data,
            checkpoint,
            num,
            seed,
        }),
    }
}
