//! `train` and `sample` subcommands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};

use relbar::model::bridge::tensor_to_tokens;
use relbar::training::checkpoint::{load_discriminator, load_generator, CheckpointSink, MpkCheckpointSink};
use relbar::training::data::SequenceDataset;
use relbar::training::metrics::BleuEvaluator;
use relbar::training::signal::{AlwaysRun, DeadlineSignal, FileSignal, StopSignal};
use relbar::training::{Phase, PhasePlan, RelbarTrainer};
use relbar::vocab::Vocabulary;

use crate::config::{
    build_training_config, discriminator_config, generator_config, load_relbar_toml, TrainingOverrides,
};

type TrainBackend = Autodiff<NdArray<f32>>;
type SampleBackend = NdArray<f32>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    pub config: PathBuf,
    pub data: PathBuf,
    pub test_data: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub gen_pretrained: Option<PathBuf>,
    pub dis_pretrained: Option<PathBuf>,
    pub seed: Option<u64>,
    pub adv_epochs: Option<usize>,
    pub signal_file: Option<PathBuf>,
    pub max_minutes: Option<u64>,
}

/// Arguments for the `sample` subcommand.
#[derive(Debug)]
pub struct SampleArgs {
    pub config: PathBuf,
    pub data: PathBuf,
    pub test_data: Option<PathBuf>,
    pub checkpoint: PathBuf,
    pub num: usize,
    pub seed: Option<u64>,
}

/// Stops as soon as any member signal does.
struct SignalSet(Vec<Box<dyn StopSignal>>);

impl StopSignal for SignalSet {
    fn update(&mut self) {
        self.0.iter_mut().for_each(|s| s.update());
    }

    fn pre_sig(&self) -> bool {
        self.0.iter().all(|s| s.pre_sig())
    }

    fn adv_sig(&self) -> bool {
        self.0.iter().all(|s| s.adv_sig())
    }
}

/// Non-empty lines of a text corpus.
fn read_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Vocabulary over the training corpus plus the held-out corpus, if any.
fn build_vocabulary(train: &[String], test: &[String]) -> Vocabulary {
    let all: Vec<&str> = train.iter().chain(test).map(String::as_str).collect();
    Vocabulary::from_corpus(&all)
}

fn encode_all(vocab: &Vocabulary, lines: &[String], max_seq_len: usize) -> Vec<Vec<u32>> {
    lines.iter().map(|l| vocab.encode(l, max_seq_len)).collect()
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    // 1. Config and corpus
    let toml = load_relbar_toml(&args.config)?;
    let train_lines = read_lines(&args.data)?;
    let test_lines = match &args.test_data {
        Some(path) => read_lines(path)?,
        None => Vec::new(),
    };
    let vocab = build_vocabulary(&train_lines, &test_lines);
    let config = build_training_config(
        toml.training,
        vocab.len(),
        TrainingOverrides {
            seed: args.seed,
            adv_epochs: args.adv_epochs,
        },
    )?;
    tracing::info!(
        sentences = train_lines.len(),
        held_out = test_lines.len(),
        vocab_size = vocab.len(),
        "Loaded corpus"
    );

    // 2. Models, from scratch or from pretrained records
    let device = Default::default();
    let gen_config = generator_config(&config, toml.generator);
    let dis_config = discriminator_config(&config, toml.discriminator);
    let generator = match &args.gen_pretrained {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading pretrained generator");
            load_generator::<TrainBackend>(path, &gen_config, &device)?
        }
        None => gen_config.init::<TrainBackend>(&device),
    };
    let discriminator = match &args.dis_pretrained {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading pretrained discriminator");
            load_discriminator::<TrainBackend>(path, &dis_config, &device)?
        }
        None => dis_config.init::<TrainBackend>(&device),
    };
    let plan = PhasePlan {
        generator_pretrained: args.gen_pretrained.is_some(),
        discriminator_pretrained: args.dis_pretrained.is_some(),
    };

    // 3. Collaborators
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    let vocab_path = args.output_dir.join("vocab.json");
    serde_json::to_writer(std::fs::File::create(&vocab_path)?, &vocab)?;

    let mut signals: Vec<Box<dyn StopSignal>> = vec![Box::new(AlwaysRun)];
    if let Some(path) = &args.signal_file {
        signals.push(Box::new(FileSignal::new(path)));
    }
    if let Some(minutes) = args.max_minutes {
        signals.push(Box::new(DeadlineSignal::new(Duration::from_secs(minutes * 60))));
    }

    let train_data = SequenceDataset::new(
        encode_all(&vocab, &train_lines, config.max_seq_len),
        config.batch_size,
        config.max_seq_len,
        config.padding_idx,
    )?;
    let reference = if test_lines.is_empty() {
        train_data.samples().to_vec()
    } else {
        encode_all(&vocab, &test_lines, config.max_seq_len)
    };
    let metrics = BleuEvaluator::for_seq_len(config.max_seq_len, config.padding_idx, config.eval_samples);

    let pb = ProgressBar::new(config.mle_train_epoch as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) MLE epochs")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    let progress_bar = pb.clone();

    let mut trainer = RelbarTrainer::new(config, generator, discriminator, train_data, device)?
        .with_signal(SignalSet(signals))
        .with_checkpoints(MpkCheckpointSink::new(&args.output_dir))
        .with_metrics(metrics)
        .with_reference(reference)
        .with_progress(Box::new(move |phase, done, _total| {
            if phase == Phase::PretrainGenerator {
                progress_bar.set_position(done as u64);
            } else if !progress_bar.is_finished() {
                progress_bar.finish_and_clear();
            }
        }));

    // 4. Train
    let report = trainer.run(plan)?;
    pb.finish_and_clear();

    // 5. Final snapshot and report
    let (generator, discriminator) = trainer.into_models();
    let mut final_sink = MpkCheckpointSink::new(&args.output_dir);
    final_sink.save(
        &generator,
        &discriminator,
        Phase::Terminated.checkpoint_label(),
        report.adv_epochs,
    );
    let report_path = args.output_dir.join("report.json");
    serde_json::to_writer_pretty(std::fs::File::create(&report_path)?, &report)?;

    println!("\n--- Training Summary ---");
    println!(
        "Phases: {}",
        report
            .phases_run
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    if let Some(phase) = report.interrupted_in {
        println!("Interrupted in: {phase}");
    }
    println!("MLE epochs: {}", report.mle_epochs);
    println!("Adversarial epochs: {}", report.adv_epochs);
    println!("Temperature: {:.4}", report.temperature);
    println!("Eta: {:.4}", report.eta);
    println!("Output: {}", args.output_dir.display());
    println!("Elapsed: {:.1}s", report.elapsed_secs);

    // Sanity sample from the trained generator
    let sample = tensor_to_tokens(generator.valid().sample(1, 1, &Default::default()))?;
    if let Some(ids) = sample.first() {
        println!("Sample: {}", vocab.decode(ids));
    }
    Ok(())
}

pub fn run_sample(args: SampleArgs) -> anyhow::Result<()> {
    let toml = load_relbar_toml(&args.config)?;
    let train_lines = read_lines(&args.data)?;
    let test_lines = match &args.test_data {
        Some(path) => read_lines(path)?,
        None => Vec::new(),
    };
    let vocab = build_vocabulary(&train_lines, &test_lines);
    let config = build_training_config(
        toml.training,
        vocab.len(),
        TrainingOverrides {
            seed: args.seed,
            adv_epochs: None,
        },
    )?;

    let device = Default::default();
    SampleBackend::seed(config.seed);
    let generator = load_generator::<SampleBackend>(
        &args.checkpoint,
        &generator_config(&config, toml.generator),
        &device,
    )?;
    tracing::info!(
        checkpoint = %args.checkpoint.display(),
        temperature = format!("{:.4}", generator.temperature()),
        eta = format!("{:.4}", generator.eta()),
        "Loaded generator"
    );

    let samples = tensor_to_tokens(generator.sample(args.num, config.batch_size, &device))?;
    for ids in &samples {
        println!("{}", vocab.decode(ids));
    }
    Ok(())
}
