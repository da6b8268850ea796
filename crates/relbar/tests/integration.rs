//! Integration tests for the relbar crate.
//!
//! These exercise the trainer end to end on tiny synthetic corpora: the
//! generator update through the REBAR estimator, discriminator pretraining,
//! phase skipping, cooperative stopping, checkpoints and metrics. All use the
//! NdArray backend.

use std::cell::Cell;
use std::rc::Rc;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::prelude::*;

use relbar::estimator::ScoreOracle;
use relbar::model::bridge::{tensor_to_vec, tokens_to_one_hot, tokens_to_tensor};
use relbar::model::discriminator::{DiscriminatorConfig, RelbarDiscriminator};
use relbar::model::generator::{GeneratorConfig, RelbarGenerator};
use relbar::training::checkpoint::{load_generator, read_meta, MpkCheckpointSink};
use relbar::training::data::SequenceDataset;
use relbar::training::loss::{AdversarialOracle, LossType};
use relbar::training::metrics::BleuEvaluator;
use relbar::training::signal::{FileSignal, StopSignal};
use relbar::training::{Phase, PhasePlan, RelbarTrainer, TrainingConfig};
use relbar::vocab::Vocabulary;

type TestAutodiffBackend = Autodiff<NdArray<f32>>;

fn small_config() -> TrainingConfig {
    TrainingConfig {
        batch_size: 4,
        vocab_size: 5,
        max_seq_len: 3,
        mle_train_epoch: 2,
        adv_train_epoch: 2,
        d_step: 1,
        d_epoch: 1,
        adv_g_step: 1,
        adv_d_step: 1,
        samples_num: 16,
        eval_samples: 8,
        pre_log_step: 1,
        adv_log_step: 1,
        seed: 7,
        ..TrainingConfig::default()
    }
}

fn models(config: &TrainingConfig) -> (RelbarGenerator<TestAutodiffBackend>, RelbarDiscriminator<TestAutodiffBackend>) {
    let device = Default::default();
    let generator = GeneratorConfig::new(config.vocab_size, config.max_seq_len)
        .with_embed_dim(8)
        .with_hidden_dim(16)
        .with_temperature(config.temperature)
        .with_eta(config.eta)
        .init(&device);
    let discriminator = DiscriminatorConfig::new(config.vocab_size, config.max_seq_len)
        .with_embed_dim(8)
        .with_hidden_dim(16)
        .init(&device);
    (generator, discriminator)
}

fn trainer_with(config: TrainingConfig, corpus: Vec<Vec<u32>>) -> RelbarTrainer<TestAutodiffBackend> {
    let (generator, discriminator) = models(&config);
    let data = SequenceDataset::new(corpus, config.batch_size, config.max_seq_len, config.padding_idx).unwrap();
    RelbarTrainer::new(config, generator, discriminator, data, Default::default()).unwrap()
}

fn mixed_corpus() -> Vec<Vec<u32>> {
    (0..16).map(|i| vec![3, 1 + (i % 4) as u32, 4]).collect()
}

/// Stops the adversarial phase after `limit` polls.
struct StopAfter {
    polls: Rc<Cell<usize>>,
    limit: usize,
}

impl StopSignal for StopAfter {
    fn update(&mut self) {
        self.polls.set(self.polls.get() + 1);
    }

    fn pre_sig(&self) -> bool {
        true
    }

    fn adv_sig(&self) -> bool {
        self.polls.get() <= self.limit
    }
}

// ---------------------------------------------------------------------------
// Generator update
// ---------------------------------------------------------------------------

#[test]
fn test_one_adversarial_generator_update() {
    let mut trainer = trainer_with(small_config(), mixed_corpus());
    let mut optim = trainer
        .optimizer_config()
        .init::<TestAutodiffBackend, RelbarGenerator<TestAutodiffBackend>>();

    let step = trainer.adv_generator_step(&mut optim).unwrap();

    assert_eq!(step.theta_dims, [4, 3, 5]);
    assert_eq!(step.grad_dims, step.theta_dims);
    assert!(step.adv_loss.is_finite(), "adv_loss = {}", step.adv_loss);
    assert!(step.variance.is_finite() && step.variance >= 0.0);
    assert!(trainer.generator().temperature() > 0.0);
    assert!(trainer.generator().eta() > 0.0);
}

#[test]
fn test_generator_update_under_every_loss_family() {
    for loss_type in [
        LossType::Standard,
        LossType::Js,
        LossType::Kl,
        LossType::Hinge,
        LossType::Tv,
        LossType::Rsgan,
    ] {
        let mut trainer = trainer_with(
            TrainingConfig {
                loss_type,
                ..small_config()
            },
            mixed_corpus(),
        );
        let mut optim = trainer
            .optimizer_config()
            .init::<TestAutodiffBackend, RelbarGenerator<TestAutodiffBackend>>();
        let step = trainer.adv_train_generator(&mut optim, 2).unwrap().unwrap();
        assert!(step.adv_loss.is_finite(), "{loss_type}: adv_loss = {}", step.adv_loss);
    }
}

// ---------------------------------------------------------------------------
// Discriminator pretraining
// ---------------------------------------------------------------------------

#[test]
fn test_discriminator_pretraining_separates_real_from_generated() {
    let config = TrainingConfig {
        batch_size: 16,
        samples_num: 256,
        dis_lr: 1e-2,
        ..small_config()
    };
    let mut trainer = trainer_with(config, vec![vec![1, 1, 1]; 256]);
    let mut optim = trainer
        .optimizer_config()
        .init::<TestAutodiffBackend, RelbarDiscriminator<TestAutodiffBackend>>();

    let stats = trainer.pretrain_discriminator(&mut optim, 1, 1).unwrap().unwrap();
    assert!(stats.loss.is_finite());

    let device = Default::default();
    let probe = tokens_to_one_hot(
        tokens_to_tensor::<TestAutodiffBackend>(&[vec![1, 1, 1], vec![4, 4, 4]], &device).unwrap(),
        5,
    );
    let scores = tensor_to_vec(trainer.discriminator().forward(probe)).unwrap();
    assert!(
        scores[0] > scores[1],
        "score([1,1,1]) = {} should exceed score([4,4,4]) = {}",
        scores[0],
        scores[1]
    );
}

// ---------------------------------------------------------------------------
// Phase plan and stop signals
// ---------------------------------------------------------------------------

#[test]
fn test_pretrained_phases_are_skipped() {
    let mut trainer = trainer_with(small_config(), mixed_corpus());
    let report = trainer
        .run(PhasePlan {
            generator_pretrained: true,
            discriminator_pretrained: false,
        })
        .unwrap();
    assert_eq!(report.phases_run, vec![Phase::PretrainDiscriminator, Phase::Adversarial]);
    assert_eq!(report.mle_epochs, 0);
    assert!(report.last_pre_loss.is_none());
    assert_eq!(report.adv_epochs, 2);
}

#[test]
fn test_signal_is_polled_once_per_round() {
    let polls = Rc::new(Cell::new(0));
    let config = TrainingConfig {
        adv_train_epoch: 10,
        ..small_config()
    };
    let mut trainer = trainer_with(config, mixed_corpus()).with_signal(StopAfter {
        polls: Rc::clone(&polls),
        limit: 3,
    });
    let report = trainer
        .run(PhasePlan {
            generator_pretrained: true,
            discriminator_pretrained: true,
        })
        .unwrap();

    assert_eq!(report.adv_epochs, 3);
    assert_eq!(polls.get(), 4);
    assert_eq!(report.interrupted_in, Some(Phase::Adversarial));
    assert_eq!(trainer.phase(), Phase::Terminated);
}

#[test]
fn test_file_signal_stops_pretraining_then_adversarial() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("run_signal.json");
    std::fs::write(&path, r#"{"pre_sig": false, "adv_sig": false}"#).unwrap();

    let mut trainer = trainer_with(small_config(), mixed_corpus()).with_signal(FileSignal::new(&path));
    let report = trainer.run(PhasePlan::default()).unwrap();

    assert_eq!(report.mle_epochs, 0);
    assert_eq!(report.adv_epochs, 0);
    // Discriminator pretraining is not governed by pre_sig.
    assert_eq!(report.dis_rounds, 1);
    assert_eq!(report.interrupted_in, Some(Phase::Adversarial));
}

// ---------------------------------------------------------------------------
// Shared discriminator
// ---------------------------------------------------------------------------

#[test]
fn test_oracle_scores_with_the_trained_discriminator() {
    let mut trainer = trainer_with(
        TrainingConfig {
            dis_lr: 1e-2,
            loss_type: LossType::Standard,
            ..small_config()
        },
        mixed_corpus(),
    );
    let device = Default::default();
    let probe = || {
        tokens_to_one_hot(
            tokens_to_tensor::<TestAutodiffBackend>(&[vec![3, 2, 4], vec![1, 1, 1]], &device).unwrap(),
            5,
        )
    };
    let real = Tensor::<TestAutodiffBackend, 1>::zeros([2], &device);
    let before = trainer.discriminator().clone();

    let mut optim = trainer
        .optimizer_config()
        .init::<TestAutodiffBackend, RelbarDiscriminator<TestAutodiffBackend>>();
    trainer.adv_train_discriminator(&mut optim, 3).unwrap();

    let stale = AdversarialOracle::new(&before, real.clone(), LossType::Standard).score(probe());
    let live = AdversarialOracle::new(trainer.discriminator(), real.clone(), LossType::Standard).score(probe());
    let direct = LossType::Standard.generator_loss_per_example(trainer.discriminator().forward(probe()), real);

    let stale = tensor_to_vec(stale).unwrap();
    let live = tensor_to_vec(live).unwrap();
    let direct = tensor_to_vec(direct).unwrap();
    assert!(stale.iter().zip(&live).any(|(a, b)| (a - b).abs() > 1e-6));
    for (a, b) in live.iter().zip(&direct) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn test_oracle_gradient_reaches_discriminator_parameters() {
    let trainer = trainer_with(small_config(), mixed_corpus());
    let device = Default::default();
    let soft = Tensor::<TestAutodiffBackend, 3>::ones([2, 3, 5], &device)
        .div_scalar(5.0)
        .require_grad();
    let real = Tensor::<TestAutodiffBackend, 1>::zeros([2], &device);
    let oracle = AdversarialOracle::new(trainer.discriminator(), real, LossType::Rsgan);

    let grads = oracle.score(soft.clone()).sum().backward();
    assert!(soft.grad(&grads).is_some());
    let params = GradientsParams::from_grads(grads, trainer.discriminator());
    assert!(!params.is_empty());
}

// ---------------------------------------------------------------------------
// Checkpoints, metrics and configuration
// ---------------------------------------------------------------------------

#[test]
fn test_run_writes_phase_checkpoints() {
    let tmp = tempfile::tempdir().unwrap();
    let config = TrainingConfig {
        adv_train_epoch: 1,
        ..small_config()
    };
    let gen_config = GeneratorConfig::new(5, 3).with_embed_dim(8).with_hidden_dim(16);
    let mut trainer = trainer_with(config, mixed_corpus()).with_checkpoints(MpkCheckpointSink::new(tmp.path()));
    trainer.run(PhasePlan::default()).unwrap();

    for dir in ["MLE_00000", "MLE_00001", "DIS_00001", "ADV_00000"] {
        assert!(tmp.path().join(dir).join("meta.json").exists(), "missing {dir}");
    }

    let adv_dir = tmp.path().join("ADV_00000");
    let meta = read_meta(&adv_dir).unwrap();
    assert_eq!(meta.phase, "ADV");
    let restored =
        load_generator::<NdArray<f32>>(&adv_dir.join("generator"), &gen_config, &Default::default()).unwrap();
    assert!((restored.temperature() - meta.temperature).abs() < 1e-5);
    assert!((restored.eta() - trainer.generator().valid().eta()).abs() < 1e-5);
}

#[test]
fn test_text_corpus_pipeline_with_bleu() {
    let lines = ["the cat sat", "the dog sat", "a cat ran", "the cat ran"];
    let vocab = Vocabulary::from_corpus(&lines);
    let corpus: Vec<Vec<u32>> = lines.iter().map(|l| vocab.encode(l, 3)).collect();
    let config = TrainingConfig {
        vocab_size: vocab.len(),
        ..small_config()
    };
    let trainer = trainer_with(config, corpus).with_metrics(BleuEvaluator::for_seq_len(3, 0, 8));

    let summary = trainer.cal_metrics().unwrap();
    assert!(summary.contains("BLEU-2"), "{summary}");
    assert!(summary.contains("BLEU-3"), "{summary}");

    let sample = trainer.generate(1, 1).unwrap();
    assert_eq!(sample[0].len(), 3);
    let _ = vocab.decode(&sample[0]);
}

#[test]
fn test_training_section_from_toml() {
    #[derive(serde::Deserialize)]
    struct File {
        training: TrainingConfig,
    }
    let file: File = toml::from_str(
        r#"
[training]
batch_size = 32
max_seq_len = 12
gen_adv_lr = 5e-4
loss_type = "JS"
learn_temperature = false
adv_train_epoch = 10
"#,
    )
    .unwrap();
    let cfg = file.training;
    assert_eq!(cfg.batch_size, 32);
    assert_eq!(cfg.loss_type, LossType::Js);
    assert!(!cfg.learn_temperature);
    assert!(cfg.learn_eta);
    assert_eq!(cfg.adv_train_epoch, 10);
    cfg.validate().unwrap();
}
