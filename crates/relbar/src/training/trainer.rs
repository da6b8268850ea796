//! Phase-driven adversarial trainer.
//!
//! ```text
//! PRETRAIN_G ──▶ PRETRAIN_D ──▶ ADV ──▶ TERMINATED
//! ```
//!
//! Each phase can be skipped through a [`PhasePlan`]. The stop signal is
//! polled at the start of every pretraining epoch and adversarial round;
//! checkpoints and metrics are side effects that never alter training state.

use std::time::Instant;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{RelbarError, Result};
use crate::estimator::{RebarEstimator, RelaxedSampler, VarianceController};
use crate::model::bridge::{tensor_to_f64, tensor_to_tokens, tensor_to_vec, tokens_to_one_hot, tokens_to_tensor};
use crate::model::discriminator::RelbarDiscriminator;
use crate::model::generator::RelbarGenerator;
use crate::training::checkpoint::{CheckpointSink, NoCheckpoints};
use crate::training::config::TrainingConfig;
use crate::training::data::{DiscriminatorDataset, SequenceDataset};
use crate::training::loss::{bce_with_logits, count_correct, AdversarialOracle};
use crate::training::metrics::{MetricEvaluator, NoMetrics};
use crate::training::phase::{Phase, PhasePlan};
use crate::training::signal::{AlwaysRun, StopSignal};

/// Generated sequences are sampled this many batches at a time during
/// discriminator pretraining.
const PRETRAIN_SAMPLE_BATCHES: usize = 4;

/// Called with `(phase, completed, total)` after every pretraining epoch or
/// adversarial round.
pub type ProgressHook = Box<dyn FnMut(Phase, usize, usize)>;

/// Summary of a [`RelbarTrainer::run`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TrainingReport {
    /// Phases that actually ran, in order.
    pub phases_run: Vec<Phase>,
    /// Phase cut short by the stop signal, if any.
    pub interrupted_in: Option<Phase>,
    pub mle_epochs: usize,
    pub dis_rounds: usize,
    pub adv_epochs: usize,
    pub last_pre_loss: Option<f64>,
    pub last_dis_loss: Option<f64>,
    pub last_adv_g_loss: Option<f64>,
    pub last_adv_d_loss: Option<f64>,
    pub temperature: f64,
    pub eta: f64,
    pub elapsed_secs: f64,
}

/// Result of one adversarial generator update.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvGeneratorStep {
    /// Mean generator loss at the hard sample.
    pub adv_loss: f64,
    /// Shape of the distribution parameters the estimate was taken at.
    pub theta_dims: [usize; 3],
    /// Shape of the gradient estimate.
    pub grad_dims: [usize; 3],
    /// Squared norm of the gradient estimate.
    pub variance: f64,
    /// Temperature and eta used for this update, before the optimizer step.
    pub temperature: f64,
    pub eta: f64,
}

/// Averages over one discriminator phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscriminatorStats {
    pub loss: f64,
    /// `None` for the relativistic loss, where a logit sign means nothing.
    pub accuracy: Option<f64>,
}

pub struct RelbarTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    generator: RelbarGenerator<B>,
    discriminator: RelbarDiscriminator<B>,
    train_data: SequenceDataset,
    reference: Vec<Vec<u32>>,
    signal: Box<dyn StopSignal>,
    checkpoints: Box<dyn CheckpointSink<B>>,
    metrics: Box<dyn MetricEvaluator>,
    progress: Option<ProgressHook>,
    estimator: RebarEstimator,
    controller: VarianceController,
    rng: StdRng,
    device: B::Device,
    phase: Phase,
}

impl<B: AutodiffBackend> RelbarTrainer<B> {
    /// Validate `config` against the models and data, and seed every RNG.
    pub fn new(
        config: TrainingConfig,
        generator: RelbarGenerator<B>,
        discriminator: RelbarDiscriminator<B>,
        train_data: SequenceDataset,
        device: B::Device,
    ) -> Result<Self> {
        config.validate()?;
        if generator.vocab_size() != config.vocab_size {
            return Err(RelbarError::Config(format!(
                "generator vocabulary {} does not match vocab_size {}",
                generator.vocab_size(),
                config.vocab_size
            )));
        }
        if discriminator.vocab_size() != config.vocab_size || discriminator.max_seq_len() != config.max_seq_len {
            return Err(RelbarError::Shape {
                context: "discriminator input",
                expected: vec![config.max_seq_len, config.vocab_size],
                actual: vec![discriminator.max_seq_len(), discriminator.vocab_size()],
            });
        }
        if generator.start_token() != config.start_token as usize {
            return Err(RelbarError::Config(format!(
                "generator start token {} does not match start_token {}",
                generator.start_token(),
                config.start_token
            )));
        }
        if generator.max_seq_len() != config.max_seq_len || train_data.seq_len() != config.max_seq_len {
            return Err(RelbarError::Config(format!(
                "sequence length mismatch: config {}, generator {}, data {}",
                config.max_seq_len,
                generator.max_seq_len(),
                train_data.seq_len()
            )));
        }
        if train_data.batch_size() != config.batch_size {
            return Err(RelbarError::Config(format!(
                "data batch size {} does not match batch_size {}",
                train_data.batch_size(),
                config.batch_size
            )));
        }

        let max_token = train_data.max_token();
        if max_token as usize >= config.vocab_size {
            return Err(RelbarError::Data(format!(
                "corpus token {max_token} is outside the vocabulary of size {}",
                config.vocab_size
            )));
        }

        B::seed(config.seed);
        let reference = train_data.samples().to_vec();
        Ok(Self {
            estimator: RebarEstimator::new(RelaxedSampler::default(), config.finite_difference_step),
            controller: VarianceController::new(config.learn_temperature, config.learn_eta),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            generator,
            discriminator,
            train_data,
            reference,
            signal: Box::new(AlwaysRun),
            checkpoints: Box::new(NoCheckpoints),
            metrics: Box::new(NoMetrics),
            progress: None,
            device,
            phase: Phase::PretrainGenerator,
        })
    }

    pub fn with_signal(mut self, signal: impl StopSignal + 'static) -> Self {
        self.signal = Box::new(signal);
        self
    }

    pub fn with_checkpoints(mut self, sink: impl CheckpointSink<B> + 'static) -> Self {
        self.checkpoints = Box::new(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: impl MetricEvaluator + 'static) -> Self {
        self.metrics = Box::new(metrics);
        self
    }

    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Sequences the metric evaluator compares against (default: the training corpus).
    pub fn with_reference(mut self, reference: Vec<Vec<u32>>) -> Self {
        self.reference = reference;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn generator(&self) -> &RelbarGenerator<B> {
        &self.generator
    }

    pub fn discriminator(&self) -> &RelbarDiscriminator<B> {
        &self.discriminator
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Consume the trainer, returning the trained models.
    pub fn into_models(self) -> (RelbarGenerator<B>, RelbarDiscriminator<B>) {
        (self.generator, self.discriminator)
    }

    /// Adam with per-parameter gradient-norm clipping at `clip_norm`.
    pub fn optimizer_config(&self) -> AdamConfig {
        AdamConfig::new().with_grad_clipping(Some(GradientClippingConfig::Norm(self.config.clip_norm as f32)))
    }

    /// Run every phase in `plan`, in order, until the adversarial budget is
    /// spent or the stop signal fires.
    pub fn run(&mut self, plan: PhasePlan) -> Result<TrainingReport> {
        let start = Instant::now();
        let mut report = TrainingReport::default();

        // Separate Adam state for MLE and adversarial generator updates.
        let mut gen_opt = self.optimizer_config().init::<B, RelbarGenerator<B>>();
        let mut gen_adv_opt = self.optimizer_config().init::<B, RelbarGenerator<B>>();
        let mut dis_opt = self.optimizer_config().init::<B, RelbarDiscriminator<B>>();

        tracing::info!(
            batch_size = self.config.batch_size,
            vocab_size = self.config.vocab_size,
            max_seq_len = self.config.max_seq_len,
            corpus = self.train_data.len(),
            loss_type = %self.config.loss_type,
            "Starting RELBAR training"
        );

        self.phase = Phase::PretrainGenerator;
        while self.phase != Phase::Terminated {
            let phase = self.phase;
            if !plan.should_run(phase) {
                tracing::info!(%phase, "Skipping phase, pretrained weights supplied");
                self.phase = phase.next();
                continue;
            }
            tracing::info!(%phase, "Entering phase");
            report.phases_run.push(phase);
            match phase {
                Phase::PretrainGenerator => {
                    let (epochs, loss, interrupted) = self.pretrain_generator(&mut gen_opt)?;
                    report.mle_epochs = epochs;
                    report.last_pre_loss = loss;
                    if interrupted {
                        report.interrupted_in = Some(phase);
                    }
                }
                Phase::PretrainDiscriminator => {
                    let stats = self.pretrain_discriminator(
                        &mut dis_opt,
                        self.config.d_step,
                        self.config.d_epoch,
                    )?;
                    report.dis_rounds = self.config.d_step;
                    report.last_dis_loss = stats.map(|s| s.loss);
                }
                Phase::Adversarial => {
                    let interrupted = self.adversarial(&mut gen_adv_opt, &mut dis_opt, &mut report)?;
                    if interrupted {
                        report.interrupted_in = Some(phase);
                        self.phase = Phase::Terminated;
                        break;
                    }
                }
                Phase::Terminated => {}
            }
            self.phase = phase.next();
        }

        report.temperature = self.generator.temperature();
        report.eta = self.generator.eta();
        report.elapsed_secs = start.elapsed().as_secs_f64();
        tracing::info!(
            mle_epochs = report.mle_epochs,
            adv_epochs = report.adv_epochs,
            interrupted = report.interrupted_in.is_some(),
            temperature = format!("{:.4}", report.temperature),
            eta = format!("{:.4}", report.eta),
            elapsed_secs = format!("{:.1}", report.elapsed_secs),
            "Training finished"
        );
        Ok(report)
    }

    /// MLE pretraining for `mle_train_epoch` epochs or until `pre_sig` clears.
    ///
    /// Returns `(epochs run, last epoch loss, interrupted)`.
    pub fn pretrain_generator<O>(&mut self, optim: &mut O) -> Result<(usize, Option<f64>, bool)>
    where
        O: Optimizer<RelbarGenerator<B>, B>,
    {
        let epochs = self.config.mle_train_epoch;
        let mut last_loss = None;
        for epoch in 0..epochs {
            self.signal.update();
            if !self.signal.pre_sig() {
                tracing::info!(epoch, "Generator pretraining stopped by signal");
                return Ok((epoch, last_loss, true));
            }

            let loss = self.mle_epoch(optim)?;
            last_loss = Some(loss);
            self.report_progress(Phase::PretrainGenerator, epoch + 1, epochs);

            if epoch % self.config.pre_log_step == 0 || epoch + 1 == epochs {
                let metrics = self.cal_metrics()?;
                tracing::info!(epoch, pre_loss = format!("{loss:.4}"), %metrics, "[MLE-GEN]");
                self.checkpoints.save(
                    &self.generator,
                    &self.discriminator,
                    Phase::PretrainGenerator.checkpoint_label(),
                    epoch,
                );
            }
        }
        Ok((epochs, last_loss, false))
    }

    /// One shuffled pass over the corpus; returns the mean batch loss.
    fn mle_epoch<O>(&mut self, optim: &mut O) -> Result<f64>
    where
        O: Optimizer<RelbarGenerator<B>, B>,
    {
        let batches = self.train_data.shuffled_batches(&mut self.rng);
        let mut total = 0.0;
        for batch in &batches {
            let target = tokens_to_tensor::<B>(batch, &self.device)?;
            let loss = self.generator.mle_loss(target);
            total += tensor_to_f64(loss.clone());
            let grads = GradientsParams::from_grads(loss.backward(), &self.generator);
            self.generator = optim.step(self.config.gen_lr, self.generator.clone(), grads);
        }
        Ok(total / batches.len().max(1) as f64)
    }

    /// `d_step` rounds of: sample `samples_num` fresh negatives, then
    /// `d_epoch` epochs of binary classification against the whole corpus.
    ///
    /// Returns the stats of the last epoch of the last round.
    pub fn pretrain_discriminator<O>(
        &mut self,
        optim: &mut O,
        d_step: usize,
        d_epoch: usize,
    ) -> Result<Option<DiscriminatorStats>>
    where
        O: Optimizer<RelbarDiscriminator<B>, B>,
    {
        let mut last = None;
        for step in 0..d_step {
            let negatives = self.generate(
                self.config.samples_num,
                PRETRAIN_SAMPLE_BATCHES * self.config.batch_size,
            )?;
            let mut dataset = DiscriminatorDataset::new(
                self.train_data.samples(),
                &negatives,
                self.config.batch_size,
                &mut self.rng,
            )?;

            for epoch in 0..d_epoch {
                dataset.shuffle(&mut self.rng);
                let stats = self.classify_epoch(optim, &dataset)?;
                tracing::debug!(step, epoch, d_loss = format!("{:.4}", stats.loss), "Discriminator epoch");
                last = Some(stats);
            }
            if let Some(stats) = last {
                tracing::info!(
                    step,
                    d_loss = format!("{:.4}", stats.loss),
                    train_acc = format!("{:.4}", stats.accuracy.unwrap_or(f64::NAN)),
                    "[MLE-DIS]"
                );
            }
            self.report_progress(Phase::PretrainDiscriminator, step + 1, d_step);
        }
        if d_step > 0 {
            self.checkpoints.save(
                &self.generator,
                &self.discriminator,
                Phase::PretrainDiscriminator.checkpoint_label(),
                d_step,
            );
        }
        Ok(last)
    }

    fn classify_epoch<O>(&mut self, optim: &mut O, dataset: &DiscriminatorDataset) -> Result<DiscriminatorStats>
    where
        O: Optimizer<RelbarDiscriminator<B>, B>,
    {
        let vocab_size = self.config.vocab_size;
        let mut total_loss = 0.0;
        let mut batches = 0usize;
        let mut correct = 0usize;
        let mut seen = 0usize;
        for batch in dataset.batches() {
            let inputs = tokens_to_one_hot(tokens_to_tensor::<B>(&batch.sequences, &self.device)?, vocab_size);
            let labels = Tensor::<B, 1>::from_data(
                TensorData::new(batch.labels.clone(), [batch.labels.len()]),
                &self.device,
            );
            let logits = self.discriminator.forward(inputs);
            let predicted = tensor_to_vec(logits.clone().detach())?;
            correct += predicted
                .iter()
                .zip(&batch.labels)
                .filter(|(&logit, &label)| (logit > 0.0) == (label > 0.5))
                .count();
            seen += predicted.len();

            let loss = bce_with_logits(logits, labels);
            total_loss += tensor_to_f64(loss.clone());
            batches += 1;
            let grads = GradientsParams::from_grads(loss.backward(), &self.discriminator);
            self.discriminator = optim.step(self.config.dis_lr, self.discriminator.clone(), grads);
        }
        Ok(DiscriminatorStats {
            loss: total_loss / batches.max(1) as f64,
            accuracy: Some(correct as f64 / seen.max(1) as f64),
        })
    }

    /// Adversarial rounds; returns `true` when the stop signal ended the phase.
    fn adversarial<OG, OD>(&mut self, gen_opt: &mut OG, dis_opt: &mut OD, report: &mut TrainingReport) -> Result<bool>
    where
        OG: Optimizer<RelbarGenerator<B>, B>,
        OD: Optimizer<RelbarDiscriminator<B>, B>,
    {
        let epochs = self.config.adv_train_epoch;
        for epoch in 0..epochs {
            self.signal.update();
            if !self.signal.adv_sig() {
                tracing::info!(epoch, "Adversarial training stopped by signal");
                return Ok(true);
            }

            let g_step = self.adv_train_generator(gen_opt, self.config.adv_g_step)?;
            let d_stats = self.adv_train_discriminator(dis_opt, self.config.adv_d_step)?;
            report.adv_epochs = epoch + 1;
            report.last_adv_g_loss = g_step.as_ref().map(|s| s.adv_loss);
            report.last_adv_d_loss = d_stats.map(|s| s.loss);
            self.report_progress(Phase::Adversarial, epoch + 1, epochs);

            if epoch % self.config.adv_log_step == 0 || epoch + 1 == epochs {
                let metrics = self.cal_metrics()?;
                tracing::info!(
                    epoch,
                    g_loss = format!("{:.4}", report.last_adv_g_loss.unwrap_or(f64::NAN)),
                    d_loss = format!("{:.4}", report.last_adv_d_loss.unwrap_or(f64::NAN)),
                    temperature = format!("{:.4}", self.generator.temperature()),
                    eta = format!("{:.4}", self.generator.eta()),
                    variance = format!("{:.4e}", g_step.as_ref().map_or(f64::NAN, |s| s.variance)),
                    %metrics,
                    "[ADV]"
                );
                self.checkpoints.save(
                    &self.generator,
                    &self.discriminator,
                    Phase::Adversarial.checkpoint_label(),
                    epoch,
                );
            }
        }
        Ok(false)
    }

    /// `g_step` REBAR generator updates; returns the last one with `adv_loss`
    /// averaged over all of them.
    pub fn adv_train_generator<O>(&mut self, optim: &mut O, g_step: usize) -> Result<Option<AdvGeneratorStep>>
    where
        O: Optimizer<RelbarGenerator<B>, B>,
    {
        let mut total = 0.0;
        let mut last = None;
        for _ in 0..g_step {
            let step = self.adv_generator_step(optim)?;
            total += step.adv_loss;
            last = Some(step);
        }
        Ok(last.map(|step| AdvGeneratorStep {
            adv_loss: total / g_step as f64,
            ..step
        }))
    }

    /// One generator update through the REBAR estimator.
    ///
    /// The discriminator scoring the rollout is the same instance the
    /// discriminator phases train. Primary gradients come from the
    /// surrogate `Σ θ·ĝ / batch`; the temperature and eta gradients are
    /// injected afterwards, before the optimizer step.
    pub fn adv_generator_step<O>(&mut self, optim: &mut O) -> Result<AdvGeneratorStep>
    where
        O: Optimizer<RelbarGenerator<B>, B>,
    {
        let batch_size = self.config.batch_size;
        let temperature = self.generator.temperature();
        let eta = self.generator.eta();

        let real = self.train_data.random_batch(&mut self.rng);
        let real = tokens_to_one_hot(tokens_to_tensor::<B>(&real, &self.device)?, self.config.vocab_size);
        let real_scores = self.discriminator.forward(real).detach();

        let rollout = self
            .generator
            .rollout(batch_size, self.estimator.sampler(), &self.device);
        let theta_dims = rollout.theta.dims();

        let estimate = {
            let oracle = AdversarialOracle::new(&self.discriminator, real_scores, self.config.loss_type);
            self.estimator
                .estimate_gradient(&oracle, rollout.theta.clone(), &rollout.noise, temperature, eta)?
        };
        let grad_dims = estimate.grad_theta.dims();

        let surrogate = (rollout.theta * estimate.grad_theta.clone().detach())
            .sum()
            .div_scalar(batch_size as f64);
        let grads = GradientsParams::from_grads(surrogate.backward(), &self.generator);
        let meta = self.controller.gate(&estimate);
        let grads = self.controller.inject(grads, &self.generator, meta);
        self.generator = optim.step(self.config.gen_adv_lr, self.generator.clone(), grads);

        tracing::debug!(
            adv_loss = estimate.hard_score,
            variance = estimate.variance,
            grad_temperature = meta.temperature,
            grad_eta = meta.eta,
            "Generator step"
        );
        Ok(AdvGeneratorStep {
            adv_loss: estimate.hard_score,
            theta_dims,
            grad_dims,
            variance: estimate.variance,
            temperature,
            eta,
        })
    }

    /// `d_step` discriminator updates on random real batches against freshly
    /// generated ones, under the configured loss family.
    pub fn adv_train_discriminator<O>(&mut self, optim: &mut O, d_step: usize) -> Result<Option<DiscriminatorStats>>
    where
        O: Optimizer<RelbarDiscriminator<B>, B>,
    {
        let batch_size = self.config.batch_size;
        let vocab_size = self.config.vocab_size;
        let loss_type = self.config.loss_type;
        let mut total_loss = 0.0;
        let mut correct = 0usize;
        for _ in 0..d_step {
            let real = self.train_data.random_batch(&mut self.rng);
            let fake = self.generate(batch_size, batch_size)?;
            let real = tokens_to_one_hot(tokens_to_tensor::<B>(&real, &self.device)?, vocab_size);
            let fake = tokens_to_one_hot(tokens_to_tensor::<B>(&fake, &self.device)?, vocab_size);

            let d_real = self.discriminator.forward(real);
            let d_fake = self.discriminator.forward(fake);
            if loss_type.reports_accuracy() {
                correct += count_correct(
                    &tensor_to_vec(d_real.clone().detach())?,
                    &tensor_to_vec(d_fake.clone().detach())?,
                );
            }

            let loss = loss_type.discriminator_loss(d_real, d_fake);
            total_loss += tensor_to_f64(loss.clone());
            let grads = GradientsParams::from_grads(loss.backward(), &self.discriminator);
            self.discriminator = optim.step(self.config.dis_lr, self.discriminator.clone(), grads);
        }
        if d_step == 0 {
            return Ok(None);
        }
        Ok(Some(DiscriminatorStats {
            loss: total_loss / d_step as f64,
            accuracy: loss_type
                .reports_accuracy()
                .then(|| correct as f64 / (2 * batch_size * d_step) as f64),
        }))
    }

    /// Sample `num` sequences from the generator without recording a graph.
    pub fn generate(&self, num: usize, batch_size: usize) -> Result<Vec<Vec<u32>>> {
        let generator = self.generator.valid();
        tensor_to_tokens(generator.sample(num, batch_size, &self.device))
    }

    /// Metric summary of `eval_samples` fresh samples against the reference set.
    pub fn cal_metrics(&self) -> Result<String> {
        let generated = self.generate(self.config.eval_samples, self.config.batch_size)?;
        Ok(self.metrics.evaluate(&generated, &self.reference))
    }

    fn report_progress(&mut self, phase: Phase, done: usize, total: usize) {
        if let Some(hook) = self.progress.as_mut() {
            hook(phase, done, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::discriminator::DiscriminatorConfig;
    use crate::model::generator::GeneratorConfig;
    use crate::training::loss::LossType;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn tiny_config() -> TrainingConfig {
        TrainingConfig {
            batch_size: 4,
            vocab_size: 6,
            max_seq_len: 3,
            mle_train_epoch: 2,
            adv_train_epoch: 2,
            d_step: 1,
            d_epoch: 1,
            adv_g_step: 1,
            adv_d_step: 1,
            samples_num: 8,
            eval_samples: 4,
            pre_log_step: 1,
            adv_log_step: 1,
            ..TrainingConfig::default()
        }
    }

    fn trainer(config: TrainingConfig) -> RelbarTrainer<TestAutodiffBackend> {
        let device = Default::default();
        let generator = GeneratorConfig::new(config.vocab_size, config.max_seq_len)
            .with_embed_dim(4)
            .with_hidden_dim(8)
            .init(&device);
        let discriminator = DiscriminatorConfig::new(config.vocab_size, config.max_seq_len)
            .with_embed_dim(4)
            .with_hidden_dim(8)
            .init(&device);
        let corpus: Vec<Vec<u32>> = (0..12).map(|i| vec![3 + (i % 3) as u32, 4, 5]).collect();
        let data = SequenceDataset::new(corpus, config.batch_size, config.max_seq_len, config.padding_idx).unwrap();
        RelbarTrainer::new(config, generator, discriminator, data, device).unwrap()
    }

    #[test]
    fn test_rejects_mismatched_models() {
        let device = Default::default();
        let config = tiny_config();
        let generator = GeneratorConfig::new(7, 3).init::<TestAutodiffBackend>(&device);
        let discriminator = DiscriminatorConfig::new(6, 3).init(&device);
        let data = SequenceDataset::new(vec![vec![3, 4, 5]], 4, 3, 0).unwrap();
        assert!(matches!(
            RelbarTrainer::new(config, generator, discriminator, data, device),
            Err(RelbarError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_mismatched_discriminator() {
        let device = Default::default();
        let config = tiny_config();
        let data = SequenceDataset::new(vec![vec![3, 4, 5]], 4, 3, 0).unwrap();

        let wide = DiscriminatorConfig::new(7, 3).init(&device);
        let generator = GeneratorConfig::new(6, 3).init::<TestAutodiffBackend>(&device);
        assert!(matches!(
            RelbarTrainer::new(config.clone(), generator, wide, data.clone(), device.clone()),
            Err(RelbarError::Shape { .. })
        ));

        let long = DiscriminatorConfig::new(6, 4).init(&device);
        let generator = GeneratorConfig::new(6, 3).init::<TestAutodiffBackend>(&device);
        assert!(matches!(
            RelbarTrainer::new(config, generator, long, data, device),
            Err(RelbarError::Shape { .. })
        ));
    }

    #[test]
    fn test_rejects_mismatched_start_token() {
        let device = Default::default();
        let config = tiny_config();
        let generator = GeneratorConfig::new(6, 3)
            .with_start_token(2)
            .init::<TestAutodiffBackend>(&device);
        let discriminator = DiscriminatorConfig::new(6, 3).init(&device);
        let data = SequenceDataset::new(vec![vec![3, 4, 5]], 4, 3, 0).unwrap();
        assert!(matches!(
            RelbarTrainer::new(config, generator, discriminator, data, device),
            Err(RelbarError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_tokens_outside_vocabulary() {
        let device = Default::default();
        let config = tiny_config();
        let generator = GeneratorConfig::new(6, 3).init::<TestAutodiffBackend>(&device);
        let discriminator = DiscriminatorConfig::new(6, 3).init(&device);
        let data = SequenceDataset::new(vec![vec![3, 9, 4]; 8], 4, 3, 0).unwrap();
        assert!(matches!(
            RelbarTrainer::new(config, generator, discriminator, data, device),
            Err(RelbarError::Data(_))
        ));
    }

    #[test]
    fn test_zero_eval_samples_rejected_before_training() {
        let config = TrainingConfig {
            eval_samples: 0,
            ..tiny_config()
        };
        let device = Default::default();
        let generator = GeneratorConfig::new(6, 3).init::<TestAutodiffBackend>(&device);
        let discriminator = DiscriminatorConfig::new(6, 3).init(&device);
        let data = SequenceDataset::new(vec![vec![3, 4, 5]], 4, 3, 0).unwrap();
        assert!(matches!(
            RelbarTrainer::new(config, generator, discriminator, data, device),
            Err(RelbarError::Config(_))
        ));
    }

    #[test]
    fn test_full_run_visits_every_phase() {
        let mut t = trainer(tiny_config());
        let report = t.run(PhasePlan::default()).unwrap();
        assert_eq!(
            report.phases_run,
            vec![Phase::PretrainGenerator, Phase::PretrainDiscriminator, Phase::Adversarial]
        );
        assert_eq!(report.mle_epochs, 2);
        assert_eq!(report.adv_epochs, 2);
        assert!(report.interrupted_in.is_none());
        assert!(report.last_pre_loss.unwrap().is_finite());
        assert!(report.last_adv_g_loss.unwrap().is_finite());
        assert!(report.temperature > 0.0 && report.eta > 0.0);
        assert_eq!(t.phase(), Phase::Terminated);
    }

    #[test]
    fn test_scalars_frozen_when_learning_disabled() {
        let config = TrainingConfig {
            learn_temperature: false,
            learn_eta: false,
            temperature: 0.7,
            eta: 1.3,
            ..tiny_config()
        };
        let mut t = trainer(config);
        t.run(PhasePlan {
            generator_pretrained: true,
            discriminator_pretrained: true,
        })
        .unwrap();
        assert!((t.generator().temperature() - 0.7).abs() < 1e-5);
        assert!((t.generator().eta() - 1.3).abs() < 1e-5);
    }

    #[test]
    fn test_scalars_move_when_learning_enabled() {
        let mut t = trainer(TrainingConfig {
            gen_adv_lr: 1e-2,
            ..tiny_config()
        });
        let mut optim = t.optimizer_config().init::<TestAutodiffBackend, RelbarGenerator<TestAutodiffBackend>>();
        let before = (t.generator().temperature(), t.generator().eta());
        let step = t.adv_generator_step(&mut optim).unwrap();
        assert_eq!(step.temperature, before.0);
        assert_eq!(step.eta, before.1);
        let after = (t.generator().temperature(), t.generator().eta());
        assert_ne!(before, after);
    }

    #[test]
    fn test_rsgan_reports_no_accuracy() {
        let config = TrainingConfig {
            loss_type: LossType::Rsgan,
            ..tiny_config()
        };
        let mut t = trainer(config);
        let mut optim = t.optimizer_config().init::<TestAutodiffBackend, RelbarDiscriminator<TestAutodiffBackend>>();
        let stats = t.adv_train_discriminator(&mut optim, 2).unwrap().unwrap();
        assert!(stats.accuracy.is_none());
        assert!(stats.loss.is_finite());

        let mut hinge = trainer(TrainingConfig {
            loss_type: LossType::Hinge,
            ..tiny_config()
        });
        let mut optim = hinge.optimizer_config().init::<TestAutodiffBackend, RelbarDiscriminator<TestAutodiffBackend>>();
        let acc = hinge.adv_train_discriminator(&mut optim, 1).unwrap().unwrap().accuracy.unwrap();
        assert!((0.0..=1.0).contains(&acc));
    }

    #[test]
    fn test_progress_hook_sees_every_epoch() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut t = trainer(tiny_config()).with_progress(Box::new(move |phase, done, total| {
            sink.lock().unwrap().push((phase, done, total));
        }));
        t.run(PhasePlan::default()).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (Phase::PretrainGenerator, 1, 2),
                (Phase::PretrainGenerator, 2, 2),
                (Phase::PretrainDiscriminator, 1, 1),
                (Phase::Adversarial, 1, 2),
                (Phase::Adversarial, 2, 2),
            ]
        );
    }

    #[test]
    fn test_generate_respects_shape() {
        let t = trainer(tiny_config());
        let samples = t.generate(5, 4).unwrap();
        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|s| s.len() == 3 && s.iter().all(|&x| x < 6)));
    }
}
