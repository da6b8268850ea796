/// Training hyperparameters, loaded from the `[training]` TOML section.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrainingConfig {
    /// Sequences per batch, for both networks.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Vocabulary size, including padding and start tokens.
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    /// Sequence length; shorter sequences are padded.
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,

    /// Token id used for padding.
    #[serde(default)]
    pub padding_idx: u32,

    /// Token id fed to the generator at the first position.
    #[serde(default = "default_start_token")]
    pub start_token: u32,

    /// Generator learning rate during MLE pretraining.
    #[serde(default = "default_gen_lr")]
    pub gen_lr: f64,

    /// Generator learning rate during adversarial training (also used for
    /// temperature and eta).
    #[serde(default = "default_gen_adv_lr")]
    pub gen_adv_lr: f64,

    /// Discriminator learning rate.
    #[serde(default = "default_dis_lr")]
    pub dis_lr: f64,

    /// Epochs of generator MLE pretraining.
    #[serde(default = "default_mle_train_epoch")]
    pub mle_train_epoch: usize,

    /// Adversarial rounds.
    #[serde(default = "default_adv_train_epoch")]
    pub adv_train_epoch: usize,

    /// Resample-and-train rounds of discriminator pretraining.
    #[serde(default = "default_d_step")]
    pub d_step: usize,

    /// Epochs per discriminator pretraining round.
    #[serde(default = "default_d_epoch")]
    pub d_epoch: usize,

    /// Generator updates per adversarial round.
    #[serde(default = "default_adv_g_step")]
    pub adv_g_step: usize,

    /// Discriminator updates per adversarial round.
    #[serde(default = "default_adv_d_step")]
    pub adv_d_step: usize,

    /// Per-parameter gradient norm clip.
    #[serde(default = "default_clip_norm")]
    pub clip_norm: f64,

    /// GAN loss family.
    #[serde(default = "default_loss_type")]
    pub loss_type: crate::training::loss::LossType,

    /// Learn the relaxation temperature from the variance objective.
    #[serde(default = "default_true")]
    pub learn_temperature: bool,

    /// Learn the control-variate scale from the variance objective.
    #[serde(default = "default_true")]
    pub learn_eta: bool,

    /// Initial relaxation temperature.
    #[serde(default = "default_scalar")]
    pub temperature: f64,

    /// Initial control-variate scale.
    #[serde(default = "default_scalar")]
    pub eta: f64,

    /// Log (and checkpoint) every N pretraining epochs.
    #[serde(default = "default_pre_log_step")]
    pub pre_log_step: usize,

    /// Log (and checkpoint) every N adversarial rounds.
    #[serde(default = "default_adv_log_step")]
    pub adv_log_step: usize,

    /// Negatives generated per discriminator pretraining round.
    #[serde(default = "default_samples_num")]
    pub samples_num: usize,

    /// Generated sequences scored by the metric evaluator.
    #[serde(default = "default_eval_samples")]
    pub eval_samples: usize,

    /// Step in `log λ` for the temperature meta-gradient.
    #[serde(default = "default_fd_step")]
    pub finite_difference_step: f64,

    /// Seed for the backend and host RNGs.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_vocab_size() -> usize {
    5000
}
fn default_max_seq_len() -> usize {
    20
}
fn default_start_token() -> u32 {
    1
}
fn default_gen_lr() -> f64 {
    1e-2
}
fn default_gen_adv_lr() -> f64 {
    1e-4
}
fn default_dis_lr() -> f64 {
    1e-4
}
fn default_mle_train_epoch() -> usize {
    150
}
fn default_adv_train_epoch() -> usize {
    3000
}
fn default_d_step() -> usize {
    5
}
fn default_d_epoch() -> usize {
    3
}
fn default_adv_g_step() -> usize {
    1
}
fn default_adv_d_step() -> usize {
    5
}
fn default_clip_norm() -> f64 {
    5.0
}
fn default_loss_type() -> crate::training::loss::LossType {
    crate::training::loss::LossType::Rsgan
}
fn default_true() -> bool {
    true
}
fn default_scalar() -> f64 {
    1.0
}
fn default_pre_log_step() -> usize {
    10
}
fn default_adv_log_step() -> usize {
    20
}
fn default_samples_num() -> usize {
    10_000
}
fn default_eval_samples() -> usize {
    200
}
fn default_fd_step() -> f64 {
    crate::estimator::rebar::DEFAULT_FD_STEP
}
fn default_seed() -> u64 {
    42
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            vocab_size: default_vocab_size(),
            max_seq_len: default_max_seq_len(),
            padding_idx: 0,
            start_token: default_start_token(),
            gen_lr: default_gen_lr(),
            gen_adv_lr: default_gen_adv_lr(),
            dis_lr: default_dis_lr(),
            mle_train_epoch: default_mle_train_epoch(),
            adv_train_epoch: default_adv_train_epoch(),
            d_step: default_d_step(),
            d_epoch: default_d_epoch(),
            adv_g_step: default_adv_g_step(),
            adv_d_step: default_adv_d_step(),
            clip_norm: default_clip_norm(),
            loss_type: default_loss_type(),
            learn_temperature: true,
            learn_eta: true,
            temperature: default_scalar(),
            eta: default_scalar(),
            pre_log_step: default_pre_log_step(),
            adv_log_step: default_adv_log_step(),
            samples_num: default_samples_num(),
            eval_samples: default_eval_samples(),
            finite_difference_step: default_fd_step(),
            seed: default_seed(),
        }
    }
}

impl TrainingConfig {
    /// Reject values that would make training meaningless or numerically
    /// undefined. Called once at startup.
    pub fn validate(&self) -> crate::error::Result<()> {
        let positive_counts = [
            ("batch_size", self.batch_size),
            ("vocab_size", self.vocab_size),
            ("max_seq_len", self.max_seq_len),
            ("samples_num", self.samples_num),
            ("eval_samples", self.eval_samples),
            ("pre_log_step", self.pre_log_step),
            ("adv_log_step", self.adv_log_step),
        ];
        for (name, value) in positive_counts {
            if value == 0 {
                return Err(config_error(format!("{name} must be positive")));
            }
        }

        let positive_reals = [
            ("gen_lr", self.gen_lr),
            ("gen_adv_lr", self.gen_adv_lr),
            ("dis_lr", self.dis_lr),
            ("clip_norm", self.clip_norm),
            ("temperature", self.temperature),
            ("eta", self.eta),
            ("finite_difference_step", self.finite_difference_step),
        ];
        for (name, value) in positive_reals {
            if !(value > 0.0 && value.is_finite()) {
                return Err(config_error(format!("{name} must be positive and finite, got {value}")));
            }
        }

        for (name, token) in [("padding_idx", self.padding_idx), ("start_token", self.start_token)] {
            if token as usize >= self.vocab_size {
                return Err(config_error(format!(
                    "{name} = {token} is outside the vocabulary of size {}",
                    self.vocab_size
                )));
            }
        }
        Ok(())
    }
}

fn config_error(message: String) -> crate::error::RelbarError {
    crate::error::RelbarError::Config(message)
}
