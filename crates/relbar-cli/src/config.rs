//! TOML config loading for the relbar CLI.
//!
//! Deserializes `configs/relbar.toml`, which has `[training]`, `[generator]`
//! and `[discriminator]` sections, then merges CLI overrides.

use std::path::Path;

use anyhow::Context;
use relbar::model::discriminator::DiscriminatorConfig;
use relbar::model::generator::GeneratorConfig;
use relbar::training::TrainingConfig;
use serde::Deserialize;

/// Top-level structure matching `configs/relbar.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct RelbarToml {
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub generator: ModelOverrides,
    #[serde(default)]
    pub discriminator: ModelOverrides,
}

/// Optional network sizes. Vocabulary size and sequence length always come
/// from `[training]`, so only the widths are configurable here.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct ModelOverrides {
    pub embed_dim: Option<usize>,
    pub hidden_dim: Option<usize>,
}

/// CLI flags that override `[training]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrainingOverrides {
    pub seed: Option<u64>,
    pub adv_epochs: Option<usize>,
}

pub fn load_relbar_toml(path: &Path) -> anyhow::Result<RelbarToml> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: RelbarToml = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded relbar config");
    Ok(config)
}

/// Final training config.
///
/// Priority chain: field defaults < TOML values < CLI flags. The vocabulary
/// size is always taken from the vocabulary built from the corpus.
pub fn build_training_config(
    mut config: TrainingConfig,
    vocab_size: usize,
    overrides: TrainingOverrides,
) -> anyhow::Result<TrainingConfig> {
    config.vocab_size = vocab_size;
    if let Some(seed) = overrides.seed {
        config.seed = seed;
    }
    if let Some(epochs) = overrides.adv_epochs {
        config.adv_train_epoch = epochs;
    }
    config.validate()?;
    Ok(config)
}

pub fn generator_config(training: &TrainingConfig, overrides: ModelOverrides) -> GeneratorConfig {
    let mut config = GeneratorConfig::new(training.vocab_size, training.max_seq_len)
        .with_start_token(training.start_token as usize)
        .with_temperature(training.temperature)
        .with_eta(training.eta);
    if let Some(dim) = overrides.embed_dim {
        config = config.with_embed_dim(dim);
    }
    if let Some(dim) = overrides.hidden_dim {
        config = config.with_hidden_dim(dim);
    }
    config
}

pub fn discriminator_config(training: &TrainingConfig, overrides: ModelOverrides) -> DiscriminatorConfig {
    let mut config = DiscriminatorConfig::new(training.vocab_size, training.max_seq_len);
    if let Some(dim) = overrides.embed_dim {
        config = config.with_embed_dim(dim);
    }
    if let Some(dim) = overrides.hidden_dim {
        config = config.with_hidden_dim(dim);
    }
    config
}
