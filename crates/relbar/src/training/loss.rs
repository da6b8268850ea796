//! GAN loss family and the adversarial scoring oracle.
//!
//! Every loss is a function of discriminator logits on real (`d_r`) and
//! generated (`d_f`) batches. Generator losses are also available per
//! example, which is the form the REBAR estimator consumes.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use burn::tensor::activation::{relu, tanh};

use crate::error::RelbarError;
use crate::estimator::ScoreOracle;
use crate::model::discriminator::RelbarDiscriminator;

/// GAN divergence selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LossType {
    /// Non-saturating GAN loss.
    #[serde(rename = "standard")]
    Standard,
    /// Vanilla (minimax) GAN loss.
    #[serde(rename = "JS", alias = "js")]
    Js,
    /// Loss implicitly minimizing the KL divergence.
    #[serde(rename = "KL", alias = "kl")]
    Kl,
    #[serde(rename = "hinge")]
    Hinge,
    /// Total variation distance.
    #[serde(rename = "tv")]
    Tv,
    /// Relativistic standard GAN.
    #[serde(rename = "rsgan")]
    Rsgan,
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LossType::Standard => "standard",
            LossType::Js => "JS",
            LossType::Kl => "KL",
            LossType::Hinge => "hinge",
            LossType::Tv => "tv",
            LossType::Rsgan => "rsgan",
        };
        f.write_str(name)
    }
}

impl FromStr for LossType {
    type Err = RelbarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(LossType::Standard),
            "JS" | "js" => Ok(LossType::Js),
            "KL" | "kl" => Ok(LossType::Kl),
            "hinge" => Ok(LossType::Hinge),
            "tv" => Ok(LossType::Tv),
            "rsgan" => Ok(LossType::Rsgan),
            other => Err(RelbarError::Config(format!(
                "unknown loss type '{other}' (expected standard, JS, KL, hinge, tv or rsgan)"
            ))),
        }
    }
}

impl LossType {
    /// Whether discriminator accuracy (logit > 0 means real) is meaningful.
    pub fn reports_accuracy(self) -> bool {
        self != LossType::Rsgan
    }

    /// Generator loss per example, shape `(batch,)`. `d_real` is only read by
    /// the relativistic loss, which pairs example `i` with real example `i`.
    pub fn generator_loss_per_example<B: Backend>(
        self,
        d_fake: Tensor<B, 1>,
        d_real: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        match self {
            LossType::Standard => softplus(d_fake.neg()),
            LossType::Js => softplus(d_fake).neg(),
            LossType::Kl | LossType::Hinge => d_fake.neg(),
            LossType::Tv => tanh(d_fake).neg(),
            LossType::Rsgan => softplus((d_fake - d_real).neg()),
        }
    }

    /// Batch-mean generator loss, shape `(1,)`.
    pub fn generator_loss<B: Backend>(self, d_real: Tensor<B, 1>, d_fake: Tensor<B, 1>) -> Tensor<B, 1> {
        self.generator_loss_per_example(d_fake, d_real).mean()
    }

    /// Batch-mean discriminator loss, shape `(1,)`.
    pub fn discriminator_loss<B: Backend>(self, d_real: Tensor<B, 1>, d_fake: Tensor<B, 1>) -> Tensor<B, 1> {
        match self {
            LossType::Standard | LossType::Js | LossType::Kl => {
                softplus(d_real.neg()).mean() + softplus(d_fake).mean()
            }
            LossType::Hinge => {
                relu(d_real.neg().add_scalar(1.0)).mean() + relu(d_fake.add_scalar(1.0)).mean()
            }
            LossType::Tv => (tanh(d_fake) - tanh(d_real)).mean(),
            LossType::Rsgan => softplus((d_real - d_fake).neg()).mean(),
        }
    }
}

/// Numerically stable `log(1 + exp(x))`.
pub fn softplus<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    relu(x.clone()) + x.abs().neg().exp().add_scalar(1.0).log()
}

/// Mean binary cross-entropy on logits against `{0, 1}` labels.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 1>, labels: Tensor<B, 1>) -> Tensor<B, 1> {
    (softplus(logits.clone()) - logits * labels).mean()
}

/// Count logits on the correct side of zero (positive = real).
pub fn count_correct(real_logits: &[f64], fake_logits: &[f64]) -> usize {
    real_logits.iter().filter(|&&x| x > 0.0).count()
        + fake_logits.iter().filter(|&&x| x <= 0.0).count()
}

/// The generator's adversarial loss as a scoring oracle.
///
/// Scores generated (one-hot or relaxed) sequences with the live
/// discriminator, the same instance trained by the discriminator phases.
pub struct AdversarialOracle<'a, B: Backend> {
    discriminator: &'a RelbarDiscriminator<B>,
    real_scores: Tensor<B, 1>,
    loss_type: LossType,
}

impl<'a, B: Backend> AdversarialOracle<'a, B> {
    /// `real_scores` are discriminator logits on a real batch of the same size
    /// as the generated batches to be scored; they are treated as constants.
    pub fn new(
        discriminator: &'a RelbarDiscriminator<B>,
        real_scores: Tensor<B, 1>,
        loss_type: LossType,
    ) -> Self {
        Self {
            discriminator,
            real_scores: real_scores.detach(),
            loss_type,
        }
    }
}

impl<B: Backend> ScoreOracle<B> for AdversarialOracle<'_, B> {
    fn score(&self, sequences: Tensor<B, 3>) -> Tensor<B, 1> {
        let d_fake = self.discriminator.forward(sequences);
        self.loss_type
            .generator_loss_per_example(d_fake, self.real_scores.clone())
    }
}
