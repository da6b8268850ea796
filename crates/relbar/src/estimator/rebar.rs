//! REBAR control-variate gradient estimator.
//!
//! For logits `theta`, a scoring oracle `f`, temperature `λ` and control
//! variate scale `η`, one noise draw gives
//!
//! ```text
//! g = [f(H(z)) - η f(σ_λ(z̃))] ∇θ log p(b) + η ∇θ f(σ_λ(z)) - η ∇θ f(σ_λ(z̃))
//! ```
//!
//! which is unbiased for `∇θ E[f(H(z))]` for every `λ > 0` and every `η`.
//! Writing `g = A + η C(λ)`, the variance objective `V = ‖g‖²` has
//! `∂V/∂η = 2⟨g, C⟩` exactly, and `∂V/∂λ = 2η⟨g, ∂C/∂λ⟩` where `∂C/∂λ`
//! is a central difference in `log λ` over the same noise.
//!
//! Each call builds its own autodiff graph from a detached copy of `theta`;
//! nothing is retained between calls.

use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;

use crate::error::{RelbarError, Result};
use crate::estimator::sampler::{CoupledNoise, RelaxedSampler};
use crate::model::bridge::tensor_to_f64;

/// Default step (in `log λ`) for the temperature meta-gradient.
pub const DEFAULT_FD_STEP: f64 = 1e-2;

/// A differentiable scoring function over one-hot or relaxed sequences.
///
/// Input shape `(batch, len, vocab)`, output shape `(batch,)`. The score must
/// be differentiable with respect to the input; a detached score is reported
/// as [`RelbarError::DetachedOracle`].
pub trait ScoreOracle<B: Backend> {
    fn score(&self, sequences: Tensor<B, 3>) -> Tensor<B, 1>;
}

impl<B, F> ScoreOracle<B> for F
where
    B: Backend,
    F: Fn(Tensor<B, 3>) -> Tensor<B, 1>,
{
    fn score(&self, sequences: Tensor<B, 3>) -> Tensor<B, 1> {
        self(sequences)
    }
}

/// Output of one estimator call.
#[derive(Debug, Clone)]
pub struct GradientEstimate<B: Backend> {
    /// Estimated `∇θ E[f]`, same shape as `theta`, detached.
    pub grad_theta: Tensor<B, 3>,
    /// `∂‖g‖²/∂λ`.
    pub grad_temperature: f64,
    /// `∂‖g‖²/∂η`.
    pub grad_eta: f64,
    /// `‖g‖²`, the single-sample variance proxy.
    pub variance: f64,
    /// Batch mean of `f(H(z))`.
    pub hard_score: f64,
}

/// Pieces of the estimator that depend on the temperature.
struct ControlTerms<B: Backend> {
    /// `∇θ [Σ f(σ_λ(z)) - Σ f(σ_λ(z̃))]`.
    relaxed_grad: Tensor<B, 3>,
    /// `f(σ_λ(z̃))` per example.
    tilde_score: Tensor<B, 1>,
}

impl<B: Backend> ControlTerms<B> {
    /// `C(λ) = ∇θ f(σ(z)) - ∇θ f(σ(z̃)) - f(σ(z̃)) ∇θ log p(b)`.
    fn combine(self, score_fn: &Tensor<B, 3>) -> Tensor<B, 3> {
        self.relaxed_grad - per_example(self.tilde_score, score_fn.dims()) * score_fn.clone()
    }
}

/// REBAR gradient estimator.
#[derive(Debug, Clone, Copy)]
pub struct RebarEstimator {
    sampler: RelaxedSampler,
    fd_step: f64,
}

impl Default for RebarEstimator {
    fn default() -> Self {
        Self {
            sampler: RelaxedSampler::default(),
            fd_step: DEFAULT_FD_STEP,
        }
    }
}

impl RebarEstimator {
    pub fn new(sampler: RelaxedSampler, fd_step: f64) -> Self {
        Self { sampler, fd_step }
    }

    pub fn sampler(&self) -> &RelaxedSampler {
        &self.sampler
    }

    /// Estimate `∇θ E[f(H(z))]` and the variance meta-gradients for one noise draw.
    pub fn estimate_gradient<B, O>(
        &self,
        oracle: &O,
        theta: Tensor<B, 3>,
        noise: &CoupledNoise<B, 3>,
        temperature: f64,
        eta: f64,
    ) -> Result<GradientEstimate<B>>
    where
        B: AutodiffBackend,
        O: ScoreOracle<B>,
    {
        if !(temperature > 0.0 && temperature.is_finite()) {
            return Err(RelbarError::Config(format!(
                "temperature must be positive and finite, got {temperature}"
            )));
        }
        let theta = theta.detach();
        let dims = theta.dims();
        if noise.dims() != dims {
            return Err(RelbarError::Shape {
                context: "coupled noise",
                expected: dims.to_vec(),
                actual: noise.dims().to_vec(),
            });
        }
        let batch = dims[0];

        // Score-function path, evaluated at the hard sample.
        let sample = self.sampler.couple(theta.clone(), noise);
        let hard_score = score_checked(oracle, sample.hard.clone(), batch)?.inner();
        let score_fn = sample.hard.inner() - softmax(theta.clone().inner(), 2);

        let control = self
            .control_terms(oracle, theta.clone(), noise, temperature, batch)?
            .combine(&score_fn);
        let grad = per_example(hard_score.clone(), dims) * score_fn.clone()
            + control.clone().mul_scalar(eta);

        let variance = tensor_to_f64(grad.clone().powf_scalar(2.0).sum());
        let grad_eta = 2.0 * tensor_to_f64((grad.clone() * control).sum());

        let h = self.fd_step;
        let up = self
            .control_terms(oracle, theta.clone(), noise, temperature * h.exp(), batch)?
            .combine(&score_fn);
        let down = self
            .control_terms(oracle, theta, noise, temperature * (-h).exp(), batch)?
            .combine(&score_fn);
        let dc_dlog_temperature = (up - down).div_scalar(2.0 * h);
        let grad_log_temperature =
            2.0 * eta * tensor_to_f64((grad.clone() * dc_dlog_temperature).sum());

        Ok(GradientEstimate {
            grad_theta: Tensor::from_inner(grad),
            grad_temperature: grad_log_temperature / temperature,
            grad_eta,
            variance,
            hard_score: tensor_to_f64(hard_score.mean()),
        })
    }

    /// Relaxed terms at a given temperature, from a fresh graph.
    fn control_terms<B, O>(
        &self,
        oracle: &O,
        theta: Tensor<B, 3>,
        noise: &CoupledNoise<B, 3>,
        temperature: f64,
        batch: usize,
    ) -> Result<ControlTerms<B::InnerBackend>>
    where
        B: AutodiffBackend,
        O: ScoreOracle<B>,
    {
        let theta = theta.detach().require_grad();
        let sample = self.sampler.couple(theta.clone(), noise);

        let relaxed = self.sampler.relax(sample.z, temperature);
        let relaxed_tilde = self.sampler.relax(sample.z_tilde, temperature);
        let f_relaxed = score_checked(oracle, relaxed, batch)?;
        let f_tilde = score_checked(oracle, relaxed_tilde, batch)?;
        let tilde_score = f_tilde.clone().inner();
        let relaxed_score = f_relaxed.clone().inner();
        let spread = tensor_to_f64(relaxed_score.clone().max() - relaxed_score.min());

        let grads = (f_relaxed.sum() - f_tilde.sum()).backward();
        let relaxed_grad = theta
            .grad(&grads)
            .ok_or(RelbarError::DetachedOracle("relaxed control variate"))?;
        // Scores that vary across the batch while ignoring the input.
        if spread > 0.0 && tensor_to_f64(relaxed_grad.clone().abs().max()) == 0.0 {
            return Err(RelbarError::DetachedOracle("scores do not depend on the input"));
        }

        Ok(ControlTerms {
            relaxed_grad,
            tilde_score,
        })
    }
}

fn score_checked<B: Backend, O: ScoreOracle<B>>(
    oracle: &O,
    sequences: Tensor<B, 3>,
    batch: usize,
) -> Result<Tensor<B, 1>> {
    let scores = oracle.score(sequences);
    if scores.dims() != [batch] {
        return Err(RelbarError::Shape {
            context: "oracle score",
            expected: vec![batch],
            actual: scores.dims().to_vec(),
        });
    }
    Ok(scores)
}

/// Broadcast a per-example value `(batch,)` over `(batch, len, vocab)`.
fn per_example<B: Backend>(values: Tensor<B, 1>, dims: [usize; 3]) -> Tensor<B, 3> {
    let [batch, len, vocab] = dims;
    values
        .reshape([batch, 1, 1])
        .repeat_dim(1, len)
        .repeat_dim(2, vocab)
}
