//! Relaxed sampler: Gumbel-max hard samples coupled with two Gumbel-softmax
//! relaxations.
//!
//! Given logits `theta` and two uniform noise tensors `u`, `v` of the same
//! shape, the sampler produces
//!
//! ```text
//! z       = log_softmax(theta) + Gumbel(u)
//! b       = argmax(z)
//! z_tilde = z | argmax = b      (conditional Gumbel built from v)
//! ```
//!
//! with `z_tilde[b] = -log(-log v_b)` and, for `i != b`,
//! `z_tilde[i] = -log(-log(v_i) / p_i - log v_b)`. Every `i != b` entry is
//! strictly below the `b` entry, so `argmax(z_tilde) == b` on every call.
//! The vocabulary is always the last axis.

use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::Distribution;

use crate::model::bridge::one_hot;

/// Additive guard inside every `log` of the noise construction.
pub const LOG_EPSILON: f64 = 1e-10;

/// Relative gap kept between `z_tilde[b]` and every other entry so that
/// f32 rounding cannot produce a tie.
const TIE_MARGIN: f64 = 1e-6;

/// External randomness for one coupled draw.
#[derive(Debug, Clone)]
pub struct CoupledNoise<B: Backend, const D: usize> {
    /// Uniform noise driving the unconditional Gumbel perturbation.
    pub u: Tensor<B, D>,
    /// Uniform noise driving the conditional Gumbel perturbation.
    pub v: Tensor<B, D>,
}

impl<B: Backend, const D: usize> CoupledNoise<B, D> {
    /// Draw fresh uniform noise of the given shape.
    pub fn draw(dims: [usize; D], device: &B::Device) -> Self {
        Self {
            u: Tensor::random(dims, Distribution::Uniform(0.0, 1.0), device),
            v: Tensor::random(dims, Distribution::Uniform(0.0, 1.0), device),
        }
    }

    pub fn dims(&self) -> [usize; D] {
        self.u.dims()
    }

    /// Concatenate per-position noise along `dim` (used when a rollout draws
    /// one position at a time).
    pub fn stack<const D2: usize>(parts: Vec<Self>, dim: usize) -> CoupledNoise<B, D2> {
        let (us, vs): (Vec<_>, Vec<_>) = parts.into_iter().map(|n| (n.u, n.v)).unzip();
        CoupledNoise {
            u: Tensor::stack(us, dim),
            v: Tensor::stack(vs, dim),
        }
    }
}

/// The three coupled samples produced from one noise draw.
#[derive(Debug, Clone)]
pub struct CoupledSample<B: Backend, const D: usize> {
    /// Hard sample indices; the vocabulary axis has size 1.
    pub hard_index: Tensor<B, D, Int>,
    /// One-hot encoding of `hard_index`.
    pub hard: Tensor<B, D>,
    /// Unconditional perturbed logits.
    pub z: Tensor<B, D>,
    /// Perturbed logits conditioned on `argmax == hard_index`.
    pub z_tilde: Tensor<B, D>,
}

/// Produces coupled Gumbel samples for the REBAR control variate.
#[derive(Debug, Clone, Copy)]
pub struct RelaxedSampler {
    eps: f64,
}

impl Default for RelaxedSampler {
    fn default() -> Self {
        Self { eps: LOG_EPSILON }
    }
}

impl RelaxedSampler {
    pub fn new(eps: f64) -> Self {
        Self { eps }
    }

    /// Draw fresh noise and couple it with `theta`.
    pub fn sample<B: Backend, const D: usize>(&self, theta: Tensor<B, D>) -> CoupledSample<B, D> {
        let noise = CoupledNoise::draw(theta.dims(), &theta.device());
        self.couple(theta, &noise)
    }

    /// Deterministically build the coupled samples from `theta` and `noise`.
    ///
    /// `z` and `z_tilde` stay differentiable with respect to `theta` when
    /// `theta` is tracked by an autodiff backend.
    pub fn couple<B: Backend, const D: usize>(
        &self,
        theta: Tensor<B, D>,
        noise: &CoupledNoise<B, D>,
    ) -> CoupledSample<B, D> {
        let eps = self.eps;
        let axis = D - 1;
        let vocab = theta.dims()[axis];

        let log_p = log_softmax(theta, axis);
        let z = log_p.clone() + self.gumbel(noise.u.clone());

        let hard_index = z.clone().argmax(axis);
        let hard = one_hot(hard_index.clone(), vocab);

        // -log v >= 0 for every entry; the selected entry's value sets the max.
        let neg_log_v = noise.v.clone().add_scalar(eps).log().neg();
        let neg_log_v_b = (neg_log_v.clone() * hard.clone()).sum_dim(axis);
        let z_b = neg_log_v_b.clone().add_scalar(eps).log().neg();

        let p = log_p.exp();
        let others = (neg_log_v / p.add_scalar(eps) + neg_log_v_b.repeat_dim(axis, vocab))
            .add_scalar(eps)
            .log()
            .neg();
        let ceiling = z_b.clone() - z_b.clone().abs().add_scalar(1.0).mul_scalar(TIE_MARGIN);
        let others = others.min_pair(ceiling.repeat_dim(axis, vocab));

        let z_tilde = others.mask_where(hard.clone().greater_elem(0.5), z_b.repeat_dim(axis, vocab));

        CoupledSample {
            hard_index,
            hard,
            z,
            z_tilde,
        }
    }

    /// Standard Gumbel noise `-log(-log u)` with epsilon guards.
    pub fn gumbel<B: Backend, const D: usize>(&self, u: Tensor<B, D>) -> Tensor<B, D> {
        u.add_scalar(self.eps)
            .log()
            .neg()
            .add_scalar(self.eps)
            .log()
            .neg()
    }

    /// Temperature-scaled softmax relaxation of perturbed logits.
    pub fn relax<B: Backend, const D: usize>(&self, z: Tensor<B, D>, temperature: f64) -> Tensor<B, D> {
        softmax(z.div_scalar(temperature), D - 1)
    }
}
