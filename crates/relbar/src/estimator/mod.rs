//! REBAR gradient estimation through discrete token sampling.
//!
//! - [`sampler`]: coupled hard / relaxed / conditionally-relaxed samples.
//! - [`rebar`]: the control-variate estimator and its variance meta-gradients.
//! - [`controller`]: gating and injection of the meta-gradients into the
//!   optimizer's gradient set.

pub mod controller;
pub mod rebar;
pub mod sampler;

pub use controller::{MetaGradients, VarianceController};
pub use rebar::{GradientEstimate, RebarEstimator, ScoreOracle};
pub use sampler::{CoupledNoise, CoupledSample, RelaxedSampler};
