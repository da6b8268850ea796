//! RELBAR text GAN.
//!
//! Trains a token generator against a sequence discriminator. Generator
//! updates go through a REBAR-style control-variate estimator that couples a
//! hard Gumbel-max token sample with two Gumbel-softmax relaxations, and the
//! relaxation temperature and control-variate scale are tuned online to
//! minimize the estimator's variance.

pub mod error;
pub mod estimator;
pub mod model;
pub mod training;
pub mod vocab;

pub use error::RelbarError;
