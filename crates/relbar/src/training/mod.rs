//! Adversarial training pipeline: configuration, loss family, data sources,
//! stop signals, checkpoint and metric sinks, and the phase-driven trainer.

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod phase;
pub mod signal;
pub mod trainer;

pub use config::TrainingConfig;
pub use loss::LossType;
pub use phase::{Phase, PhasePlan};
pub use trainer::{RelbarTrainer, TrainingReport};
