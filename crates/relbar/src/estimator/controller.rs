//! Variance-minimizing controller for the relaxation temperature and the
//! control-variate scale.
//!
//! Neither scalar receives a gradient from the generator's surrogate loss.
//! Their gradients come from the estimator's variance objective and are
//! written into the optimizer's gradient set between the primary backward
//! pass and `optimizer.step()`:
//!
//! ```text
//! grads = GradientsParams::from_grads(loss.backward(), &generator);  // first context
//! grads = controller.inject(grads, &generator, meta);                 // second context
//! generator = optimizer.step(lr, generator, grads);
//! ```

use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::estimator::rebar::GradientEstimate;
use crate::model::generator::RelbarGenerator;

/// Gated variance gradients with respect to temperature and eta.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetaGradients {
    pub temperature: f64,
    pub eta: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct VarianceController {
    learn_temperature: bool,
    learn_eta: bool,
}

impl VarianceController {
    pub fn new(learn_temperature: bool, learn_eta: bool) -> Self {
        Self {
            learn_temperature,
            learn_eta,
        }
    }

    /// Zero the gradient of every scalar whose learning is disabled.
    pub fn gate<B: Backend>(&self, estimate: &GradientEstimate<B>) -> MetaGradients {
        MetaGradients {
            temperature: if self.learn_temperature {
                estimate.grad_temperature
            } else {
                0.0
            },
            eta: if self.learn_eta { estimate.grad_eta } else { 0.0 },
        }
    }

    /// Write `meta` into the gradient slots of the generator's log-temperature
    /// and log-eta parameters, replacing anything already there.
    ///
    /// The parameters are stored in log space, so `∂V/∂log x = x ∂V/∂x`.
    pub fn inject<B: AutodiffBackend>(
        &self,
        mut grads: GradientsParams,
        generator: &RelbarGenerator<B>,
        meta: MetaGradients,
    ) -> GradientsParams {
        let (temperature_id, eta_id) = generator.scalar_param_ids();
        let device = generator.device();
        let entries = [
            (temperature_id, meta.temperature * generator.temperature()),
            (eta_id, meta.eta * generator.eta()),
        ];
        for (id, value) in entries {
            grads.remove::<B::InnerBackend, 1>(id);
            let grad = Tensor::<B, 1>::from_floats([value as f32], &device).inner();
            grads.register::<B::InnerBackend, 1>(id, grad);
        }
        tracing::trace!(
            grad_temperature = meta.temperature,
            grad_eta = meta.eta,
            "Injected variance gradients"
        );
        grads
    }
}
