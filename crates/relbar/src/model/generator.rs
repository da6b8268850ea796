use burn::module::{Param, ParamId};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{log_softmax, tanh};
use burn::tensor::Distribution;

use crate::estimator::sampler::{CoupledNoise, RelaxedSampler};
use crate::model::bridge::tensor_to_f64;

/// Lower bound applied when reading the learnable temperature and eta.
pub const MIN_SCALAR: f64 = 1e-4;

/// Configuration for the recurrent token generator.
///
/// ```text
/// token (batch,)
///   → Embedding(vocab→embed_dim)
///   → h' = tanh(W_in·x + W_rec·h)
///   → Linear(hidden_dim→vocab) → logits (batch, vocab)
/// ```
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    /// Vocabulary size, including padding and start tokens.
    pub vocab_size: usize,
    /// Number of generated positions.
    pub max_seq_len: usize,
    /// Token embedding dimension.
    #[config(default = 32)]
    pub embed_dim: usize,
    /// Recurrent state dimension.
    #[config(default = 32)]
    pub hidden_dim: usize,
    /// Token fed at the first position.
    #[config(default = 1)]
    pub start_token: usize,
    /// Initial relaxation temperature.
    #[config(default = 1.0)]
    pub temperature: f64,
    /// Initial control-variate scale.
    #[config(default = 1.0)]
    pub eta: f64,
}

impl GeneratorConfig {
    /// Initialize a generator with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> RelbarGenerator<B> {
        RelbarGenerator {
            embedding: EmbeddingConfig::new(self.vocab_size, self.embed_dim).init(device),
            input_proj: LinearConfig::new(self.embed_dim, self.hidden_dim).init(device),
            recurrent: LinearConfig::new(self.hidden_dim, self.hidden_dim)
                .with_bias(false)
                .init(device),
            output: LinearConfig::new(self.hidden_dim, self.vocab_size).init(device),
            log_temperature: Param::from_tensor(Tensor::from_floats(
                [self.temperature.ln() as f32],
                device,
            )),
            log_eta: Param::from_tensor(Tensor::from_floats([self.eta.ln() as f32], device)),
            vocab_size: self.vocab_size,
            max_seq_len: self.max_seq_len,
            hidden_dim: self.hidden_dim,
            start_token: self.start_token,
        }
    }
}

/// Autoregressive token generator.
///
/// Owns the relaxation temperature and the control-variate scale as
/// log-parameters, so both stay strictly positive under any optimizer update.
/// Neither enters the forward pass; their gradients are injected by
/// [`crate::estimator::VarianceController`].
#[derive(Module, Debug)]
pub struct RelbarGenerator<B: Backend> {
    embedding: Embedding<B>,
    input_proj: Linear<B>,
    recurrent: Linear<B>,
    output: Linear<B>,
    /// Log of the relaxation temperature.
    log_temperature: Param<Tensor<B, 1>>,
    /// Log of the control-variate scale.
    log_eta: Param<Tensor<B, 1>>,
    vocab_size: usize,
    max_seq_len: usize,
    hidden_dim: usize,
    start_token: usize,
}

/// One generator rollout prepared for the REBAR estimator.
#[derive(Debug, Clone)]
pub struct Rollout<B: Backend> {
    /// Per-position logits `(batch, len, vocab)`, attached to the generator graph.
    pub theta: Tensor<B, 3>,
    /// Noise that reproduces the sampled tokens when coupled with `theta`.
    pub noise: CoupledNoise<B, 3>,
    /// Sampled tokens `(batch, len)`.
    pub tokens: Tensor<B, 2, Int>,
}

impl<B: Backend> RelbarGenerator<B> {
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    pub fn start_token(&self) -> usize {
        self.start_token
    }

    pub fn device(&self) -> B::Device {
        self.log_temperature.val().device()
    }

    /// Current relaxation temperature.
    pub fn temperature(&self) -> f64 {
        tensor_to_f64(self.log_temperature.val().exp()).max(MIN_SCALAR)
    }

    /// Current control-variate scale.
    pub fn eta(&self) -> f64 {
        tensor_to_f64(self.log_eta.val().exp()).max(MIN_SCALAR)
    }

    /// Parameter ids of the log-temperature and log-eta scalars.
    pub fn scalar_param_ids(&self) -> (ParamId, ParamId) {
        (self.log_temperature.id, self.log_eta.id)
    }

    pub fn init_hidden(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::zeros([batch_size, self.hidden_dim], device)
    }

    /// One recurrent step: `(batch,)` tokens → `(batch, vocab)` logits and next state.
    pub fn step(&self, inp: Tensor<B, 1, Int>, hidden: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch] = inp.dims();
        let emb = self.embedding.forward(inp.reshape([batch, 1]));
        let [_, _, embed_dim] = emb.dims();
        let x = emb.reshape([batch, embed_dim]);
        let hidden = tanh(self.input_proj.forward(x) + self.recurrent.forward(hidden));
        (self.output.forward(hidden.clone()), hidden)
    }

    /// Teacher-forced logits: `(batch, len)` inputs → `(batch, len, vocab)`.
    pub fn forward(&self, inp: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch, len] = inp.dims();
        let device = inp.device();
        let mut hidden = self.init_hidden(batch, &device);
        let mut logits = Vec::with_capacity(len);
        for pos in 0..len {
            let tokens = inp.clone().slice([0..batch, pos..pos + 1]).reshape([batch]);
            let (out, next) = self.step(tokens, hidden);
            logits.push(out);
            hidden = next;
        }
        Tensor::stack(logits, 1)
    }

    /// Maximum-likelihood loss of `target` `(batch, len)` under teacher forcing.
    pub fn mle_loss(&self, target: Tensor<B, 2, Int>) -> Tensor<B, 1> {
        let [batch, len] = target.dims();
        let device = target.device();
        let start = Tensor::<B, 2, Int>::full([batch, 1], self.start_token as i64, &device);
        let inp = if len > 1 {
            Tensor::cat(vec![start, target.clone().slice([0..batch, 0..len - 1])], 1)
        } else {
            start
        };
        let logits = self.forward(inp).reshape([batch * len, self.vocab_size]);
        CrossEntropyLossConfig::new()
            .init(&device)
            .forward(logits, target.reshape([batch * len]))
    }

    /// Sample `num_samples` sequences with Gumbel-max decoding, `batch_size` at a time.
    ///
    /// `num_samples == 0` yields an empty `(0, max_seq_len)` tensor.
    pub fn sample(&self, num_samples: usize, batch_size: usize, device: &B::Device) -> Tensor<B, 2, Int> {
        if num_samples == 0 {
            return Tensor::zeros([0, self.max_seq_len], device);
        }
        let sampler = RelaxedSampler::default();
        let num_batches = num_samples.div_ceil(batch_size.max(1)).max(1);
        let batches: Vec<_> = (0..num_batches)
            .map(|_| self.sample_batch(batch_size, &sampler, device))
            .collect();
        let samples = Tensor::cat(batches, 0);
        samples.slice([0..num_samples, 0..self.max_seq_len])
    }

    fn sample_batch(&self, batch_size: usize, sampler: &RelaxedSampler, device: &B::Device) -> Tensor<B, 2, Int> {
        let mut hidden = self.init_hidden(batch_size, device);
        let mut inp = Tensor::<B, 1, Int>::full([batch_size], self.start_token as i64, device);
        let mut tokens = Vec::with_capacity(self.max_seq_len);
        for _ in 0..self.max_seq_len {
            let (logits, next) = self.step(inp, hidden);
            hidden = next;
            let u = Tensor::random(logits.dims(), Distribution::Uniform(0.0, 1.0), device);
            let z = log_softmax(logits, 1) + sampler.gumbel(u);
            let token = z.argmax(1);
            inp = token.clone().reshape([batch_size]);
            tokens.push(token);
        }
        Tensor::cat(tokens, 1)
    }

    /// Sample one batch and keep what the REBAR estimator needs: the logits
    /// at every position (conditioned on the sampled prefix) and the noise
    /// that produced each token.
    pub fn rollout(&self, batch_size: usize, sampler: &RelaxedSampler, device: &B::Device) -> Rollout<B> {
        let mut hidden = self.init_hidden(batch_size, device);
        let mut inp = Tensor::<B, 1, Int>::full([batch_size], self.start_token as i64, device);
        let mut thetas = Vec::with_capacity(self.max_seq_len);
        let mut noises = Vec::with_capacity(self.max_seq_len);
        let mut tokens = Vec::with_capacity(self.max_seq_len);
        for _ in 0..self.max_seq_len {
            let (logits, next) = self.step(inp, hidden);
            hidden = next;
            let noise = CoupledNoise::draw(logits.dims(), device);
            let coupled = sampler.couple(logits.clone().detach(), &noise);
            inp = coupled.hard_index.clone().reshape([batch_size]);
            tokens.push(coupled.hard_index);
            thetas.push(logits);
            noises.push(noise);
        }
        Rollout {
            theta: Tensor::stack(thetas, 1),
            noise: CoupledNoise::stack(noises, 1),
            tokens: Tensor::cat(tokens, 1),
        }
    }
}
