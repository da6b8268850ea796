use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::silu;

/// Configuration for the sequence discriminator.
///
/// ```text
/// (batch, len, vocab)   one-hot or relaxed
///   → Linear(vocab→embed_dim, no bias)       per position
///   → flatten (batch, len·embed_dim)
///   → Linear(len·embed_dim→hidden_dim) → SiLU
///   → Linear(hidden_dim→1) → squeeze
///   → logit: (batch,)
/// ```
#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    pub vocab_size: usize,
    pub max_seq_len: usize,
    #[config(default = 32)]
    pub embed_dim: usize,
    #[config(default = 64)]
    pub hidden_dim: usize,
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RelbarDiscriminator<B> {
        RelbarDiscriminator {
            embedding: LinearConfig::new(self.vocab_size, self.embed_dim)
                .with_bias(false)
                .init(device),
            hidden: LinearConfig::new(self.max_seq_len * self.embed_dim, self.hidden_dim).init(device),
            output: LinearConfig::new(self.hidden_dim, 1).init(device),
            vocab_size: self.vocab_size,
            max_seq_len: self.max_seq_len,
        }
    }
}

/// Real-vs-generated sequence classifier.
///
/// The embedding is a linear map over the vocabulary axis, so the network is
/// differentiable in its input and accepts relaxed sequences as well as
/// one-hot ones. It has no stochastic layers: the same input always gets the
/// same score, which the REBAR estimator relies on when it scores one noise
/// draw at several temperatures.
#[derive(Module, Debug)]
pub struct RelbarDiscriminator<B: Backend> {
    embedding: Linear<B>,
    hidden: Linear<B>,
    output: Linear<B>,
    vocab_size: usize,
    max_seq_len: usize,
}

impl<B: Backend> RelbarDiscriminator<B> {
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Input shape `(batch, max_seq_len, vocab)`, output logits `(batch,)`.
    pub fn forward(&self, sequences: Tensor<B, 3>) -> Tensor<B, 1> {
        let [batch, len, _] = sequences.dims();
        debug_assert_eq!(len, self.max_seq_len, "discriminator sequence length");
        let emb = self.embedding.forward(sequences);
        let [_, _, embed_dim] = emb.dims();
        let x = silu(self.hidden.forward(emb.reshape([batch, len * embed_dim])));
        self.output.forward(x).reshape([batch])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::optim::GradientsParams;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = DiscriminatorConfig::new(5, 3).init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 3>::random([4, 3, 5], Distribution::Uniform(0.0, 1.0), &device);
        assert_eq!(model.forward(input).dims(), [4]);
        assert_eq!((model.vocab_size(), model.max_seq_len()), (5, 3));
    }

    #[test]
    fn test_deterministic_scores() {
        let device = Default::default();
        let model = DiscriminatorConfig::new(5, 3).init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 3>::random([4, 3, 5], Distribution::Uniform(0.0, 1.0), &device);
        let a: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = model.forward(input).into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_differentiable_in_input_and_parameters() {
        let device = Default::default();
        let model = DiscriminatorConfig::new(5, 3)
            .with_embed_dim(4)
            .with_hidden_dim(8)
            .init::<TestAutodiffBackend>(&device);
        let input = Tensor::<TestAutodiffBackend, 3>::random([2, 3, 5], Distribution::Uniform(0.0, 1.0), &device)
            .require_grad();
        let grads = model.forward(input.clone()).sum().backward();

        let input_grad = input.grad(&grads).expect("input should have a gradient");
        let magnitude: f32 = input_grad.abs().sum().into_scalar().elem();
        assert!(magnitude > 0.0);

        let params = GradientsParams::from_grads(grads, &model);
        assert!(params
            .get::<TestBackend, 2>(model.embedding.weight.id)
            .is_some());
    }
}
