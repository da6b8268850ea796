//! Tensor bridge: conversions between host token sequences (`Vec<u32>`) and
//! burn tensors, and one-hot encoding along the vocabulary axis.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{RelbarError, Result};

/// Convert a batch of equal-length token sequences to a `(batch, len)` Int tensor.
pub fn tokens_to_tensor<B: Backend>(
    sequences: &[Vec<u32>],
    device: &B::Device,
) -> Result<Tensor<B, 2, Int>> {
    let Some(first) = sequences.first() else {
        return Err(RelbarError::Data("token batch must not be empty".into()));
    };
    let len = first.len();
    if let Some((i, seq)) = sequences.iter().enumerate().find(|(_, s)| s.len() != len) {
        return Err(RelbarError::Data(format!(
            "sequence {i} has length {}, expected {len}",
            seq.len()
        )));
    }
    let flat: Vec<i64> = sequences
        .iter()
        .flat_map(|s| s.iter().map(|&t| t as i64))
        .collect();
    Ok(Tensor::from_data(
        TensorData::new(flat, [sequences.len(), len]),
        device,
    ))
}

/// Convert a `(batch, len)` Int tensor back to host token sequences.
pub fn tensor_to_tokens<B: Backend>(tokens: Tensor<B, 2, Int>) -> Result<Vec<Vec<u32>>> {
    let [batch, len] = tokens.dims();
    let flat = tokens
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| RelbarError::Data(format!("failed to read token tensor: {e:?}")))?;
    Ok((0..batch)
        .map(|b| flat[b * len..(b + 1) * len].iter().map(|&t| t as u32).collect())
        .collect())
}

/// One-hot encode `indices` whose last axis has size 1 into `num_classes` columns.
pub fn one_hot<B: Backend, const D: usize>(
    indices: Tensor<B, D, Int>,
    num_classes: usize,
) -> Tensor<B, D> {
    let device = indices.device();
    let index_dims = indices.dims();
    let mut dims = index_dims;
    dims[D - 1] = num_classes;
    Tensor::<B, D>::zeros(dims, &device).scatter(
        D - 1,
        indices,
        Tensor::ones(index_dims, &device),
    )
}

/// One-hot encode a `(batch, len)` token tensor into `(batch, len, vocab)`.
pub fn tokens_to_one_hot<B: Backend>(tokens: Tensor<B, 2, Int>, vocab_size: usize) -> Tensor<B, 3> {
    one_hot(tokens.unsqueeze_dim::<3>(2), vocab_size)
}

/// Extract f64 values from a burn 1D tensor.
pub fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 1>) -> Result<Vec<f64>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map(|v| v.into_iter().map(f64::from).collect())
        .map_err(|e| RelbarError::Data(format!("failed to read float tensor: {e:?}")))
}

/// Extract a single f64 scalar from a one-element tensor.
pub fn tensor_to_f64<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}
