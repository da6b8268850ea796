//! In-memory token datasets for generator pretraining and discriminator
//! classification.
//!
//! Sequences are stored as host token ids padded to a fixed length; batches
//! are converted to tensors by the trainer via [`crate::model::bridge`].

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{RelbarError, Result};

/// Fixed-length token sequences for MLE pretraining and real-data sampling.
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    samples: Vec<Vec<u32>>,
    batch_size: usize,
    max_seq_len: usize,
    padding_idx: u32,
}

impl SequenceDataset {
    /// Pad every sequence to `max_seq_len` with `padding_idx`.
    ///
    /// Fails on an empty corpus or a sequence longer than `max_seq_len`.
    pub fn new(
        samples: Vec<Vec<u32>>,
        batch_size: usize,
        max_seq_len: usize,
        padding_idx: u32,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(RelbarError::Config("batch_size must be positive".into()));
        }
        let mut dataset = Self {
            samples: Vec::new(),
            batch_size,
            max_seq_len,
            padding_idx,
        };
        dataset.reset(samples)?;
        Ok(dataset)
    }

    /// Replace the corpus, padding as in [`SequenceDataset::new`].
    pub fn reset(&mut self, samples: Vec<Vec<u32>>) -> Result<()> {
        if samples.is_empty() {
            return Err(RelbarError::Data("corpus is empty".into()));
        }
        let mut padded = Vec::with_capacity(samples.len());
        for (i, mut seq) in samples.into_iter().enumerate() {
            if seq.len() > self.max_seq_len {
                return Err(RelbarError::Data(format!(
                    "sequence {i} has {} tokens, more than max_seq_len = {}",
                    seq.len(),
                    self.max_seq_len
                )));
            }
            seq.resize(self.max_seq_len, self.padding_idx);
            padded.push(seq);
        }
        self.samples = padded;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn seq_len(&self) -> usize {
        self.max_seq_len
    }

    pub fn samples(&self) -> &[Vec<u32>] {
        &self.samples
    }

    /// Largest token id in the corpus, padding included.
    pub fn max_token(&self) -> u32 {
        self.samples.iter().flatten().copied().max().unwrap_or(self.padding_idx)
    }

    /// A batch of exactly `batch_size` sequences. Drawn without replacement
    /// when the corpus is large enough, with replacement otherwise.
    pub fn random_batch<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Vec<u32>> {
        if self.samples.len() >= self.batch_size {
            self.samples
                .choose_multiple(rng, self.batch_size)
                .cloned()
                .collect()
        } else {
            (0..self.batch_size)
                .map(|_| self.samples[rng.gen_range(0..self.samples.len())].clone())
                .collect()
        }
    }

    /// One shuffled pass over the corpus in full batches. The trailing
    /// partial batch is dropped unless the corpus is smaller than one batch.
    pub fn shuffled_batches<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Vec<Vec<u32>>> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        order.shuffle(rng);
        let mut batches: Vec<Vec<Vec<u32>>> = order
            .chunks_exact(self.batch_size)
            .map(|chunk| chunk.iter().map(|&i| self.samples[i].clone()).collect())
            .collect();
        if batches.is_empty() {
            batches.push(order.iter().map(|&i| self.samples[i].clone()).collect());
        }
        batches
    }
}

/// A labeled batch: sequences with 1.0 for real and 0.0 for generated.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledBatch {
    pub sequences: Vec<Vec<u32>>,
    pub labels: Vec<f32>,
}

/// Real and generated sequences shuffled together for binary classification.
#[derive(Debug, Clone)]
pub struct DiscriminatorDataset {
    samples: Vec<(Vec<u32>, f32)>,
    batch_size: usize,
}

impl DiscriminatorDataset {
    pub fn new<R: Rng + ?Sized>(
        positives: &[Vec<u32>],
        negatives: &[Vec<u32>],
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if positives.is_empty() || negatives.is_empty() {
            return Err(RelbarError::Data(format!(
                "discriminator data needs both classes ({} real, {} generated)",
                positives.len(),
                negatives.len()
            )));
        }
        let mut samples: Vec<(Vec<u32>, f32)> = positives
            .iter()
            .map(|s| (s.clone(), 1.0))
            .chain(negatives.iter().map(|s| (s.clone(), 0.0)))
            .collect();
        samples.shuffle(rng);
        Ok(Self {
            samples,
            batch_size: batch_size.max(1),
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Reshuffle in place before another epoch.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.samples.shuffle(rng);
    }

    /// Labeled batches in the current order; the last one may be short.
    pub fn batches(&self) -> impl Iterator<Item = LabeledBatch> + '_ {
        self.samples.chunks(self.batch_size).map(|chunk| LabeledBatch {
            sequences: chunk.iter().map(|(s, _)| s.clone()).collect(),
            labels: chunk.iter().map(|&(_, l)| l).collect(),
        })
    }
}
