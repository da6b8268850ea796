//! Sample-quality metrics. Read-only: nothing here feeds back into training.

use std::collections::HashMap;
use std::fmt;

/// Scores generated sequences against reference sequences.
pub trait MetricEvaluator {
    /// A one-line summary suitable for a log field.
    fn evaluate(&self, generated: &[Vec<u32>], reference: &[Vec<u32>]) -> String;
}

/// Reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetrics;

impl MetricEvaluator for NoMetrics {
    fn evaluate(&self, _: &[Vec<u32>], _: &[Vec<u32>]) -> String {
        String::new()
    }
}

/// Smoothing constant added to zero n-gram match counts.
const SMOOTHING_EPSILON: f64 = 0.1;
const SELF_BLEU_ORDER: usize = 3;

/// BLEU gram orders used for a sequence length: `2..=5`, capped at the length.
pub fn bleu_grams_for(max_seq_len: usize) -> Vec<usize> {
    (2..=max_seq_len.min(5)).collect()
}

/// Corpus-averaged smoothed sentence BLEU plus self-BLEU-3.
#[derive(Debug, Clone)]
pub struct BleuEvaluator {
    grams: Vec<usize>,
    padding_idx: u32,
    max_hypotheses: usize,
}

/// Scores computed by [`BleuEvaluator::scores`].
#[derive(Debug, Clone, PartialEq)]
pub struct BleuScores {
    /// `(order, score)` pairs.
    pub bleu: Vec<(usize, f64)>,
    pub self_bleu: f64,
}

impl fmt::Display for BleuScores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .bleu
            .iter()
            .map(|(n, score)| format!("BLEU-{n} = {score:.4}"))
            .collect();
        write!(f, "{}, Self-BLEU-{SELF_BLEU_ORDER} = {:.4}", parts.join(", "), self.self_bleu)
    }
}

impl BleuEvaluator {
    pub fn new(grams: Vec<usize>, padding_idx: u32, max_hypotheses: usize) -> Self {
        Self {
            grams,
            padding_idx,
            max_hypotheses: max_hypotheses.max(1),
        }
    }

    /// Default gram orders for `max_seq_len`.
    pub fn for_seq_len(max_seq_len: usize, padding_idx: u32, max_hypotheses: usize) -> Self {
        Self::new(bleu_grams_for(max_seq_len), padding_idx, max_hypotheses)
    }

    pub fn scores(&self, generated: &[Vec<u32>], reference: &[Vec<u32>]) -> BleuScores {
        let hypotheses: Vec<Vec<u32>> = generated
            .iter()
            .take(self.max_hypotheses)
            .map(|s| self.strip(s))
            .collect();
        let references: Vec<Vec<u32>> = reference.iter().map(|s| self.strip(s)).collect();

        let bleu = self
            .grams
            .iter()
            .map(|&n| {
                let table = ReferenceTable::build(&references, n);
                (n, mean(hypotheses.iter().map(|h| table.sentence_bleu(h, n))))
            })
            .collect();

        let self_bleu = mean((0..hypotheses.len()).map(|i| {
            let others: Vec<Vec<u32>> = hypotheses
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, s)| s.clone())
                .collect();
            ReferenceTable::build(&others, SELF_BLEU_ORDER).sentence_bleu(&hypotheses[i], SELF_BLEU_ORDER)
        }));

        BleuScores { bleu, self_bleu }
    }

    fn strip(&self, seq: &[u32]) -> Vec<u32> {
        seq.iter()
            .copied()
            .take_while(|&t| t != self.padding_idx)
            .collect()
    }
}

impl MetricEvaluator for BleuEvaluator {
    fn evaluate(&self, generated: &[Vec<u32>], reference: &[Vec<u32>]) -> String {
        self.scores(generated, reference).to_string()
    }
}

/// Clipping counts and lengths of a multi-reference set, up to order `n`.
struct ReferenceTable {
    /// `max_counts[k]` holds, for each (k+1)-gram, its highest count in any single reference.
    max_counts: Vec<HashMap<Vec<u32>, usize>>,
    lengths: Vec<usize>,
}

impl ReferenceTable {
    fn build(references: &[Vec<u32>], n: usize) -> Self {
        let mut max_counts = vec![HashMap::new(); n];
        for reference in references {
            for (k, table) in max_counts.iter_mut().enumerate() {
                for (gram, count) in ngram_counts(reference, k + 1) {
                    let entry = table.entry(gram).or_insert(0);
                    *entry = (*entry).max(count);
                }
            }
        }
        let mut lengths: Vec<usize> = references.iter().map(Vec::len).collect();
        lengths.sort_unstable();
        lengths.dedup();
        Self { max_counts, lengths }
    }

    /// Sentence BLEU with uniform weights over orders `1..=n`.
    fn sentence_bleu(&self, hypothesis: &[u32], n: usize) -> f64 {
        if self.lengths.is_empty() || hypothesis.is_empty() {
            return 0.0;
        }
        let log_precision: f64 = (1..=n)
            .map(|k| {
                let counts = ngram_counts(hypothesis, k);
                let total: usize = counts.values().sum();
                let clipped: usize = counts
                    .iter()
                    .map(|(gram, &c)| c.min(self.max_counts[k - 1].get(gram).copied().unwrap_or(0)))
                    .sum();
                let numerator = if clipped == 0 {
                    SMOOTHING_EPSILON
                } else {
                    clipped as f64
                };
                (numerator / total.max(1) as f64).ln()
            })
            .sum::<f64>()
            / n as f64;
        self.brevity_penalty(hypothesis.len()) * log_precision.exp()
    }

    fn brevity_penalty(&self, hyp_len: usize) -> f64 {
        // Closest reference length, the shorter one on ties.
        let closest = self
            .lengths
            .iter()
            .copied()
            .min_by_key(|&r| (r.abs_diff(hyp_len), r))
            .unwrap_or(0);
        if hyp_len >= closest {
            1.0
        } else {
            (1.0 - closest as f64 / hyp_len as f64).exp()
        }
    }
}

fn ngram_counts(seq: &[u32], n: usize) -> HashMap<Vec<u32>, usize> {
    let mut counts = HashMap::new();
    if n == 0 || seq.len() < n {
        return counts;
    }
    for window in seq.windows(n) {
        *counts.entry(window.to_vec()).or_insert(0) += 1;
    }
    counts
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
