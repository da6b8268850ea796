//! Whitespace word vocabulary with reserved padding, start and unknown tokens.

use std::collections::HashMap;

pub const PAD_TOKEN: &str = "<pad>";
pub const BOS_TOKEN: &str = "<bos>";
pub const UNK_TOKEN: &str = "<unk>";

pub const PAD_ID: u32 = 0;
pub const BOS_ID: u32 = 1;
pub const UNK_ID: u32 = 2;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Vocabulary {
    words: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, u32>,
}

impl Vocabulary {
    /// Build from text lines. Words are ordered by descending frequency, then
    /// lexicographically, after the three reserved tokens.
    pub fn from_corpus<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for line in lines {
            for word in line.as_ref().split_whitespace() {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(w, _)| ![PAD_TOKEN, BOS_TOKEN, UNK_TOKEN].contains(w))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let words = [PAD_TOKEN, BOS_TOKEN, UNK_TOKEN]
            .into_iter()
            .chain(ranked.into_iter().map(|(w, _)| w))
            .map(str::to_string)
            .collect();
        Self::from_words(words)
    }

    fn from_words(words: Vec<String>) -> Self {
        let index = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();
        Self { words, index }
    }

    /// Rebuild the lookup table after deserialization.
    pub fn reindex(self) -> Self {
        Self::from_words(self.words)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn id(&self, word: &str) -> u32 {
        self.index.get(word).copied().unwrap_or(UNK_ID)
    }

    /// Token ids of `line`, truncated to `max_seq_len` and padded with `<pad>`.
    pub fn encode(&self, line: &str, max_seq_len: usize) -> Vec<u32> {
        let mut ids: Vec<u32> = line
            .split_whitespace()
            .take(max_seq_len)
            .map(|w| self.id(w))
            .collect();
        ids.resize(max_seq_len, PAD_ID);
        ids
    }

    /// Words up to the first padding token; start tokens are skipped.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .take_while(|&&id| id != PAD_ID)
            .filter(|&&id| id != BOS_ID)
            .map(|&id| {
                self.words
                    .get(id as usize)
                    .map(String::as_str)
                    .unwrap_or(UNK_TOKEN)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids() {
        let vocab = Vocabulary::from_corpus(&["a b"]);
        assert_eq!(vocab.id(PAD_TOKEN), PAD_ID);
        assert_eq!(vocab.id(BOS_TOKEN), BOS_ID);
        assert_eq!(vocab.id(UNK_TOKEN), UNK_ID);
        assert_eq!(vocab.len(), 5);
    }

    #[test]
    fn test_frequency_order() {
        let vocab = Vocabulary::from_corpus(&["the cat", "the dog", "a cat the"]);
        assert_eq!(vocab.id("the"), 3);
        assert_eq!(vocab.id("cat"), 4);
        assert_eq!(vocab.id("a"), 5);
        assert_eq!(vocab.id("dog"), 6);
    }

    #[test]
    fn test_encode_pads_truncates_and_maps_unknown() {
        let vocab = Vocabulary::from_corpus(&["x y z"]);
        assert_eq!(vocab.encode("x zebra", 4), vec![vocab.id("x"), UNK_ID, PAD_ID, PAD_ID]);
        assert_eq!(vocab.encode("x y z x", 2), vec![vocab.id("x"), vocab.id("y")]);
    }

    #[test]
    fn test_decode_stops_at_padding() {
        let vocab = Vocabulary::from_corpus(&["hello world"]);
        let ids = vocab.encode("hello world", 5);
        assert_eq!(vocab.decode(&ids), "hello world");
        assert_eq!(vocab.decode(&[BOS_ID, vocab.id("world"), PAD_ID, vocab.id("hello")]), "world");
        assert_eq!(vocab.decode(&[999]), UNK_TOKEN);
    }

    #[test]
    fn test_json_round_trip_needs_reindex() {
        let vocab = Vocabulary::from_corpus(&["p q"]);
        let json = serde_json::to_string(&vocab).unwrap();
        let restored: Vocabulary = serde_json::from_str::<Vocabulary>(&json).unwrap().reindex();
        assert_eq!(restored, vocab);
    }
}
