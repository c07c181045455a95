//! Built-in hashing embedder.
//!
//! Feature hashing of lowercase word unigrams and bigrams into a fixed-width
//! signed vector, L2-normalized. Deterministic across runs and platforms and
//! needs no model download, so an index can be built fully offline.

use async_trait::async_trait;
use ragflow_core::{CollaboratorError, Embedder};

use crate::vector::normalize;

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let tokens = tokenize(text);

        for token in &tokens {
            self.add_feature(&mut v, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut v, bigram.as_bytes(), 0.5);
        }

        normalize(&mut v);
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let slot = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        v[slot] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        Ok(inputs.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, b| (hash ^ *b as u64).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::squared_l2;

    #[test]
    fn embeddings_are_unit_length() {
        let v = HashingEmbedder::default().embed_one("Retrieval augmented generation");
        let norm: f32 = v.iter().map(|x| x * x).sum();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn embedding_is_deterministic() {
        let e = HashingEmbedder::new(64);
        assert_eq!(e.embed_one("same text"), e.embed_one("same text"));
    }

    #[test]
    fn case_and_punctuation_are_ignored() {
        let e = HashingEmbedder::new(128);
        assert_eq!(e.embed_one("What is RAG?"), e.embed_one("what is rag"));
    }

    #[test]
    fn related_text_is_closer_than_unrelated() {
        let e = HashingEmbedder::default();
        let query = e.embed_one("how does vector retrieval work");
        let related = e.embed_one("vector retrieval finds similar chunks; retrieval work is cheap");
        let unrelated = e.embed_one("bake the bread at two hundred degrees");
        assert!(squared_l2(&query, &related) < squared_l2(&query, &unrelated));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let v = HashingEmbedder::new(8).embed_one("  ...  ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn trait_embeds_in_order() {
        let e = HashingEmbedder::new(32);
        let out = e.embed(&["a b".to_string(), "c d".to_string()]).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], e.embed_one("a b"));
        assert_eq!(out[1], e.embed_one("c d"));
    }
}
