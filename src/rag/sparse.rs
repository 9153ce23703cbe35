//! BM25 term-frequency vectors for the sparse half of hybrid search.
//!
//! Only the term-frequency part of BM25 is computed here. The index applies
//! IDF itself (`modifier: idf` on the sparse vector), so documents can be
//! encoded one at a time without corpus statistics.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Sparse vector with unique, ascending indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    fn from_weights(weights: BTreeMap<u32, f32>) -> Self {
        let (indices, values) = weights.into_iter().unzip();
        Self { indices, values }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

// Thai runs first, then words from any other script.
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{Thai}+|[[\p{L}\p{N}]&&\P{Thai}]+").unwrap());

pub struct Bm25Encoder {
    k1: f32,
    b: f32,
    avg_len: f32,
}

impl Default for Bm25Encoder {
    fn default() -> Self {
        Self::new(1.2, 0.75, 256.0)
    }
}

impl Bm25Encoder {
    pub fn new(k1: f32, b: f32, avg_len: f32) -> Self {
        Self { k1, b, avg_len }
    }

    /// Thai has no word spacing, so Thai runs become overlapping character
    /// bigrams. Everything else is lower-cased words.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for m in TOKEN_RE.find_iter(text) {
            let run = m.as_str();
            if run.chars().next().is_some_and(is_thai) {
                let chars: Vec<char> = run.chars().collect();
                if chars.len() == 1 {
                    tokens.push(run.to_string());
                } else {
                    tokens.extend(chars.windows(2).map(|w| w.iter().collect::<String>()));
                }
            } else {
                tokens.push(run.to_lowercase());
            }
        }
        tokens
    }

    /// Document-side weights: `tf * (k1 + 1) / (tf + k1 * (1 - b + b * len / avg_len))`.
    pub fn encode_document(&self, text: &str) -> SparseVector {
        let tokens = self.tokenize(text);
        let doc_len = tokens.len() as f32;

        let mut tf: BTreeMap<u32, f32> = BTreeMap::new();
        for token in &tokens {
            *tf.entry(token_index(token)).or_default() += 1.0;
        }

        let norm = self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_len);
        let weights = tf
            .into_iter()
            .map(|(idx, f)| (idx, f * (self.k1 + 1.0) / (f + norm)))
            .collect();
        SparseVector::from_weights(weights)
    }

    /// Query-side weights: 1.0 for every distinct token.
    pub fn encode_query(&self, text: &str) -> SparseVector {
        let weights = self
            .tokenize(text)
            .iter()
            .map(|t| (token_index(t), 1.0))
            .collect();
        SparseVector::from_weights(weights)
    }
}

fn is_thai(c: char) -> bool {
    ('\u{0E00}'..='\u{0E7F}').contains(&c)
}

/// First four bytes of the SHA-256 of the token. Stable across processes.
fn token_index(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
