//! Payload similarity.
//!
//! Scores are bounded to `[0, 1]` and symmetric. Matching payload kinds earn a
//! configurable base score and a structural comparison fills the remainder;
//! mismatched kinds get a small flat score. Excluding a pair outright is the
//! connection policy's call, not the scorer's.

use serde_json::{Map, Value};

use crate::config::SimilarityWeights;
use crate::node::{Payload, PayloadKind};

#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    weights: SimilarityWeights,
}

impl SimilarityScorer {
    pub fn new(weights: SimilarityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SimilarityWeights {
        &self.weights
    }

    pub fn score_payloads(&self, a: &Payload, b: &Payload) -> f64 {
        self.score(a.kind(), a.value(), b.kind(), b.value())
    }

    pub fn score(&self, a_kind: PayloadKind, a: &Value, b_kind: PayloadKind, b: &Value) -> f64 {
        if a_kind != b_kind {
            return self.weights.mismatch_score.clamp(0.0, 1.0);
        }
        let structural = sanitize(self.structural(a_kind, a, b));
        let base = self.weights.same_kind_base.clamp(0.0, 1.0);
        (base + (1.0 - base) * structural).clamp(0.0, 1.0)
    }

    fn structural(&self, kind: PayloadKind, a: &Value, b: &Value) -> f64 {
        match (kind, a, b) {
            (PayloadKind::Empty, _, _) => 1.0,
            (PayloadKind::Flag, Value::Bool(x), Value::Bool(y)) => {
                if x == y {
                    1.0
                } else {
                    0.0
                }
            }
            (PayloadKind::Scalar, Value::Number(x), Value::Number(y)) => {
                scalar_closeness(x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0))
            }
            (PayloadKind::Text, Value::String(x), Value::String(y)) => {
                text_ratio(x, y, self.weights.text_compare_limit)
            }
            (PayloadKind::Vector, Value::Array(x), Value::Array(y)) => {
                vector_similarity(&numbers(x), &numbers(y))
            }
            (PayloadKind::Matrix, Value::Array(x), Value::Array(y)) => matrix_similarity(x, y),
            (PayloadKind::Sequence, Value::Array(x), Value::Array(y)) => sequence_similarity(x, y),
            (PayloadKind::Mapping, Value::Object(x), Value::Object(y)) => mapping_similarity(x, y),
            // Kind tags out of sync with the values; fall back to equality.
            (_, x, y) => {
                if x == y {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new(SimilarityWeights::default())
    }
}

#[inline]
fn sanitize(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// 1 minus the relative difference, with the denominator floored at 1.
fn scalar_closeness(a: f64, b: f64) -> f64 {
    if a == b {
        return 1.0;
    }
    let denom = a.abs().max(b.abs()).max(1.0);
    (1.0 - (a - b).abs() / denom).max(0.0)
}

/// `2 * LCS / (len_a + len_b)` over the first `limit` characters.
fn text_ratio(a: &str, b: &str, limit: usize) -> f64 {
    if a == b {
        return 1.0;
    }
    let a: Vec<char> = a.chars().take(limit).collect();
    let b: Vec<char> = b.chars().take(limit).collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // Two-row LCS table.
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];
    (2 * lcs) as f64 / (a.len() + b.len()) as f64
}

fn numbers(values: &[Value]) -> Vec<f64> {
    values.iter().filter_map(Value::as_f64).collect()
}

/// Cosine similarity rescaled from `[-1, 1]` to `[0, 1]`, over the shared prefix and
/// weighted by the length ratio.
fn vector_similarity(a: &[f64], b: &[f64]) -> f64 {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if long.is_empty() {
        return 1.0;
    }
    if short.is_empty() {
        return 0.0;
    }
    let n = short.len();
    let (mut dot, mut na, mut nb) = (0.0, 0.0, 0.0);
    for i in 0..n {
        dot += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }
    let cosine = if na == 0.0 && nb == 0.0 {
        1.0
    } else if na == 0.0 || nb == 0.0 {
        -1.0
    } else {
        (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
    };
    let rescaled = (cosine + 1.0) * 0.5;
    rescaled * (n as f64 / long.len() as f64)
}

fn matrix_similarity(a: &[Value], b: &[Value]) -> f64 {
    let shape = |m: &[Value]| {
        let cols = m.first().and_then(Value::as_array).map_or(0, Vec::len);
        (m.len(), cols)
    };
    let flat = |m: &[Value]| -> Vec<f64> {
        m.iter()
            .filter_map(Value::as_array)
            .flat_map(|row| row.iter().filter_map(Value::as_f64))
            .collect()
    };
    let sim = vector_similarity(&flat(a), &flat(b));
    if shape(a) == shape(b) {
        sim
    } else {
        sim * 0.5
    }
}

/// Half length ratio, half positional agreement.
fn sequence_similarity(a: &[Value], b: &[Value]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let shortest = a.len().min(b.len());
    let same = a.iter().zip(b).filter(|(x, y)| x == y).count();
    0.5 * (shortest as f64 / longest as f64) + 0.5 * (same as f64 / longest as f64)
}

/// Half key overlap (Jaccard), half value agreement on the shared keys.
fn mapping_similarity(a: &Map<String, Value>, b: &Map<String, Value>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared: Vec<&String> = a.keys().filter(|k| b.contains_key(*k)).collect();
    let union = a.len() + b.len() - shared.len();
    if shared.is_empty() {
        return 0.0;
    }
    let jaccard = shared.len() as f64 / union as f64;
    let agree = shared.iter().filter(|k| a.get(**k) == b.get(**k)).count();
    0.5 * jaccard + 0.5 * (agree as f64 / shared.len() as f64)
}
