//! Hashed character n-gram embeddings for content/context affinity.

use std::sync::Arc;

use dashmap::DashMap;
use nudge_core::config::SimilarityConfig;
use nudge_core::Category;
use sha2::{Digest, Sha256};

use crate::content::ContentItem;

/// Deterministic bag-of-trigrams embedder with a cosine scorer.
/// Candidate text embeddings are cached per content id; context
/// embeddings are computed per call.
#[derive(Debug)]
pub struct SimilarityScorer {
    ngram: usize,
    dim: usize,
    normalize: bool,
    cache: DashMap<String, Arc<Vec<f64>>>,
}

impl SimilarityScorer {
    pub fn new(cfg: &SimilarityConfig) -> Self {
        Self {
            ngram: cfg.ngram.max(1),
            dim: cfg.dim.max(1),
            normalize: cfg.normalize,
            cache: DashMap::new(),
        }
    }

    /// Cosine of context vs. candidate copy mapped onto [0, 1]. A
    /// zero-mass side yields the rank-neutral midpoint 0.5.
    pub fn score(&self, context: &str, item: &ContentItem) -> f64 {
        let candidate = self
            .cache
            .entry(item.id.clone())
            .or_insert_with(|| Arc::new(self.embed(&item.text)))
            .clone();
        let ctx = self.embed(context);
        (cosine(&ctx, &candidate) + 1.0) / 2.0
    }

    /// Lowercase, collapse whitespace, wrap in `^...$`, then hash each
    /// character n-gram into a bucket.
    pub fn embed(&self, text: &str) -> Vec<f64> {
        let mut v = vec![0.0; self.dim];
        if text.is_empty() {
            return v;
        }
        let collapsed = text
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let wrapped: Vec<char> = format!("^{collapsed}$").chars().collect();
        for window in wrapped.windows(self.ngram) {
            let gram: String = window.iter().collect();
            v[bucket(&gram, self.dim)] += 1.0;
        }
        if self.normalize {
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 0.0 {
                for x in &mut v {
                    *x /= norm;
                }
            }
        }
        v
    }
}

/// Decision context fed to the embedder: free-form reasons, category
/// and segment label, pipe-joined, empties skipped.
pub fn context_line(reasons: Option<&str>, category: Category, segment: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(reasons) = reasons {
        if !reasons.is_empty() {
            parts.push(reasons);
        }
    }
    parts.push(category.as_str());
    if !segment.is_empty() {
        parts.push(segment);
    }
    parts.join(" | ")
}

fn bucket(gram: &str, dim: usize) -> usize {
    let digest = Sha256::digest(gram.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % dim as u64) as usize
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (na * nb)
}
