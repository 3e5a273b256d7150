//! Blends the per-arm signals into one score per candidate.
//!
//! Two hard gates run before any weighting: the send threshold (when
//! enabled) and the propensity floor. Gated candidates keep a sentinel
//! score and a single explanatory contribution, and can never win.

use std::collections::BTreeMap;

use nudge_core::config::BlendConfig;
use nudge_core::{Arm, Contribution};
use nudge_signals::SegmentBias;

/// Score assigned to candidates rejected by the send-threshold gate.
pub const GATE_THRESHOLD: f64 = -1e9;
/// Score assigned to candidates rejected by the propensity floor.
pub const GATE_FLOOR: f64 = -1e6;

/// Per-arm signal values feeding one scoring pass. Maps are keyed by
/// canonical arm key; a missing entry reads as zero.
#[derive(Debug, Clone, Default)]
pub struct SignalBundle {
    pub propensity: BTreeMap<String, f64>,
    pub empirical: BTreeMap<String, f64>,
    pub uplift: BTreeMap<String, f64>,
    pub similarity: BTreeMap<String, f64>,
    pub sequence: BTreeMap<String, f64>,
    /// True when the arm's category has a delivery window covering the
    /// decision hour.
    pub in_window: BTreeMap<String, bool>,
    pub bias: SegmentBias,
}

/// Winning arm with its blended score and truncated explanation.
#[derive(Debug, Clone)]
pub struct Pick {
    pub arm: Arm,
    pub score: f64,
    pub explanation: Vec<Contribution>,
}

pub struct Blender {
    cfg: BlendConfig,
}

impl Blender {
    pub fn new(cfg: &BlendConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    /// Score every candidate. Returns the score map and, per arm, the
    /// top contributions ordered by absolute magnitude.
    pub fn score(
        &self,
        candidates: &[Arm],
        signals: &SignalBundle,
        threshold: f64,
    ) -> (BTreeMap<String, f64>, BTreeMap<String, Vec<Contribution>>) {
        let mut scores = BTreeMap::new();
        let mut explanations = BTreeMap::new();

        for arm in candidates {
            let key = arm.key();
            let p = lookup(&signals.propensity, &key);

            if self.cfg.use_threshold && p < threshold {
                scores.insert(key.clone(), GATE_THRESHOLD);
                explanations.insert(key, gate("below_threshold", threshold, p));
                continue;
            }
            if p < self.cfg.min_propensity {
                scores.insert(key.clone(), GATE_FLOOR);
                explanations.insert(key, gate("min_propensity", self.cfg.min_propensity, p));
                continue;
            }

            let mut parts = vec![
                ("propensity", self.cfg.w_propensity * p),
                (
                    "empirical",
                    self.cfg.w_empirical * lookup(&signals.empirical, &key),
                ),
                ("uplift", self.cfg.w_uplift * lookup(&signals.uplift, &key)),
                (
                    "similarity",
                    self.cfg.w_similarity * lookup(&signals.similarity, &key),
                ),
                (
                    "sequence",
                    self.cfg.w_sequence * lookup(&signals.sequence, &key),
                ),
            ];
            if signals.in_window.get(&key).copied().unwrap_or(false) {
                parts.push(("window", self.cfg.window_bonus));
            }
            let preference = self.preference_bonus(arm, &signals.bias);
            if preference > 0.0 {
                parts.push(("preference", preference));
            }

            let total: f64 = parts.iter().map(|(_, v)| v).sum();
            let mut explanation: Vec<Contribution> = parts
                .into_iter()
                .map(|(signal, value)| Contribution {
                    signal: signal.to_string(),
                    value,
                })
                .collect();
            explanation.sort_by(|a, b| {
                b.value
                    .abs()
                    .total_cmp(&a.value.abs())
                    .then_with(|| a.signal.cmp(&b.signal))
            });
            explanation.truncate(self.cfg.explain_top);

            scores.insert(key.clone(), total);
            explanations.insert(key, explanation);
        }

        (scores, explanations)
    }

    /// Highest-scoring ungated candidate; ties break to the smallest
    /// arm key. `None` when the grid is empty or every candidate is
    /// gated.
    pub fn pick(&self, candidates: &[Arm], signals: &SignalBundle, threshold: f64) -> Option<Pick> {
        let (scores, mut explanations) = self.score(candidates, signals, threshold);

        let mut best: Option<(String, f64)> = None;
        for (key, &score) in &scores {
            if score <= GATE_FLOOR {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, current)) => score > *current,
            };
            if better {
                best = Some((key.clone(), score));
            }
        }

        let (key, score) = best?;
        let arm = candidates.iter().copied().find(|a| a.key() == key)?;
        let explanation = explanations.remove(&key).unwrap_or_default();
        Some(Pick {
            arm,
            score,
            explanation,
        })
    }

    /// Only the head of each preference list earns the bonus.
    fn preference_bonus(&self, arm: &Arm, bias: &SegmentBias) -> f64 {
        let mut bonus = 0.0;
        if bias.tone_pref.first() == Some(&arm.tone) {
            bonus += self.cfg.preference_bonus;
        }
        if bias.channel_pref.first() == Some(&arm.channel) {
            bonus += self.cfg.preference_bonus;
        }
        bonus
    }
}

fn lookup(map: &BTreeMap<String, f64>, key: &str) -> f64 {
    map.get(key).copied().unwrap_or(0.0)
}

fn gate(signal: &str, bar: f64, p: f64) -> Vec<Contribution> {
    vec![Contribution {
        signal: signal.to_string(),
        value: -(bar - p).abs(),
    }]
}
