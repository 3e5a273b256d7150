//! Global logistic model with epsilon-greedy exploration and Adagrad
//! per-dimension steps.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::warn;

use nudge_core::config::BanditKind;
use nudge_core::features::{encode_arm, FEATURE_DIM};
use nudge_core::{Arm, NudgeResult};

use crate::strategy::{pick_by_scores, BanditStrategy};

/// Persisted weights and Adagrad accumulators, one slot per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticState {
    pub w: Vec<f64>,
    pub g2: Vec<f64>,
}

impl Default for LogisticState {
    fn default() -> Self {
        Self {
            w: vec![0.0; FEATURE_DIM],
            g2: vec![0.0; FEATURE_DIM],
        }
    }
}

impl LogisticState {
    /// Force the persisted vectors back to the feature layout length.
    fn normalize(mut self) -> Self {
        self.w.resize(FEATURE_DIM, 0.0);
        self.g2.resize(FEATURE_DIM, 0.0);
        self
    }
}

fn sigmoid(z: f64) -> f64 {
    if z.is_finite() {
        1.0 / (1.0 + (-z).exp())
    } else {
        0.5
    }
}

pub struct LogisticBandit {
    state: LogisticState,
    learning_rate: f64,
    epsilon: f64,
    weight_clamp: f64,
    rng: StdRng,
}

impl LogisticBandit {
    pub fn new(learning_rate: f64, epsilon: f64, weight_clamp: f64, seed: u64) -> Self {
        Self {
            state: LogisticState::default(),
            learning_rate,
            epsilon,
            weight_clamp,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn restore(&mut self, blob: serde_json::Value) {
        match serde_json::from_value::<LogisticState>(blob) {
            Ok(state) => self.state = state.normalize(),
            Err(err) => warn!(error = %err, "ignoring malformed logistic state"),
        }
    }

    pub fn state(&self) -> &LogisticState {
        &self.state
    }

    /// Predicted response probability for one arm.
    pub fn predict(&self, arm: &Arm) -> f64 {
        sigmoid(encode_arm(arm).dot(&self.state.w))
    }

    /// Signed per-feature contributions to the logit, largest
    /// magnitude first. Only active features appear.
    pub fn contributions(&self, arm: &Arm) -> Vec<(String, f64)> {
        let x = encode_arm(arm);
        let mut parts: Vec<(String, f64)> = nudge_core::FEATURE_NAMES
            .iter()
            .enumerate()
            .filter(|(i, _)| x[*i] != 0.0)
            .map(|(i, name)| (name.to_string(), self.state.w[i] * x[i]))
            .collect();
        parts.sort_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        parts
    }
}

impl BanditStrategy for LogisticBandit {
    fn kind(&self) -> BanditKind {
        BanditKind::Logistic
    }

    fn scores(&mut self, candidates: &[Arm]) -> BTreeMap<String, f64> {
        candidates
            .iter()
            .map(|arm| (arm.key(), self.predict(arm)))
            .collect()
    }

    fn select(&mut self, candidates: &[Arm]) -> Option<Arm> {
        if candidates.is_empty() {
            return None;
        }
        if self.rng.gen::<f64>() < self.epsilon {
            let idx = self.rng.gen_range(0..candidates.len());
            return Some(candidates[idx]);
        }
        let scores = self.scores(candidates);
        pick_by_scores(candidates, &scores)
    }

    fn update(&mut self, arm: &Arm, reward: f64) {
        let y = reward.clamp(0.0, 1.0);
        let x = encode_arm(arm);
        let p = sigmoid(x.dot(&self.state.w));
        let err = p - y;
        for i in 0..FEATURE_DIM {
            let g = err * x[i];
            if g == 0.0 {
                continue;
            }
            self.state.g2[i] += g * g;
            let step = self.learning_rate / (1e-8 + self.state.g2[i].sqrt());
            self.state.w[i] =
                (self.state.w[i] - step * g).clamp(-self.weight_clamp, self.weight_clamp);
        }
    }

    fn snapshot(&self) -> NudgeResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.state)?)
    }
}
