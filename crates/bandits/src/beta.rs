//! Beta-Bernoulli Thompson sampling, one posterior per arm.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};
use tracing::warn;

use nudge_core::config::BanditKind;
use nudge_core::{Arm, NudgeResult};

use crate::strategy::BanditStrategy;

/// Beta(alpha, beta) posterior for one arm. Prior is (1, 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaArm {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaArm {
    pub fn mean(&self) -> f64 {
        let total = self.alpha + self.beta;
        if total > 0.0 {
            self.alpha / total
        } else {
            0.5
        }
    }

    /// Draw from the posterior as a ratio of two Gamma draws.
    /// A degenerate draw (both zero) yields the neutral 0.5.
    fn sample(&self, rng: &mut StdRng) -> f64 {
        let x = gamma_draw(rng, self.alpha);
        let y = gamma_draw(rng, self.beta);
        if x + y > 0.0 {
            x / (x + y)
        } else {
            0.5
        }
    }

    fn update(&mut self, reward: f64) {
        self.alpha += reward;
        self.beta += 1.0 - reward;
    }
}

impl Default for BetaArm {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

fn gamma_draw(rng: &mut StdRng, shape: f64) -> f64 {
    match Gamma::new(shape.max(1e-12), 1.0) {
        Ok(gamma) => gamma.sample(rng),
        Err(_) => 0.0,
    }
}

/// Persisted state: the full posterior map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BetaState {
    pub arms: BTreeMap<String, BetaArm>,
}

pub struct BetaBandit {
    state: BetaState,
    rng: StdRng,
}

impl BetaBandit {
    pub fn new(seed: u64) -> Self {
        Self {
            state: BetaState::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn restore(&mut self, blob: serde_json::Value) {
        match serde_json::from_value(blob) {
            Ok(state) => self.state = state,
            Err(err) => warn!(error = %err, "ignoring malformed beta state"),
        }
    }

    pub fn state(&self) -> &BetaState {
        &self.state
    }

    /// Posterior mean for an arm, 0.5 when unseen.
    pub fn mean(&self, arm: &Arm) -> f64 {
        self.state
            .arms
            .get(&arm.key())
            .map(|a| a.mean())
            .unwrap_or(0.5)
    }
}

impl BanditStrategy for BetaBandit {
    fn kind(&self) -> BanditKind {
        BanditKind::Beta
    }

    fn scores(&mut self, candidates: &[Arm]) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();
        for arm in candidates {
            let key = arm.key();
            let posterior = self.state.arms.entry(key.clone()).or_default();
            scores.insert(key, posterior.sample(&mut self.rng));
        }
        scores
    }

    fn update(&mut self, arm: &Arm, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        self.state
            .arms
            .entry(arm.key())
            .or_default()
            .update(reward);
    }

    fn snapshot(&self) -> NudgeResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.state)?)
    }
}
