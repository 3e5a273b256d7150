//! Disjoint linear models per arm: LinUCB and Bayesian linear
//! Thompson sampling share the same `(A, b)` sufficient statistics.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::warn;

use nudge_core::config::BanditKind;
use nudge_core::features::{encode_arm, FEATURE_DIM};
use nudge_core::{Arm, NudgeResult};

use crate::linalg;
use crate::strategy::BanditStrategy;

/// Ridge statistics for one arm: `A = lambda*I + sum(x x^T)`,
/// `b = sum(r x)`. A stays symmetric positive-definite because it only
/// ever accumulates rank-1 outer products on top of the prior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmLinearState {
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
}

impl ArmLinearState {
    pub fn fresh(lambda: f64) -> Self {
        let mut a = vec![vec![0.0; FEATURE_DIM]; FEATURE_DIM];
        for (i, row) in a.iter_mut().enumerate() {
            row[i] = lambda;
        }
        Self {
            a,
            b: vec![0.0; FEATURE_DIM],
        }
    }

    /// True when the persisted shape matches the feature layout.
    fn well_formed(&self) -> bool {
        self.b.len() == FEATURE_DIM
            && self.a.len() == FEATURE_DIM
            && self.a.iter().all(|row| row.len() == FEATURE_DIM)
    }

    fn gram(&self) -> Array2<f64> {
        let mut m = Array2::<f64>::zeros((FEATURE_DIM, FEATURE_DIM));
        for i in 0..FEATURE_DIM {
            for j in 0..FEATURE_DIM {
                m[[i, j]] = self.a[i][j];
            }
        }
        m
    }

    fn response(&self) -> Array1<f64> {
        Array1::from(self.b.clone())
    }

    fn rank_one_update(&mut self, x: &[f64], reward: f64) {
        for i in 0..FEATURE_DIM {
            if x[i] == 0.0 {
                continue;
            }
            for j in 0..FEATURE_DIM {
                self.a[i][j] += x[i] * x[j];
            }
            self.b[i] += reward * x[i];
        }
    }
}

/// Persisted state shared by both linear strategies: the per-arm map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearState {
    pub arms: BTreeMap<String, ArmLinearState>,
}

impl LinearState {
    fn normalize(mut self) -> Self {
        self.arms.retain(|key, state| {
            if state.well_formed() {
                true
            } else {
                warn!(arm = %key, "dropping malformed linear arm state");
                false
            }
        });
        self
    }
}

/// Inverse of an arm's Gram matrix. A singular matrix reinitializes
/// the arm to the ridge prior and retries once; the prior is always
/// invertible.
fn inverse_or_reinit(state: &mut ArmLinearState, lambda: f64, key: &str) -> Array2<f64> {
    match linalg::invert(&state.gram()) {
        Ok(inv) => inv,
        Err(err) => {
            warn!(arm = key, error = %err, "reinitializing degenerate arm state");
            *state = ArmLinearState::fresh(lambda);
            linalg::invert(&state.gram()).unwrap_or_else(|_| {
                Array2::<f64>::eye(FEATURE_DIM) / lambda.max(f64::MIN_POSITIVE)
            })
        }
    }
}

// ─── LinUCB ─────────────────────────────────────────────────────────────

pub struct LinUcbBandit {
    state: LinearState,
    alpha: f64,
    lambda: f64,
}

impl LinUcbBandit {
    pub fn new(alpha: f64, lambda: f64) -> Self {
        Self {
            state: LinearState::default(),
            alpha,
            lambda,
        }
    }

    pub fn restore(&mut self, blob: serde_json::Value) {
        match serde_json::from_value::<LinearState>(blob) {
            Ok(state) => self.state = state.normalize(),
            Err(err) => warn!(error = %err, "ignoring malformed linucb state"),
        }
    }

    pub fn state(&self) -> &LinearState {
        &self.state
    }

    /// Width of the confidence bonus for one arm, before scaling by
    /// alpha. Shrinks as observations accumulate.
    pub fn confidence_width(&mut self, arm: &Arm) -> f64 {
        let key = arm.key();
        let x = Array1::from(encode_arm(arm).as_slice().to_vec());
        let lambda = self.lambda;
        let state = self
            .state
            .arms
            .entry(key.clone())
            .or_insert_with(|| ArmLinearState::fresh(lambda));
        let inv = inverse_or_reinit(state, lambda, &key);
        linalg::quadratic_form(&inv, &x).sqrt()
    }
}

impl BanditStrategy for LinUcbBandit {
    fn kind(&self) -> BanditKind {
        BanditKind::LinUcb
    }

    fn scores(&mut self, candidates: &[Arm]) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();
        for arm in candidates {
            let key = arm.key();
            let x = Array1::from(encode_arm(arm).as_slice().to_vec());
            let lambda = self.lambda;
            let state = self
                .state
                .arms
                .entry(key.clone())
                .or_insert_with(|| ArmLinearState::fresh(lambda));
            let inv = inverse_or_reinit(state, lambda, &key);
            let theta = inv.dot(&state.response());
            let mean = x.dot(&theta);
            let bonus = self.alpha * linalg::quadratic_form(&inv, &x).sqrt();
            scores.insert(key, mean + bonus);
        }
        scores
    }

    fn update(&mut self, arm: &Arm, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        let x = encode_arm(arm);
        let lambda = self.lambda;
        self.state
            .arms
            .entry(arm.key())
            .or_insert_with(|| ArmLinearState::fresh(lambda))
            .rank_one_update(x.as_slice(), reward);
    }

    fn snapshot(&self) -> NudgeResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.state)?)
    }
}

// ─── Bayesian Linear Thompson ───────────────────────────────────────────

pub struct ThompsonLinearBandit {
    state: LinearState,
    v: f64,
    lambda: f64,
    rng: StdRng,
}

impl ThompsonLinearBandit {
    pub fn new(v: f64, lambda: f64, seed: u64) -> Self {
        Self {
            state: LinearState::default(),
            v,
            lambda,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn restore(&mut self, blob: serde_json::Value) {
        match serde_json::from_value::<LinearState>(blob) {
            Ok(state) => self.state = state.normalize(),
            Err(err) => warn!(error = %err, "ignoring malformed thompson state"),
        }
    }

    pub fn state(&self) -> &LinearState {
        &self.state
    }

    /// Draw theta ~ N(A^-1 b, v^2 A^-1) through the Cholesky factor of
    /// the jittered posterior covariance.
    fn sample_theta(&mut self, inv: &Array2<f64>, mu: &Array1<f64>) -> Array1<f64> {
        let jittered = inv + &(Array2::<f64>::eye(FEATURE_DIM) * 1e-9);
        let chol = match linalg::cholesky(&jittered) {
            Ok(l) => l,
            Err(err) => {
                warn!(error = %err, "posterior covariance not factorizable, using mean");
                return mu.clone();
            }
        };
        let z: Array1<f64> = Array1::from(
            (0..FEATURE_DIM)
                .map(|_| StandardNormal.sample(&mut self.rng))
                .collect::<Vec<f64>>(),
        );
        mu + &(chol.dot(&z) * self.v)
    }
}

impl BanditStrategy for ThompsonLinearBandit {
    fn kind(&self) -> BanditKind {
        BanditKind::Thompson
    }

    fn scores(&mut self, candidates: &[Arm]) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();
        for arm in candidates {
            let key = arm.key();
            let x = Array1::from(encode_arm(arm).as_slice().to_vec());
            let lambda = self.lambda;
            let state = self
                .state
                .arms
                .entry(key.clone())
                .or_insert_with(|| ArmLinearState::fresh(lambda));
            let inv = inverse_or_reinit(state, lambda, &key);
            let mu = inv.dot(&state.response());
            let theta = self.sample_theta(&inv, &mu);
            scores.insert(key, x.dot(&theta));
        }
        scores
    }

    fn update(&mut self, arm: &Arm, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        let x = encode_arm(arm);
        let lambda = self.lambda;
        self.state
            .arms
            .entry(arm.key())
            .or_insert_with(|| ArmLinearState::fresh(lambda))
            .rank_one_update(x.as_slice(), reward);
    }

    fn snapshot(&self) -> NudgeResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.state)?)
    }
}
