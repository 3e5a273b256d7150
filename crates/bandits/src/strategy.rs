//! Strategy trait and the set used for feedback fan-out.

use std::collections::BTreeMap;

use nudge_core::config::{BanditConfig, BanditKind};
use nudge_core::{Arm, NudgeResult};

use crate::beta::BetaBandit;
use crate::linear::{LinUcbBandit, ThompsonLinearBandit};
use crate::logistic::LogisticBandit;

/// Common contract for arm-selection strategies.
///
/// Rewards are continuous in `[0, 1]`; implementations clamp. Fractional
/// rewards are meaningful (a shrugged-at nudge can earn 0.5).
pub trait BanditStrategy: Send {
    fn kind(&self) -> BanditKind;

    /// One score per candidate key. Thompson-style strategies sample,
    /// so repeated calls differ; deterministic strategies do not.
    fn scores(&mut self, candidates: &[Arm]) -> BTreeMap<String, f64>;

    /// Highest-scoring candidate, ties broken by lexicographic arm key.
    /// `None` when `candidates` is empty.
    fn select(&mut self, candidates: &[Arm]) -> Option<Arm> {
        let scores = self.scores(candidates);
        pick_by_scores(candidates, &scores)
    }

    fn update(&mut self, arm: &Arm, reward: f64);

    /// Serialized state for persistence.
    fn snapshot(&self) -> NudgeResult<serde_json::Value>;
}

/// Argmax over the score map with the documented lexicographic
/// tie-break: among equal scores the smallest arm key wins.
pub(crate) fn pick_by_scores(candidates: &[Arm], scores: &BTreeMap<String, f64>) -> Option<Arm> {
    let mut best: Option<(&str, f64)> = None;
    for (key, &score) in scores {
        match best {
            Some((_, s)) if score <= s => {}
            _ => best = Some((key, score)),
        }
    }
    let (best_key, _) = best?;
    candidates.iter().copied().find(|a| a.key() == best_key)
}

/// Persistence blob name for a strategy.
pub fn bandit_blob_name(kind: BanditKind) -> String {
    format!("bandit_{kind}")
}

/// All four strategies together. Feedback fans out to every member so
/// switching the active strategy never starts from scratch.
pub struct BanditSet {
    beta: BetaBandit,
    logistic: LogisticBandit,
    linucb: LinUcbBandit,
    thompson: ThompsonLinearBandit,
}

impl BanditSet {
    /// Fresh priors everywhere.
    pub fn new(cfg: &BanditConfig) -> Self {
        Self {
            beta: BetaBandit::new(cfg.seed),
            logistic: LogisticBandit::new(cfg.learning_rate, cfg.epsilon, cfg.weight_clamp, cfg.seed),
            linucb: LinUcbBandit::new(cfg.linucb_alpha, cfg.ridge_lambda),
            thompson: ThompsonLinearBandit::new(cfg.thompson_v, cfg.ridge_lambda, cfg.seed),
        }
    }

    /// Rebuild from persisted blobs. `load` returns the blob for a
    /// strategy or `None`; missing and unreadable blobs fall back to
    /// fresh priors.
    pub fn restore(
        cfg: &BanditConfig,
        mut load: impl FnMut(BanditKind) -> Option<serde_json::Value>,
    ) -> Self {
        let mut set = Self::new(cfg);
        if let Some(blob) = load(BanditKind::Beta) {
            set.beta.restore(blob);
        }
        if let Some(blob) = load(BanditKind::Logistic) {
            set.logistic.restore(blob);
        }
        if let Some(blob) = load(BanditKind::LinUcb) {
            set.linucb.restore(blob);
        }
        if let Some(blob) = load(BanditKind::Thompson) {
            set.thompson.restore(blob);
        }
        set
    }

    pub fn strategy_mut(&mut self, kind: BanditKind) -> &mut dyn BanditStrategy {
        match kind {
            BanditKind::Beta => &mut self.beta,
            BanditKind::Logistic => &mut self.logistic,
            BanditKind::LinUcb => &mut self.linucb,
            BanditKind::Thompson => &mut self.thompson,
        }
    }

    pub fn strategy(&self, kind: BanditKind) -> &dyn BanditStrategy {
        match kind {
            BanditKind::Beta => &self.beta,
            BanditKind::Logistic => &self.logistic,
            BanditKind::LinUcb => &self.linucb,
            BanditKind::Thompson => &self.thompson,
        }
    }

    /// Apply one observed reward to every strategy.
    pub fn update_all(&mut self, arm: &Arm, reward: f64) {
        self.beta.update(arm, reward);
        self.logistic.update(arm, reward);
        self.linucb.update(arm, reward);
        self.thompson.update(arm, reward);
    }

    pub fn beta(&self) -> &BetaBandit {
        &self.beta
    }

    pub fn logistic(&self) -> &LogisticBandit {
        &self.logistic
    }

    pub fn linucb(&self) -> &LinUcbBandit {
        &self.linucb
    }

    pub fn linucb_mut(&mut self) -> &mut LinUcbBandit {
        &mut self.linucb
    }
}
