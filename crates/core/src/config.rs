//! Engine configuration. Loaded from environment variables with the
//! prefix `NUDGE_ENGINE__` in the same shape it deserializes from files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Category, Channel, Tone};

/// Identifies one of the built-in bandit strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanditKind {
    Beta,
    Logistic,
    #[serde(rename = "linucb")]
    LinUcb,
    Thompson,
}

impl BanditKind {
    pub const ALL: [BanditKind; 4] = [
        BanditKind::Beta,
        BanditKind::Logistic,
        BanditKind::LinUcb,
        BanditKind::Thompson,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BanditKind::Beta => "beta",
            BanditKind::Logistic => "logistic",
            BanditKind::LinUcb => "linucb",
            BanditKind::Thompson => "thompson",
        }
    }
}

impl std::fmt::Display for BanditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How uplift is estimated from joined exposure/outcome rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpliftMethod {
    /// Beta-smoothed treatment rate minus control rate.
    Difference,
    /// Transformed-outcome mean with known treatment propensity.
    TransformedOutcome,
}

/// Aggregation key for the empirical-rate signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmpiricalLevel {
    /// Full `daypart|tone|channel|category` arm key.
    Arm,
    /// Coarser `category|tone|channel` pooling.
    CategoryToneChannel,
}

/// Prior used when the sequence model has no qualifying context row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPrior {
    Uniform,
    /// All-time category frequency from the event log.
    Frequency,
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub bandit: BanditConfig,
    #[serde(default)]
    pub uplift: UpliftConfig,
    #[serde(default)]
    pub blend: BlendConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub windows: WindowsConfig,
    #[serde(default)]
    pub content: ContentConfig,
}

/// Send budget, cooldowns, quiet hours and the candidate grid.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_budget_per_day")]
    pub budget_per_day: u32,
    /// Per-category minimum spacing between sends, in seconds.
    #[serde(default = "default_cooldown_s")]
    pub cooldown_s: BTreeMap<Category, u64>,
    /// `"HH:MM-HH:MM"` spans; an end before the start wraps midnight.
    #[serde(default = "default_quiet_hours")]
    pub quiet_hours: Vec<String>,
    #[serde(default = "default_send_threshold")]
    pub send_threshold: f64,
    #[serde(default = "default_grid_tones")]
    pub grid_tones: Vec<Tone>,
    #[serde(default = "default_grid_channels")]
    pub grid_channels: Vec<Channel>,
}

/// Negative-streak escalation policy.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_negatives_to_escalate")]
    pub negatives_to_escalate: u32,
    /// How long a triggered escalation mutes a category, in seconds.
    #[serde(default = "default_escalate_duration_s")]
    pub escalate_duration_s: u64,
    /// A negative older than this no longer extends the streak.
    #[serde(default = "default_negative_decay_s")]
    pub negative_decay_s: u64,
}

/// Strategy selection and per-strategy numeric knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct BanditConfig {
    #[serde(default = "default_strategy")]
    pub strategy: BanditKind,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Logistic weights are clamped to `[-weight_clamp, weight_clamp]`.
    #[serde(default = "default_weight_clamp")]
    pub weight_clamp: f64,
    #[serde(default = "default_linucb_alpha")]
    pub linucb_alpha: f64,
    /// Ridge prior shared by the two linear strategies.
    #[serde(default = "default_ridge_lambda")]
    pub ridge_lambda: f64,
    #[serde(default = "default_thompson_v")]
    pub thompson_v: f64,
    /// RNG seed; decisions are reproducible for a fixed seed and state.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Uplift gating and offline training parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct UpliftConfig {
    /// Estimate returned when no trained cell covers an arm.
    #[serde(default = "default_default_uplift")]
    pub default_uplift: f64,
    #[serde(default = "default_tau")]
    pub tau: f64,
    #[serde(default)]
    pub tau_by_category: BTreeMap<Category, f64>,
    #[serde(default = "default_uplift_method")]
    pub method: UpliftMethod,
    #[serde(default = "default_uplift_alpha")]
    pub alpha: f64,
    #[serde(default = "default_uplift_beta")]
    pub beta: f64,
    /// Cells with fewer joined rows than this are not emitted.
    #[serde(default = "default_min_cell")]
    pub min_cell: usize,
    #[serde(default = "default_holdout_rate")]
    pub holdout_rate: f64,
    /// Exposure-to-outcome join window, in seconds.
    #[serde(default = "default_join_window_s")]
    pub join_window_s: i64,
    #[serde(default)]
    pub join_window_by_category: BTreeMap<Category, i64>,
}

/// Signal weights and bonuses for the blending scorer.
#[derive(Debug, Clone, Deserialize)]
pub struct BlendConfig {
    #[serde(default = "default_w_propensity")]
    pub w_propensity: f64,
    #[serde(default = "default_w_empirical")]
    pub w_empirical: f64,
    #[serde(default = "default_w_uplift")]
    pub w_uplift: f64,
    #[serde(default = "default_w_similarity")]
    pub w_similarity: f64,
    #[serde(default = "default_w_sequence")]
    pub w_sequence: f64,
    #[serde(default = "default_window_bonus")]
    pub window_bonus: f64,
    /// Added once per matched preference axis (tone, channel).
    #[serde(default = "default_preference_bonus")]
    pub preference_bonus: f64,
    /// Candidates with propensity below this floor never win.
    #[serde(default = "default_min_propensity")]
    pub min_propensity: f64,
    /// Apply the send threshold as a hard gate during scoring.
    #[serde(default = "default_use_threshold")]
    pub use_threshold: bool,
    #[serde(default = "default_explain_top")]
    pub explain_top: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalsConfig {
    #[serde(default)]
    pub empirical: EmpiricalConfig,
    #[serde(default)]
    pub sequence: SequenceConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
}

/// Recency-decayed empirical response rate.
#[derive(Debug, Clone, Deserialize)]
pub struct EmpiricalConfig {
    #[serde(default = "default_signal_window_days")]
    pub window_days: i64,
    #[serde(default = "default_signal_half_life_days")]
    pub half_life_days: f64,
    #[serde(default = "default_empirical_alpha")]
    pub alpha: f64,
    #[serde(default = "default_empirical_beta")]
    pub beta: f64,
    /// Minimum decayed event mass before the rate is trusted.
    #[serde(default = "default_empirical_min_events")]
    pub min_events: f64,
    #[serde(default = "default_empirical_level")]
    pub level: EmpiricalLevel,
}

/// Markov category predictor.
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceConfig {
    #[serde(default = "default_sequence_order")]
    pub order: usize,
    #[serde(default = "default_signal_window_days")]
    pub window_days: i64,
    #[serde(default = "default_signal_half_life_days")]
    pub half_life_days: f64,
    /// Minimum decayed row mass before a context row is used.
    #[serde(default = "default_sequence_min_events")]
    pub min_events: f64,
    #[serde(default = "default_add_alpha")]
    pub add_alpha: f64,
    /// Interpolation weight given to each lower order mixed in.
    #[serde(default = "default_sequence_backoff")]
    pub backoff: f64,
    #[serde(default = "default_fallback_prior")]
    pub fallback: FallbackPrior,
}

/// Hashed n-gram text embedder.
#[derive(Debug, Clone, Deserialize)]
pub struct SimilarityConfig {
    #[serde(default = "default_ngram")]
    pub ngram: usize,
    #[serde(default = "default_embed_dim")]
    pub dim: usize,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

/// Allowed local send hours per category.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowsConfig {
    #[serde(default)]
    pub hours_by_category: BTreeMap<Category, Vec<u32>>,
    /// Treat being outside every window as a hard block instead of a
    /// missing bonus. A category with no configured hours is never
    /// blocked.
    #[serde(default)]
    pub enforce: bool,
}

/// Built-in nudge copy, keyed by category then tone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentConfig {
    #[serde(default)]
    pub templates: BTreeMap<Category, BTreeMap<Tone, Vec<String>>>,
}

fn default_budget_per_day() -> u32 {
    6
}

fn default_cooldown_s() -> BTreeMap<Category, u64> {
    BTreeMap::from([
        (Category::Hydration, 90 * 60),
        (Category::Posture, 120 * 60),
        (Category::Movement, 60 * 60),
        (Category::Focus, 60 * 60),
        (Category::Sleep, 180 * 60),
    ])
}

fn default_quiet_hours() -> Vec<String> {
    vec!["22:00-07:00".to_string()]
}

fn default_send_threshold() -> f64 {
    0.28
}

fn default_grid_tones() -> Vec<Tone> {
    Tone::ALL.to_vec()
}

fn default_grid_channels() -> Vec<Channel> {
    Channel::ALL.to_vec()
}

fn default_negatives_to_escalate() -> u32 {
    3
}

fn default_escalate_duration_s() -> u64 {
    6 * 3600
}

fn default_negative_decay_s() -> u64 {
    24 * 3600
}

fn default_strategy() -> BanditKind {
    BanditKind::Beta
}

fn default_epsilon() -> f64 {
    0.10
}

fn default_learning_rate() -> f64 {
    0.10
}

fn default_weight_clamp() -> f64 {
    8.0
}

fn default_linucb_alpha() -> f64 {
    1.0
}

fn default_ridge_lambda() -> f64 {
    1.0
}

fn default_thompson_v() -> f64 {
    0.1
}

fn default_seed() -> u64 {
    0
}

fn default_default_uplift() -> f64 {
    0.01
}

fn default_tau() -> f64 {
    0.01
}

fn default_uplift_method() -> UpliftMethod {
    UpliftMethod::TransformedOutcome
}

fn default_uplift_alpha() -> f64 {
    1.0
}

fn default_uplift_beta() -> f64 {
    1.0
}

fn default_min_cell() -> usize {
    20
}

fn default_holdout_rate() -> f64 {
    0.10
}

fn default_join_window_s() -> i64 {
    1800
}

fn default_w_propensity() -> f64 {
    0.60
}

fn default_w_empirical() -> f64 {
    0.25
}

fn default_w_uplift() -> f64 {
    0.15
}

fn default_w_similarity() -> f64 {
    0.10
}

fn default_w_sequence() -> f64 {
    0.10
}

fn default_window_bonus() -> f64 {
    0.03
}

fn default_preference_bonus() -> f64 {
    0.02
}

fn default_min_propensity() -> f64 {
    0.05
}

fn default_use_threshold() -> bool {
    true
}

fn default_explain_top() -> usize {
    3
}

fn default_signal_window_days() -> i64 {
    45
}

fn default_signal_half_life_days() -> f64 {
    14.0
}

fn default_empirical_alpha() -> f64 {
    1.0
}

fn default_empirical_beta() -> f64 {
    3.0
}

fn default_empirical_min_events() -> f64 {
    12.0
}

fn default_empirical_level() -> EmpiricalLevel {
    EmpiricalLevel::Arm
}

fn default_sequence_order() -> usize {
    3
}

fn default_sequence_min_events() -> f64 {
    20.0
}

fn default_add_alpha() -> f64 {
    0.5
}

fn default_sequence_backoff() -> f64 {
    0.4
}

fn default_fallback_prior() -> FallbackPrior {
    FallbackPrior::Uniform
}

fn default_ngram() -> usize {
    3
}

fn default_embed_dim() -> usize {
    512
}

fn default_normalize() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            budget_per_day: default_budget_per_day(),
            cooldown_s: default_cooldown_s(),
            quiet_hours: default_quiet_hours(),
            send_threshold: default_send_threshold(),
            grid_tones: default_grid_tones(),
            grid_channels: default_grid_channels(),
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            negatives_to_escalate: default_negatives_to_escalate(),
            escalate_duration_s: default_escalate_duration_s(),
            negative_decay_s: default_negative_decay_s(),
        }
    }
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            epsilon: default_epsilon(),
            learning_rate: default_learning_rate(),
            weight_clamp: default_weight_clamp(),
            linucb_alpha: default_linucb_alpha(),
            ridge_lambda: default_ridge_lambda(),
            thompson_v: default_thompson_v(),
            seed: default_seed(),
        }
    }
}

impl Default for UpliftConfig {
    fn default() -> Self {
        Self {
            default_uplift: default_default_uplift(),
            tau: default_tau(),
            tau_by_category: BTreeMap::new(),
            method: default_uplift_method(),
            alpha: default_uplift_alpha(),
            beta: default_uplift_beta(),
            min_cell: default_min_cell(),
            holdout_rate: default_holdout_rate(),
            join_window_s: default_join_window_s(),
            join_window_by_category: BTreeMap::new(),
        }
    }
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            w_propensity: default_w_propensity(),
            w_empirical: default_w_empirical(),
            w_uplift: default_w_uplift(),
            w_similarity: default_w_similarity(),
            w_sequence: default_w_sequence(),
            window_bonus: default_window_bonus(),
            preference_bonus: default_preference_bonus(),
            min_propensity: default_min_propensity(),
            use_threshold: default_use_threshold(),
            explain_top: default_explain_top(),
        }
    }
}

impl Default for EmpiricalConfig {
    fn default() -> Self {
        Self {
            window_days: default_signal_window_days(),
            half_life_days: default_signal_half_life_days(),
            alpha: default_empirical_alpha(),
            beta: default_empirical_beta(),
            min_events: default_empirical_min_events(),
            level: default_empirical_level(),
        }
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            order: default_sequence_order(),
            window_days: default_signal_window_days(),
            half_life_days: default_signal_half_life_days(),
            min_events: default_sequence_min_events(),
            add_alpha: default_add_alpha(),
            backoff: default_sequence_backoff(),
            fallback: default_fallback_prior(),
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            ngram: default_ngram(),
            dim: default_embed_dim(),
            normalize: default_normalize(),
        }
    }
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            hours_by_category: BTreeMap::new(),
            enforce: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("NUDGE_ENGINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Tau for a category, falling back to the global default.
    pub fn tau_for(&self, category: Category) -> f64 {
        self.uplift
            .tau_by_category
            .get(&category)
            .copied()
            .unwrap_or(self.uplift.tau)
    }

    /// Join window for a category, falling back to the global default.
    pub fn join_window_for(&self, category: Category) -> i64 {
        self.uplift
            .join_window_by_category
            .get(&category)
            .copied()
            .unwrap_or(self.uplift.join_window_s)
    }

    /// Cooldown for a category in seconds; absent means no cooldown.
    pub fn cooldown_for(&self, category: Category) -> Option<u64> {
        self.policy.cooldown_s.get(&category).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.policy.budget_per_day, 6);
        assert_eq!(cfg.policy.send_threshold, 0.28);
        assert_eq!(cfg.policy.cooldown_s[&Category::Hydration], 5400);
        assert_eq!(cfg.policy.cooldown_s[&Category::Sleep], 10800);
        assert_eq!(cfg.feedback.negatives_to_escalate, 3);
        assert_eq!(cfg.bandit.strategy, BanditKind::Beta);
        assert_eq!(cfg.uplift.min_cell, 20);
        assert_eq!(cfg.blend.explain_top, 3);
        assert!(cfg.windows.hours_by_category.is_empty());
        assert!(!cfg.windows.enforce);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{"policy": {"budget_per_day": 2}, "bandit": {"strategy": "linucb"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.policy.budget_per_day, 2);
        assert_eq!(cfg.policy.send_threshold, 0.28);
        assert_eq!(cfg.bandit.strategy, BanditKind::LinUcb);
        assert_eq!(cfg.bandit.epsilon, 0.10);
    }

    #[test]
    fn test_tau_per_category_override() {
        let mut cfg = EngineConfig::default();
        cfg.uplift.tau_by_category.insert(Category::Sleep, 0.05);
        assert_eq!(cfg.tau_for(Category::Sleep), 0.05);
        assert_eq!(cfg.tau_for(Category::Focus), 0.01);
    }

    #[test]
    fn test_bandit_kind_round_trip() {
        for kind in BanditKind::ALL {
            let s = serde_json::to_string(&kind).unwrap();
            let back: BanditKind = serde_json::from_str(&s).unwrap();
            assert_eq!(back, kind);
        }
        assert_eq!(serde_json::to_string(&BanditKind::LinUcb).unwrap(), "\"linucb\"");
    }
}
