//! One-hot context encoding shared by every parametric learner.
//!
//! Layout is fixed: index 0 is a bias term, then daypart, tone,
//! channel and category indicator blocks in that order. All learner
//! state is persisted against this layout, so the order must never
//! change.

use crate::types::{Arm, ArmAxes, Category, Channel, Daypart, Tone};

pub const FEATURE_DIM: usize = 15;

pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "bias",
    "daypart_morning",
    "daypart_midday",
    "daypart_afternoon",
    "daypart_evening",
    "tone_gentle",
    "tone_humor",
    "tone_strict",
    "channel_push",
    "channel_in_app",
    "category_hydration",
    "category_posture",
    "category_movement",
    "category_focus",
    "category_sleep",
];

const DAYPART_BASE: usize = 1;
const TONE_BASE: usize = 5;
const CHANNEL_BASE: usize = 8;
const CATEGORY_BASE: usize = 10;

fn daypart_index(d: Daypart) -> usize {
    DAYPART_BASE
        + match d {
            Daypart::Morning => 0,
            Daypart::Midday => 1,
            Daypart::Afternoon => 2,
            Daypart::Evening => 3,
        }
}

fn tone_index(t: Tone) -> usize {
    TONE_BASE
        + match t {
            Tone::Gentle => 0,
            Tone::Humor => 1,
            Tone::Strict => 2,
        }
}

fn channel_index(c: Channel) -> usize {
    CHANNEL_BASE
        + match c {
            Channel::Push => 0,
            Channel::InApp => 1,
        }
}

fn category_index(c: Category) -> usize {
    CATEGORY_BASE
        + match c {
            Category::Hydration => 0,
            Category::Posture => 1,
            Category::Movement => 2,
            Category::Focus => 3,
            Category::Sleep => 4,
        }
}

/// Dense 15-dimensional context vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector([f64; FEATURE_DIM]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn dot(&self, weights: &[f64]) -> f64 {
        self.0
            .iter()
            .zip(weights.iter())
            .map(|(x, w)| x * w)
            .sum()
    }

    pub fn nonzero_count(&self) -> usize {
        self.0.iter().filter(|v| **v != 0.0).count()
    }
}

impl std::ops::Index<usize> for FeatureVector {
    type Output = f64;

    fn index(&self, idx: usize) -> &f64 {
        &self.0[idx]
    }
}

/// Encode a lossy axis view. Axes that failed to parse contribute no
/// indicator, leaving only the bias and the recognized blocks set.
pub fn encode_axes(axes: &ArmAxes) -> FeatureVector {
    let mut v = [0.0; FEATURE_DIM];
    v[0] = 1.0;
    if let Some(d) = axes.daypart {
        v[daypart_index(d)] = 1.0;
    }
    if let Some(t) = axes.tone {
        v[tone_index(t)] = 1.0;
    }
    if let Some(c) = axes.channel {
        v[channel_index(c)] = 1.0;
    }
    if let Some(c) = axes.category {
        v[category_index(c)] = 1.0;
    }
    FeatureVector(v)
}

/// Encode a fully specified arm. Always sets exactly five entries.
pub fn encode_arm(arm: &Arm) -> FeatureVector {
    encode_axes(&ArmAxes::from(arm))
}

/// Encode an arm key without requiring it to parse fully.
pub fn encode_key(key: &str) -> FeatureVector {
    encode_axes(&ArmAxes::parse(key))
}
