//! Segment preference bias consumed from the personalization layer.

use nudge_core::{Channel, Tone};
use serde::{Deserialize, Serialize};

/// What the current user segment prefers. `tone_pref` and
/// `channel_pref` are ordered best-first; only the head earns the
/// blend bonus. `threshold_delta` shifts the send threshold for the
/// whole decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentBias {
    pub segment: String,
    pub tone_pref: Vec<Tone>,
    pub channel_pref: Vec<Channel>,
    pub threshold_delta: f64,
}

impl Default for SegmentBias {
    fn default() -> Self {
        Self {
            segment: "baseline".to_string(),
            tone_pref: vec![Tone::Gentle, Tone::Humor, Tone::Strict],
            channel_pref: vec![Channel::Push, Channel::InApp],
            threshold_delta: 0.0,
        }
    }
}

/// Provider of the active segment bias. Segmentation itself (feature
/// extraction, clustering) is an external concern.
pub trait SegmentSource: Send + Sync {
    fn current_bias(&self) -> SegmentBias;
}

/// Fixed-bias source; the baseline variant is the engine default.
pub struct StaticSegments {
    bias: SegmentBias,
}

impl StaticSegments {
    pub fn new(bias: SegmentBias) -> Self {
        Self { bias }
    }

    pub fn baseline() -> Self {
        Self::new(SegmentBias::default())
    }
}

impl SegmentSource for StaticSegments {
    fn current_bias(&self) -> SegmentBias {
        self.bias.clone()
    }
}
