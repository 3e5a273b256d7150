//! Auxiliary scoring signals blended into the decision.
//!
//! Each provider turns recent history or collaborator data into a
//! per-candidate score in [0, 1], and degrades to a rank-neutral
//! contribution when untrained or unconfigured. The blending scorer
//! owns the weights; nothing here gates a send on its own.

pub mod content;
pub mod empirical;
pub mod segments;
pub mod sequence;
pub mod similarity;
pub mod windows;

pub use content::{ContentItem, ContentSource, StaticContent, DEFAULT_TEXT};
pub use empirical::EmpiricalRates;
pub use segments::{SegmentBias, SegmentSource, StaticSegments};
pub use sequence::SequenceModel;
pub use similarity::{context_line, SimilarityScorer};
pub use windows::{check_window, DeliveryWindowSource, StaticWindows, WindowCheck};

use std::collections::BTreeMap;

/// Rescale candidate scores to [0, 1]. A flat map is left untouched so
/// equal raw scores stay equal instead of collapsing to zero.
pub(crate) fn min_max_rescale(scores: &mut BTreeMap<String, f64>) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for v in scores.values() {
        lo = lo.min(*v);
        hi = hi.max(*v);
    }
    if hi > lo {
        for v in scores.values_mut() {
            *v = (*v - lo) / (hi - lo);
        }
    }
}
