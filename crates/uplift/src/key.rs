//! Structured backoff keys for uplift cells.

use std::fmt;

use nudge_core::{Arm, Category, Channel, Daypart, Tone};

/// One uplift cell: an arm context where each axis is concrete or a
/// wildcard. Axis order is `category|daypart|tone|channel`, so
/// generalizing drops channel first and keeps category until the
/// global fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CellKey {
    pub category: Option<Category>,
    pub daypart: Option<Daypart>,
    pub tone: Option<Tone>,
    pub channel: Option<Channel>,
}

impl CellKey {
    pub fn from_arm(arm: &Arm) -> Self {
        Self {
            category: Some(arm.category),
            daypart: Some(arm.daypart),
            tone: Some(arm.tone),
            channel: Some(arm.channel),
        }
    }

    pub const GLOBAL: CellKey = CellKey {
        category: None,
        daypart: None,
        tone: None,
        channel: None,
    };

    /// Keep the first `keep` axes concrete, wildcard the rest.
    fn masked(&self, keep: usize) -> Self {
        Self {
            category: if keep >= 1 { self.category } else { None },
            daypart: if keep >= 2 { self.daypart } else { None },
            tone: if keep >= 3 { self.tone } else { None },
            channel: if keep >= 4 { self.channel } else { None },
        }
    }

    /// Backoff chain from most to least specific: the key itself, then
    /// channel, tone and daypart wildcarded in turn, ending global.
    pub fn generalizations(&self) -> impl Iterator<Item = CellKey> {
        let key = *self;
        (0..=4).rev().map(move |keep| key.masked(keep))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.category.map_or("*", |c| c.as_str()),
            self.daypart.map_or("*", |d| d.as_str()),
            self.tone.map_or("*", |t| t.as_str()),
            self.channel.map_or("*", |c| c.as_str()),
        )
    }
}
