//! Quiet-hour spans with midnight wraparound.

use chrono::NaiveTime;
use tracing::warn;

/// Parsed `"HH:MM-HH:MM"` spans. A span whose end precedes its start
/// wraps midnight, so `22:00-07:00` covers late evening and early
/// morning. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuietSpans {
    spans: Vec<(NaiveTime, NaiveTime)>,
}

impl QuietSpans {
    /// Parse configured spans, skipping any that do not parse.
    pub fn parse(raw: &[String]) -> Self {
        let mut spans = Vec::new();
        for entry in raw {
            match parse_span(entry) {
                Some(span) => spans.push(span),
                None => warn!(span = %entry, "ignoring malformed quiet-hours span"),
            }
        }
        Self { spans }
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.spans.iter().any(|&(start, end)| {
            if start <= end {
                t >= start && t <= end
            } else {
                t >= start || t <= end
            }
        })
    }
}

fn parse_span(entry: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start, end) = entry.split_once('-')?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
    Some((start, end))
}
