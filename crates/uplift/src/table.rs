//! Trained uplift estimates keyed by context cell.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nudge_core::Arm;
use serde::{Deserialize, Serialize};

use crate::key::CellKey;

/// Blob name the engine persists the trained table under.
pub const UPLIFT_BLOB: &str = "uplift";

fn default_estimate() -> f64 {
    0.01
}

/// Output of the offline trainer. `uplift` maps serialized cell keys
/// (`"cat|dp|tone|ch"`, wildcards as `*`) to estimated effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpliftTable {
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    /// Estimate when no trained cell covers an arm.
    #[serde(default = "default_estimate")]
    pub default: f64,
    #[serde(default)]
    pub uplift: BTreeMap<String, f64>,
}

impl UpliftTable {
    pub fn new(default: f64) -> Self {
        Self {
            generated_at: None,
            default,
            uplift: BTreeMap::new(),
        }
    }

    /// Walk the backoff chain to the first trained cell, else the
    /// table default.
    pub fn estimate(&self, arm: &Arm) -> f64 {
        CellKey::from_arm(arm)
            .generalizations()
            .find_map(|key| self.uplift.get(&key.to_string()).copied())
            .unwrap_or(self.default)
    }

    /// Does sending this arm clear the minimum-effect bar?
    pub fn gate(&self, arm: &Arm, tau: f64) -> bool {
        self.estimate(arm) >= tau
    }

    pub fn len(&self) -> usize {
        self.uplift.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uplift.is_empty()
    }
}

impl Default for UpliftTable {
    fn default() -> Self {
        Self::new(default_estimate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_core::{Category, Channel, Daypart, Tone};

    fn arm() -> Arm {
        Arm::new(
            Daypart::Morning,
            Tone::Gentle,
            Channel::Push,
            Category::Hydration,
        )
    }

    #[test]
    fn test_full_cell_preferred_over_backoff() {
        let mut table = UpliftTable::new(0.01);
        table
            .uplift
            .insert("hydration|morning|gentle|push".to_string(), 0.05);
        table.uplift.insert("hydration|*|*|*".to_string(), 0.02);
        assert_eq!(table.estimate(&arm()), 0.05);
    }

    #[test]
    fn test_backoff_reaches_category_cell() {
        let mut table = UpliftTable::new(0.01);
        table.uplift.insert("hydration|*|*|*".to_string(), 0.03);
        assert_eq!(table.estimate(&arm()), 0.03);
    }

    #[test]
    fn test_untrained_table_uses_default() {
        let table = UpliftTable::new(0.01);
        assert_eq!(table.estimate(&arm()), 0.01);
    }

    #[test]
    fn test_gate_against_tau() {
        let mut table = UpliftTable::new(0.01);
        table.uplift.insert("hydration|*|*|*".to_string(), 0.02);
        assert!(table.gate(&arm(), 0.01));
        assert!(table.gate(&arm(), 0.02));

        table.uplift.insert("hydration|*|*|*".to_string(), 0.005);
        assert!(!table.gate(&arm(), 0.01));
    }

    #[test]
    fn test_blob_roundtrip() {
        let mut table = UpliftTable::new(0.01);
        table.generated_at = Some(Utc::now());
        table.uplift.insert("*|*|*|*".to_string(), -0.004);

        let blob = serde_json::to_string(&table).unwrap();
        let restored: UpliftTable = serde_json::from_str(&blob).unwrap();
        assert_eq!(restored.uplift, table.uplift);
        assert_eq!(restored.default, 0.01);
    }
}
