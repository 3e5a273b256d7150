//! Offline trainer joining exposures to outcomes per context cell.

use std::collections::BTreeMap;

use chrono::Utc;
use nudge_core::config::{UpliftConfig, UpliftMethod};
use nudge_core::{Category, ExposureRecord, NudgeEvent, PassiveActionRecord};
use tracing::info;

use crate::key::CellKey;
use crate::table::UpliftTable;

/// Clamp on the assumed treatment propensity to keep the transformed
/// outcome finite at degenerate holdout rates.
const PROPENSITY_CLAMP: f64 = 1e-3;

/// Joined rows accumulated for one cell.
#[derive(Debug, Default, Clone, Copy)]
struct CellStats {
    rows: usize,
    treated: usize,
    treated_pos: usize,
    control: usize,
    control_pos: usize,
}

impl CellStats {
    fn push(&mut self, treated: bool, outcome: bool) {
        self.rows += 1;
        if treated {
            self.treated += 1;
            self.treated_pos += outcome as usize;
        } else {
            self.control += 1;
            self.control_pos += outcome as usize;
        }
    }

    /// Beta-smoothed treatment rate minus control rate.
    fn difference(&self, alpha: f64, beta: f64) -> f64 {
        let treated = (self.treated_pos as f64 + alpha) / (self.treated as f64 + alpha + beta);
        let control = (self.control_pos as f64 + alpha) / (self.control as f64 + alpha + beta);
        treated - control
    }

    /// Mean transformed outcome under a known treatment propensity.
    fn transformed_outcome(&self, p_treat: f64) -> f64 {
        let sum = self.treated_pos as f64 / p_treat - self.control_pos as f64 / (1.0 - p_treat);
        sum / self.rows as f64
    }
}

/// Fits an [`UpliftTable`] from the exposure log, the event log and
/// the passive-action log. Every exposure row contributes to all five
/// cells of its backoff chain; cells with too few rows are dropped.
#[derive(Debug, Clone)]
pub struct UpliftTrainer {
    cfg: UpliftConfig,
}

impl UpliftTrainer {
    pub fn new(cfg: &UpliftConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    pub fn train(
        &self,
        exposures: &[ExposureRecord],
        events: &[NudgeEvent],
        passives: &[PassiveActionRecord],
    ) -> UpliftTable {
        let feedback = index_feedback(events);
        let actions = index_passives(passives);

        let mut cells: BTreeMap<String, CellStats> = BTreeMap::new();
        for row in exposures {
            let window = self.join_window_for(row.category);
            // A treated row converts when any explicit feedback lands
            // on the same arm inside the window; a control row when a
            // passive action of the category does.
            let outcome = if row.treatment {
                any_in_window(feedback.get(row.arm.as_str()), row.ts, window)
            } else {
                any_in_window(actions.get(&row.category), row.ts, window)
            };
            let key = CellKey {
                category: Some(row.category),
                daypart: Some(row.daypart),
                tone: Some(row.tone),
                channel: Some(row.channel),
            };
            for cell in key.generalizations() {
                cells
                    .entry(cell.to_string())
                    .or_default()
                    .push(row.treatment, outcome);
            }
        }

        let p_treat = (1.0 - self.cfg.holdout_rate).clamp(PROPENSITY_CLAMP, 1.0 - PROPENSITY_CLAMP);
        let mut table = UpliftTable::new(self.cfg.default_uplift);
        table.generated_at = Some(Utc::now());
        for (cell, stats) in cells {
            if stats.rows < self.cfg.min_cell {
                continue;
            }
            let estimate = match self.cfg.method {
                UpliftMethod::Difference => stats.difference(self.cfg.alpha, self.cfg.beta),
                UpliftMethod::TransformedOutcome => stats.transformed_outcome(p_treat),
            };
            table.uplift.insert(cell, round4(estimate));
        }
        info!(
            exposures = exposures.len(),
            cells = table.len(),
            method = ?self.cfg.method,
            "trained uplift table"
        );
        table
    }

    fn join_window_for(&self, category: Category) -> i64 {
        self.cfg
            .join_window_by_category
            .get(&category)
            .copied()
            .unwrap_or(self.cfg.join_window_s)
    }
}

/// Feedback timestamps per arm key. Presence is what matters for the
/// join, not the reward value.
fn index_feedback(events: &[NudgeEvent]) -> BTreeMap<&str, Vec<i64>> {
    let mut map: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    for event in events {
        if event.reward.is_some() {
            map.entry(event.arm.as_str()).or_default().push(event.ts);
        }
    }
    map
}

fn index_passives(passives: &[PassiveActionRecord]) -> BTreeMap<Category, Vec<i64>> {
    let mut map: BTreeMap<Category, Vec<i64>> = BTreeMap::new();
    for action in passives {
        map.entry(action.category).or_default().push(action.ts);
    }
    map
}

fn any_in_window(stamps: Option<&Vec<i64>>, start: i64, window: i64) -> bool {
    stamps.map_or(false, |list| {
        list.iter().any(|&ts| ts >= start && ts <= start + window)
    })
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_core::{Arm, Channel, Daypart, Tone};

    fn arm() -> Arm {
        Arm::new(
            Daypart::Morning,
            Tone::Gentle,
            Channel::Push,
            Category::Hydration,
        )
    }

    fn exposure(ts: i64, treatment: bool) -> ExposureRecord {
        let reason = if treatment { "send" } else { "low_uplift" };
        ExposureRecord::new(ts, &arm(), treatment, 0.5, reason)
    }

    fn cfg(method: UpliftMethod, min_cell: usize) -> UpliftConfig {
        let mut cfg = UpliftConfig::default();
        cfg.method = method;
        cfg.min_cell = min_cell;
        cfg
    }

    /// Two of four treated rows convert, one of four control rows.
    fn mixed_history() -> (Vec<ExposureRecord>, Vec<NudgeEvent>, Vec<PassiveActionRecord>) {
        let exposures = vec![
            exposure(0, true),
            exposure(100, true),
            exposure(200, true),
            exposure(300, true),
            exposure(0, false),
            exposure(100, false),
            exposure(200, false),
            exposure(300, false),
        ];
        let events = vec![
            NudgeEvent::outcome(10, arm().key(), 1.0),
            NudgeEvent::outcome(110, arm().key(), 1.0),
        ];
        let passives = vec![PassiveActionRecord {
            ts: 50,
            category: Category::Hydration,
            event: "water_logged".to_string(),
        }];
        (exposures, events, passives)
    }

    #[test]
    fn test_difference_estimate() {
        let (exposures, events, passives) = mixed_history();
        let table = UpliftTrainer::new(&cfg(UpliftMethod::Difference, 8))
            .train(&exposures, &events, &passives);

        // Treated rows at ts 200/300 see no feedback in window, the
        // control row at ts 0 sees the passive action. With priors
        // (1,1): (2+1)/(4+2) - (1+1)/(4+2) = 1/6.
        let value = table.uplift["hydration|morning|gentle|push"];
        assert!((value - 0.1667).abs() < 1e-9);
        // Single arm, so the whole backoff chain shares the stats.
        assert_eq!(table.len(), 5);
        assert!((table.uplift["*|*|*|*"] - value).abs() < 1e-9);
    }

    #[test]
    fn test_transformed_outcome_estimate() {
        let (exposures, events, passives) = mixed_history();
        let table = UpliftTrainer::new(&cfg(UpliftMethod::TransformedOutcome, 8))
            .train(&exposures, &events, &passives);

        // p_treat = 0.9: (2/0.9 - 1/0.1) / 8 = -0.9722.
        let value = table.uplift["hydration|morning|gentle|push"];
        assert!((value - (-0.9722)).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_cells_dropped() {
        let (exposures, events, passives) = mixed_history();
        // Default min_cell of 20 exceeds the 8 rows available.
        let table =
            UpliftTrainer::new(&UpliftConfig::default()).train(&exposures, &events, &passives);
        assert!(table.is_empty());
        assert_eq!(table.estimate(&arm()), table.default);
    }

    #[test]
    fn test_join_window_is_inclusive() {
        let exposures = vec![exposure(0, true)];
        let trainer = UpliftTrainer::new(&cfg(UpliftMethod::Difference, 1));

        let late = vec![NudgeEvent::outcome(1801, arm().key(), 1.0)];
        let table = trainer.train(&exposures, &late, &[]);
        // (0+1)/(1+2) - (0+1)/(0+2) = -1/6: the row missed its window.
        assert!((table.uplift["*|*|*|*"] - (-0.1667)).abs() < 1e-9);

        let edge = vec![NudgeEvent::outcome(1800, arm().key(), 1.0)];
        let table = trainer.train(&exposures, &edge, &[]);
        assert!((table.uplift["*|*|*|*"] - 0.1667).abs() < 1e-9);
    }

    #[test]
    fn test_dismissals_join_as_treatment_outcomes() {
        let exposures = vec![exposure(0, true)];
        let events = vec![NudgeEvent::outcome(10, arm().key(), 0.0)];
        let table =
            UpliftTrainer::new(&cfg(UpliftMethod::Difference, 1)).train(&exposures, &events, &[]);
        // The zero-reward row still proves the user reacted.
        assert!((table.uplift["*|*|*|*"] - 0.1667).abs() < 1e-9);
    }

    #[test]
    fn test_per_category_join_window() {
        let mut cfg = cfg(UpliftMethod::Difference, 1);
        cfg.join_window_by_category.insert(Category::Hydration, 60);

        let exposures = vec![exposure(0, true)];
        let events = vec![NudgeEvent::outcome(100, arm().key(), 1.0)];
        let table = UpliftTrainer::new(&cfg).train(&exposures, &events, &[]);
        // 100 s is outside the shrunken 60 s hydration window.
        assert!((table.uplift["*|*|*|*"] - (-0.1667)).abs() < 1e-9);
    }

    #[test]
    fn test_exposure_events_without_reward_do_not_join() {
        let exposures = vec![exposure(0, true)];
        let events = vec![NudgeEvent::exposure(10, arm().key())];
        let table =
            UpliftTrainer::new(&cfg(UpliftMethod::Difference, 1)).train(&exposures, &events, &[]);
        assert!((table.uplift["*|*|*|*"] - (-0.1667)).abs() < 1e-9);
    }
}
