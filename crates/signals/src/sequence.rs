//! Markov category predictor over the recent nudge sequence.

use std::collections::{BTreeMap, VecDeque};

use nudge_core::config::{FallbackPrior, SequenceConfig};
use nudge_core::{Arm, ArmAxes, Category, NudgeEvent};

use crate::min_max_rescale;

/// Decay-weighted n-gram counts over nudge categories, plus the
/// recent context they are queried with. Built fresh from the event
/// log; nothing here is persisted.
#[derive(Debug, Clone)]
pub struct SequenceModel {
    order: usize,
    min_events: f64,
    add_alpha: f64,
    backoff: f64,
    fallback: FallbackPrior,
    /// `counts[k - 1]` maps a length-(k-1) context key to next-category
    /// mass for the order-k table.
    counts: Vec<BTreeMap<String, BTreeMap<Category, f64>>>,
    /// All-time unweighted category counts for the frequency prior.
    frequency: BTreeMap<Category, f64>,
    /// Last `order` in-window categories, oldest first.
    context: Vec<Category>,
}

impl SequenceModel {
    /// Train from the event log. Every row contributes its arm's
    /// category to the sequence; rows whose category does not parse
    /// are skipped.
    pub fn train(cfg: &SequenceConfig, events: &[NudgeEvent], now: i64) -> Self {
        let order = cfg.order.max(1);
        let start = now - cfg.window_days * 86_400;

        let mut rows: Vec<(i64, Category)> = events
            .iter()
            .filter_map(|event| {
                let category = ArmAxes::parse(&event.arm).category?;
                Some((event.ts, category))
            })
            .collect();

        let mut frequency: BTreeMap<Category, f64> = BTreeMap::new();
        for (_, category) in &rows {
            *frequency.entry(*category).or_default() += 1.0;
        }

        rows.sort_by_key(|row| row.0);
        let mut counts = vec![BTreeMap::new(); order];
        let mut hist: VecDeque<Category> = VecDeque::with_capacity(order);
        for (ts, category) in rows.into_iter().filter(|row| row.0 >= start) {
            let weight = decay_weight(now, ts, cfg.half_life_days);
            let ctx: Vec<Category> = hist.iter().copied().collect();
            for k in 1..=order {
                if ctx.len() >= k - 1 {
                    let key = context_key(&ctx, k - 1);
                    *counts[k - 1]
                        .entry(key)
                        .or_insert_with(BTreeMap::new)
                        .entry(category)
                        .or_default() += weight;
                }
            }
            if hist.len() == order {
                hist.pop_front();
            }
            hist.push_back(category);
        }

        Self {
            order,
            min_events: cfg.min_events,
            add_alpha: cfg.add_alpha,
            backoff: cfg.backoff,
            fallback: cfg.fallback,
            counts,
            frequency,
            context: hist.into_iter().collect(),
        }
    }

    pub fn context(&self) -> &[Category] {
        &self.context
    }

    /// Predicted next-category distribution: interpolated backoff from
    /// the highest qualifying order down, else the fallback prior.
    pub fn distribution(&self) -> BTreeMap<Category, f64> {
        let mut dist: Option<BTreeMap<Category, f64>> = None;
        for k in (1..=self.order).rev() {
            let key = context_key(&self.context, k - 1);
            let row = self.counts[k - 1].get(&key);
            let mass: f64 = row.map_or(0.0, |r| r.values().sum());
            if mass < self.min_events {
                continue;
            }
            let mut smoothed: BTreeMap<Category, f64> = Category::ALL
                .iter()
                .map(|c| {
                    let count = row.and_then(|r| r.get(c)).copied().unwrap_or(0.0);
                    (*c, count + self.add_alpha)
                })
                .collect();
            normalize(&mut smoothed);
            dist = Some(match dist {
                None => smoothed,
                Some(acc) => interpolate(&smoothed, &acc, self.backoff),
            });
        }
        dist.unwrap_or_else(|| self.prior())
    }

    /// Candidate scores are the predicted probabilities of each
    /// candidate's category, min-max rescaled across the set.
    pub fn score_candidates(&self, candidates: &[Arm]) -> BTreeMap<String, f64> {
        let dist = self.distribution();
        let mut scores: BTreeMap<String, f64> = candidates
            .iter()
            .map(|arm| {
                let p = dist.get(&arm.category).copied().unwrap_or(0.0);
                (arm.key(), p)
            })
            .collect();
        min_max_rescale(&mut scores);
        scores
    }

    fn prior(&self) -> BTreeMap<Category, f64> {
        match self.fallback {
            FallbackPrior::Frequency if !self.frequency.is_empty() => {
                let mut prior = self.frequency.clone();
                normalize(&mut prior);
                prior
            }
            _ => {
                let share = 1.0 / Category::ALL.len() as f64;
                Category::ALL.iter().map(|c| (*c, share)).collect()
            }
        }
    }
}

fn decay_weight(now: i64, ts: i64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let age_days = (now - ts).max(0) as f64 / 86_400.0;
    0.5_f64.powf(age_days / half_life_days)
}

/// Last `len` categories joined with `|`; empty string for order 1.
fn context_key(ctx: &[Category], len: usize) -> String {
    let take = len.min(ctx.len());
    ctx[ctx.len() - take..]
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

fn normalize(dist: &mut BTreeMap<Category, f64>) {
    let total: f64 = dist.values().map(|v| v.max(0.0)).sum();
    for v in dist.values_mut() {
        *v = if total > 0.0 { v.max(0.0) / total } else { 0.0 };
    }
}

/// `lam` goes to the newly mixed-in lower order, the rest to the
/// accumulated higher-order estimate.
fn interpolate(
    new: &BTreeMap<Category, f64>,
    acc: &BTreeMap<Category, f64>,
    lam: f64,
) -> BTreeMap<Category, f64> {
    let mut out: BTreeMap<Category, f64> = BTreeMap::new();
    for (c, v) in acc {
        *out.entry(*c).or_default() += (1.0 - lam) * v;
    }
    for (c, v) in new {
        *out.entry(*c).or_default() += lam * v;
    }
    out
}
