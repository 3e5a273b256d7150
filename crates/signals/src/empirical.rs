//! Recency-decayed empirical response rates from the event log.

use std::collections::BTreeMap;

use nudge_core::config::{EmpiricalConfig, EmpiricalLevel};
use nudge_core::{Arm, NudgeEvent};

use crate::min_max_rescale;

/// Scores candidates by their smoothed, half-life-weighted response
/// rate over a trailing window of explicit feedback.
#[derive(Debug, Clone)]
pub struct EmpiricalRates {
    window_days: i64,
    half_life_days: f64,
    alpha: f64,
    beta: f64,
    min_events: f64,
    level: EmpiricalLevel,
}

impl EmpiricalRates {
    pub fn new(cfg: &EmpiricalConfig) -> Self {
        Self {
            window_days: cfg.window_days,
            half_life_days: cfg.half_life_days,
            alpha: cfg.alpha,
            beta: cfg.beta,
            min_events: cfg.min_events,
            level: cfg.level,
        }
    }

    /// One score per candidate key, min-max rescaled across the set.
    /// Without any in-window feedback every candidate scores zero.
    pub fn score_candidates(
        &self,
        events: &[NudgeEvent],
        candidates: &[Arm],
        now: i64,
    ) -> BTreeMap<String, f64> {
        let start = now - self.window_days * 86_400;
        let mut pos: BTreeMap<String, f64> = BTreeMap::new();
        let mut tot: BTreeMap<String, f64> = BTreeMap::new();
        let mut any = false;
        for event in events {
            let Some(reward) = event.reward else { continue };
            if event.ts < start {
                continue;
            }
            any = true;
            let weight = self.decay_weight(now, event.ts);
            let key = self.level_key(&event.arm);
            *tot.entry(key.clone()).or_default() += weight;
            *pos.entry(key).or_default() += weight * reward.clamp(0.0, 1.0);
        }

        let mut scores = BTreeMap::new();
        for arm in candidates {
            let key = arm.key();
            let score = if any {
                let level_key = self.level_key(&key);
                let t = tot.get(&level_key).copied().unwrap_or(0.0);
                if t < self.min_events {
                    0.0
                } else {
                    let p = pos.get(&level_key).copied().unwrap_or(0.0);
                    (self.alpha + p) / (self.alpha + self.beta + t)
                }
            } else {
                0.0
            };
            scores.insert(key, score);
        }
        min_max_rescale(&mut scores);
        scores
    }

    fn decay_weight(&self, now: i64, ts: i64) -> f64 {
        if self.half_life_days <= 0.0 {
            return 1.0;
        }
        let age_days = (now - ts).max(0) as f64 / 86_400.0;
        0.5_f64.powf(age_days / self.half_life_days)
    }

    /// Aggregation key for an arm at the configured level. Positional
    /// on the raw key so malformed rows bucket together instead of
    /// being dropped.
    fn level_key(&self, arm_key: &str) -> String {
        match self.level {
            EmpiricalLevel::Arm => arm_key.to_string(),
            EmpiricalLevel::CategoryToneChannel => {
                let mut parts = arm_key.split('|');
                let _daypart = parts.next().unwrap_or("");
                let tone = parts.next().unwrap_or("");
                let channel = parts.next().unwrap_or("");
                let category = parts.next().unwrap_or("");
                format!("{category}|{tone}|{channel}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_core::{Category, Channel, Daypart, Tone};

    const DAY: i64 = 86_400;

    fn arm(tone: Tone) -> Arm {
        Arm::new(Daypart::Morning, tone, Channel::Push, Category::Hydration)
    }

    fn cfg(min_events: f64) -> EmpiricalConfig {
        let mut cfg = EmpiricalConfig::default();
        cfg.min_events = min_events;
        cfg
    }

    fn feedback(ts: i64, arm: &Arm, reward: f64) -> NudgeEvent {
        NudgeEvent::outcome(ts, arm.key(), reward)
    }

    #[test]
    fn test_no_feedback_scores_zero() {
        let rates = EmpiricalRates::new(&EmpiricalConfig::default());
        let candidates = [arm(Tone::Gentle), arm(Tone::Strict)];
        let scores = rates.score_candidates(&[], &candidates, 100 * DAY);
        assert!(scores.values().all(|&v| v == 0.0));
    }

    #[test]
    fn test_responsive_arm_outranks_ignored_arm() {
        let now = 100 * DAY;
        let good = arm(Tone::Gentle);
        let bad = arm(Tone::Strict);
        let mut events = Vec::new();
        for i in 0..20 {
            events.push(feedback(now - i * 3600, &good, 1.0));
            events.push(feedback(now - i * 3600, &bad, 0.0));
        }
        let scores = EmpiricalRates::new(&cfg(12.0)).score_candidates(
            &events,
            &[good.clone(), bad.clone()],
            now,
        );
        // Rescaled across two candidates, the extremes hit 1 and 0.
        assert_eq!(scores[&good.key()], 1.0);
        assert_eq!(scores[&bad.key()], 0.0);
    }

    #[test]
    fn test_thin_history_is_not_trusted() {
        let now = 100 * DAY;
        let hot = arm(Tone::Gentle);
        let cold = arm(Tone::Strict);
        // Three perfect responses carry less mass than min_events.
        let events: Vec<NudgeEvent> = (0..3).map(|i| feedback(now - i * 60, &hot, 1.0)).collect();
        let scores = EmpiricalRates::new(&cfg(12.0)).score_candidates(
            &events,
            &[hot.clone(), cold.clone()],
            now,
        );
        assert_eq!(scores[&hot.key()], scores[&cold.key()]);
    }

    #[test]
    fn test_events_outside_window_ignored() {
        let now = 100 * DAY;
        let stale = arm(Tone::Gentle);
        let events: Vec<NudgeEvent> = (0..20)
            .map(|i| feedback(now - 50 * DAY - i * 60, &stale, 1.0))
            .collect();
        let scores =
            EmpiricalRates::new(&cfg(12.0)).score_candidates(&events, &[stale.clone()], now);
        assert_eq!(scores[&stale.key()], 0.0);
    }

    #[test]
    fn test_recent_feedback_outweighs_old() {
        let now = 100 * DAY;
        let fresh = arm(Tone::Gentle);
        let faded = arm(Tone::Strict);
        let mut events = Vec::new();
        // Same volume and rate, but the strict history is two
        // half-lives older so its mass decays below min_events.
        for i in 0..16 {
            events.push(feedback(now - i * 3600, &fresh, 1.0));
            events.push(feedback(now - 28 * DAY - i * 3600, &faded, 1.0));
        }
        let rates = EmpiricalRates::new(&cfg(12.0));
        let scores = rates.score_candidates(&events, &[fresh.clone(), faded.clone()], now);
        assert!(scores[&fresh.key()] > scores[&faded.key()]);
    }

    #[test]
    fn test_category_tone_channel_level_pools_dayparts() {
        let now = 100 * DAY;
        let morning = arm(Tone::Gentle);
        let evening = Arm::new(
            Daypart::Evening,
            Tone::Gentle,
            Channel::Push,
            Category::Hydration,
        );
        // All mass lands on the morning arm key.
        let events: Vec<NudgeEvent> =
            (0..20).map(|i| feedback(now - i * 60, &morning, 1.0)).collect();

        let mut pooled = cfg(12.0);
        pooled.level = EmpiricalLevel::CategoryToneChannel;
        let scores = EmpiricalRates::new(&pooled).score_candidates(
            &events,
            &[morning.clone(), evening.clone()],
            now,
        );
        // Pooled across dayparts the two arms share one bucket.
        assert_eq!(scores[&morning.key()], scores[&evening.key()]);
    }
}
