//! Persistent guardrail state machine.
//!
//! Tracks the daily send counter, per-category `last_sent` stamps,
//! negative-feedback streaks and escalation deadlines. A `check` walks
//! the block reasons in priority order and, in commit mode, consumes
//! budget and refreshes the cooldown stamp for an allowed send.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use nudge_core::config::{FeedbackConfig, PolicyConfig};
use nudge_core::{Category, DecisionReason};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::quiet::QuietSpans;

/// Blob name the engine persists guardrail state under.
pub const GUARDRAIL_BLOB: &str = "guardrails";

/// Spacing applied to a category the config does not list.
const FALLBACK_COOLDOWN_S: u64 = 3600;

/// Consecutive zero-reward outcomes for one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NegativeStreak {
    pub count: u32,
    pub last: NaiveDateTime,
}

/// Everything the guardrails persist between invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailState {
    /// Local date `sent_today` counts against.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub sent_today: u32,
    #[serde(default)]
    pub last_sent: BTreeMap<Category, NaiveDateTime>,
    #[serde(default)]
    pub negatives: BTreeMap<Category, NegativeStreak>,
    /// Category mute deadlines from escalated negative streaks.
    #[serde(default)]
    pub escalations: BTreeMap<Category, NaiveDateTime>,
}

/// Whether a check may mutate state on an allowed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    DryRun,
    Commit,
}

/// Result of a guardrail check, with enough detail for the response.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub budget_remaining: u32,
    pub cooldown_remaining_s: u64,
    pub escalation_remaining_s: u64,
}

/// Evaluates sends against budget, cooldown, quiet hours and
/// escalation, in that priority order (escalated first).
#[derive(Debug)]
pub struct GuardrailEngine {
    state: GuardrailState,
    budget_per_day: u32,
    cooldown_s: BTreeMap<Category, u64>,
    quiet: QuietSpans,
    negatives_to_escalate: u32,
    escalate_duration_s: u64,
    negative_decay_s: u64,
}

impl GuardrailEngine {
    pub fn new(policy: &PolicyConfig, feedback: &FeedbackConfig) -> Self {
        Self::restore(policy, feedback, GuardrailState::default())
    }

    /// Rebuild from a previously persisted state blob.
    pub fn restore(policy: &PolicyConfig, feedback: &FeedbackConfig, state: GuardrailState) -> Self {
        Self {
            state,
            budget_per_day: policy.budget_per_day,
            cooldown_s: policy.cooldown_s.clone(),
            quiet: QuietSpans::parse(&policy.quiet_hours),
            negatives_to_escalate: feedback.negatives_to_escalate,
            escalate_duration_s: feedback.escalate_duration_s,
            negative_decay_s: feedback.negative_decay_s,
        }
    }

    pub fn state(&self) -> &GuardrailState {
        &self.state
    }

    /// Evaluate a send for `category` at `now`. Commit mode performs the
    /// day rollover and, when allowed, consumes one unit of budget and
    /// refreshes `last_sent`; dry-run leaves state untouched.
    pub fn check(&mut self, category: Category, now: NaiveDateTime, mode: CheckMode) -> CheckOutcome {
        let today = now.date();
        if mode == CheckMode::Commit && self.state.date != Some(today) {
            self.state.date = Some(today);
            self.state.sent_today = 0;
        }
        // Dry-run across a day boundary sees the rolled-over counter
        // without writing it.
        let sent_today = if self.state.date == Some(today) {
            self.state.sent_today
        } else {
            0
        };

        let (cooldown_remaining_s, escalation_remaining_s) = self.remaining(category, now);
        let blocked = if escalation_remaining_s > 0 {
            Some(DecisionReason::Escalated)
        } else if sent_today >= self.budget_per_day {
            Some(DecisionReason::Budget)
        } else if cooldown_remaining_s > 0 {
            Some(DecisionReason::Cooldown)
        } else if self.quiet.contains(now.time()) {
            Some(DecisionReason::Quiet)
        } else {
            None
        };

        if let Some(reason) = blocked {
            debug!(category = %category, reason = reason.as_str(), "guardrail blocked send");
            return CheckOutcome {
                allowed: false,
                reason,
                budget_remaining: self.budget_per_day.saturating_sub(sent_today),
                cooldown_remaining_s,
                escalation_remaining_s,
            };
        }

        let mut sent = sent_today;
        if mode == CheckMode::Commit {
            self.state.sent_today = sent_today + 1;
            self.state.last_sent.insert(category, now);
            sent = self.state.sent_today;
        }
        CheckOutcome {
            allowed: true,
            reason: DecisionReason::Ok,
            budget_remaining: self.budget_per_day.saturating_sub(sent),
            cooldown_remaining_s: 0,
            escalation_remaining_s: 0,
        }
    }

    /// Fold an outcome into the negative-streak tracker. Reward zero
    /// counts as a negative; anything else ends the streak (an
    /// escalation already in force keeps its deadline).
    pub fn record_outcome(&mut self, category: Category, reward: f64, now: NaiveDateTime) {
        if reward != 0.0 {
            self.state.negatives.remove(&category);
            return;
        }
        let streak = self
            .state
            .negatives
            .entry(category)
            .or_insert(NegativeStreak { count: 0, last: now });
        let elapsed = (now - streak.last).num_seconds().max(0) as u64;
        if elapsed > self.negative_decay_s {
            streak.count = 0;
        }
        streak.count += 1;
        streak.last = now;
        if streak.count >= self.negatives_to_escalate {
            let until = now + Duration::seconds(self.escalate_duration_s as i64);
            info!(category = %category, until = %until, "negative streak escalated, muting category");
            self.state.escalations.insert(category, until);
            streak.count = 0;
        }
    }

    /// Seconds left on the category cooldown and on any escalation,
    /// both zero when clear.
    pub fn remaining(&self, category: Category, now: NaiveDateTime) -> (u64, u64) {
        let cooldown = self.state.last_sent.get(&category).map_or(0, |last| {
            let elapsed = (now - *last).num_seconds().max(0) as u64;
            self.cooldown_for(category).saturating_sub(elapsed)
        });
        let escalation = self
            .state
            .escalations
            .get(&category)
            .map_or(0, |until| (*until - now).num_seconds().max(0) as u64);
        (cooldown, escalation)
    }

    pub fn in_quiet(&self, now: NaiveDateTime) -> bool {
        self.quiet.contains(now.time())
    }

    /// Sends left today, accounting for a day boundary virtually.
    pub fn budget_remaining(&self, now: NaiveDateTime) -> u32 {
        let sent = if self.state.date == Some(now.date()) {
            self.state.sent_today
        } else {
            0
        };
        self.budget_per_day.saturating_sub(sent)
    }

    fn cooldown_for(&self, category: Category) -> u64 {
        self.cooldown_s
            .get(&category)
            .copied()
            .unwrap_or(FALLBACK_COOLDOWN_S)
    }
}
