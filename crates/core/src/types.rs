//! Arm model, decision request/response shapes and log record types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BanditKind;
use crate::error::NudgeError;

// ─── Arm Axes ───────────────────────────────────────────────────────────

/// Coarse time-of-day bucket derived from the local hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Daypart {
    Morning,
    Midday,
    Afternoon,
    Evening,
}

impl Daypart {
    pub const ALL: [Daypart; 4] = [
        Daypart::Morning,
        Daypart::Midday,
        Daypart::Afternoon,
        Daypart::Evening,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Daypart::Morning => "morning",
            Daypart::Midday => "midday",
            Daypart::Afternoon => "afternoon",
            Daypart::Evening => "evening",
        }
    }

    /// Bucket a local hour: [6,11) morning, [11,14) midday, [14,18)
    /// afternoon, everything else evening.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=10 => Daypart::Morning,
            11..=13 => Daypart::Midday,
            14..=17 => Daypart::Afternoon,
            _ => Daypart::Evening,
        }
    }
}

/// Message voice used when rendering a nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Gentle,
    Humor,
    Strict,
}

impl Tone {
    pub const ALL: [Tone; 3] = [Tone::Gentle, Tone::Humor, Tone::Strict];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Gentle => "gentle",
            Tone::Humor => "humor",
            Tone::Strict => "strict",
        }
    }
}

/// Delivery surface for a nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    InApp,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Push, Channel::InApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::InApp => "in_app",
        }
    }
}

/// Behavioral category a nudge targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Hydration,
    Posture,
    Movement,
    Focus,
    Sleep,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Hydration,
        Category::Posture,
        Category::Movement,
        Category::Focus,
        Category::Sleep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hydration => "hydration",
            Category::Posture => "posture",
            Category::Movement => "movement",
            Category::Focus => "focus",
            Category::Sleep => "sleep",
        }
    }
}

macro_rules! axis_traits {
    ($ty:ty) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = NudgeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| {
                        NudgeError::Config(format!(
                            "unknown {} value: {s}",
                            stringify!($ty).to_lowercase()
                        ))
                    })
            }
        }
    };
}

axis_traits!(Daypart);
axis_traits!(Tone);
axis_traits!(Channel);
axis_traits!(Category);

// ─── Arm ────────────────────────────────────────────────────────────────

/// A fully specified candidate action. The canonical string key is
/// `daypart|tone|channel|category` and doubles as the state-store key
/// for every per-arm learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Arm {
    pub daypart: Daypart,
    pub tone: Tone,
    pub channel: Channel,
    pub category: Category,
}

impl Arm {
    pub fn new(daypart: Daypart, tone: Tone, channel: Channel, category: Category) -> Self {
        Self {
            daypart,
            tone,
            channel,
            category,
        }
    }

    /// Canonical `daypart|tone|channel|category` key.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.daypart, self.tone, self.channel, self.category
        )
    }
}

impl std::fmt::Display for Arm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.daypart, self.tone, self.channel, self.category
        )
    }
}

impl std::str::FromStr for Arm {
    type Err = NudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let axes = ArmAxes::parse(s);
        match (axes.daypart, axes.tone, axes.channel, axes.category) {
            (Some(daypart), Some(tone), Some(channel), Some(category)) => Ok(Arm {
                daypart,
                tone,
                channel,
                category,
            }),
            _ => Err(NudgeError::Config(format!("malformed arm key: {s}"))),
        }
    }
}

/// Lossy view of an arm key. An axis that is missing or does not parse
/// stays `None`, so feature encoding of unknown keys degrades to fewer
/// indicators instead of failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmAxes {
    pub daypart: Option<Daypart>,
    pub tone: Option<Tone>,
    pub channel: Option<Channel>,
    pub category: Option<Category>,
}

impl ArmAxes {
    pub fn parse(key: &str) -> Self {
        let mut parts = key.split('|');
        let daypart = parts.next().and_then(|s| s.parse().ok());
        let tone = parts.next().and_then(|s| s.parse().ok());
        let channel = parts.next().and_then(|s| s.parse().ok());
        let category = parts.next().and_then(|s| s.parse().ok());
        Self {
            daypart,
            tone,
            channel,
            category,
        }
    }
}

impl From<&Arm> for ArmAxes {
    fn from(arm: &Arm) -> Self {
        Self {
            daypart: Some(arm.daypart),
            tone: Some(arm.tone),
            channel: Some(arm.channel),
            category: Some(arm.category),
        }
    }
}

// ─── Decisions ──────────────────────────────────────────────────────────

/// Why a decision turned out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// A nudge was selected and cleared every gate.
    Ok,
    /// An escalation deadline is active for this category.
    Escalated,
    /// The daily send budget is exhausted.
    Budget,
    /// The per-category cooldown has not elapsed.
    Cooldown,
    /// The local time falls inside a quiet-hours interval.
    Quiet,
    /// Window enforcement is on and the hour is outside every
    /// delivery window for the category.
    OutsideWindow,
    /// The best blended score fell below the send threshold.
    BelowThreshold,
    /// The uplift estimate for the winning arm fell below tau.
    LowUplift,
    /// The candidate grid was empty.
    NoCandidates,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Ok => "ok",
            DecisionReason::Escalated => "escalated",
            DecisionReason::Budget => "budget",
            DecisionReason::Cooldown => "cooldown",
            DecisionReason::Quiet => "quiet",
            DecisionReason::OutsideWindow => "outside_window",
            DecisionReason::BelowThreshold => "below_threshold",
            DecisionReason::LowUplift => "low_uplift",
            DecisionReason::NoCandidates => "no_candidates",
        }
    }

    /// Guardrail rejections carry state back to the caller; scoring
    /// rejections do not.
    pub fn is_guardrail(&self) -> bool {
        matches!(
            self,
            DecisionReason::Escalated
                | DecisionReason::Budget
                | DecisionReason::Cooldown
                | DecisionReason::Quiet
        )
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to a single decision. `now` is the local wall-clock time the
/// decision should be evaluated at; `None` means the current time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub category: Category,
    /// Pin the tone axis instead of searching the configured grid.
    #[serde(default)]
    pub tone: Option<Tone>,
    /// Pin the channel axis instead of searching the configured grid.
    #[serde(default)]
    pub channel: Option<Channel>,
    /// Restrict the tone grid without pinning a single value. Empty
    /// means the configured grid.
    #[serde(default)]
    pub grid_tones: Vec<Tone>,
    #[serde(default)]
    pub grid_channels: Vec<Channel>,
    /// Free-form context text matched against nudge copy.
    #[serde(default)]
    pub context_text: Option<String>,
    /// Override the configured strategy for this decision only.
    #[serde(default)]
    pub strategy: Option<BanditKind>,
    /// Evaluate guardrails without consuming budget or cooldown.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub now: Option<NaiveDateTime>,
}

impl DecisionRequest {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            tone: None,
            channel: None,
            grid_tones: Vec::new(),
            grid_channels: Vec::new(),
            context_text: None,
            strategy: None,
            dry_run: false,
            now: None,
        }
    }

    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = Some(tone);
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_context(mut self, text: impl Into<String>) -> Self {
        self.context_text = Some(text.into());
        self
    }
}

/// One signal's share of a blended score, used in explanations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub signal: String,
    pub value: f64,
}

/// Outcome of a decision, whether or not a nudge was sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub decision_id: Uuid,
    pub allowed: bool,
    pub reason: DecisionReason,
    pub category: Category,
    /// Canonical key of the winning arm when one was scored.
    pub arm: Option<String>,
    /// Blended score of the winning arm, 0.0 when nothing was scored.
    pub score: f64,
    /// Active strategy's probability estimate for the winning arm.
    pub propensity: f64,
    pub threshold: f64,
    pub uplift: Option<f64>,
    pub tau: f64,
    /// Rendered nudge copy for the winning arm.
    pub text: Option<String>,
    /// Top score contributions ordered by absolute magnitude.
    pub explanation: Vec<Contribution>,
    pub budget_remaining: u32,
    pub cooldown_remaining_s: Option<u64>,
    pub escalation_remaining_s: Option<u64>,
    pub decided_at: DateTime<Utc>,
}

// ─── Log Records ────────────────────────────────────────────────────────

/// One row of the append-only feedback log: an exposure (`reward`
/// absent) or an observed outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NudgeEvent {
    /// Unix timestamp in seconds.
    pub ts: i64,
    pub arm: String,
    #[serde(default)]
    pub reward: Option<f64>,
}

impl NudgeEvent {
    pub fn exposure(ts: i64, arm: impl Into<String>) -> Self {
        Self {
            ts,
            arm: arm.into(),
            reward: None,
        }
    }

    pub fn outcome(ts: i64, arm: impl Into<String>, reward: f64) -> Self {
        Self {
            ts,
            arm: arm.into(),
            reward: Some(reward),
        }
    }
}

/// One row of the exposure log consumed by the uplift trainer.
/// `treatment` is false for holdout rows and gate rejections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub ts: i64,
    pub arm: String,
    pub category: Category,
    pub daypart: Daypart,
    pub tone: Tone,
    pub channel: Channel,
    pub treatment: bool,
    pub propensity: f64,
    pub reason: String,
}

impl ExposureRecord {
    pub fn new(ts: i64, arm: &Arm, treatment: bool, propensity: f64, reason: &str) -> Self {
        Self {
            ts,
            arm: arm.key(),
            category: arm.category,
            daypart: arm.daypart,
            tone: arm.tone,
            channel: arm.channel,
            treatment,
            propensity,
            reason: reason.to_string(),
        }
    }
}

/// A passively observed behavior (water logged, stretch break taken).
/// These are the control outcomes when training uplift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassiveActionRecord {
    pub ts: i64,
    pub category: Category,
    pub event: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_key_round_trip() {
        let arm = Arm::new(Daypart::Morning, Tone::Gentle, Channel::Push, Category::Hydration);
        let key = arm.key();
        assert_eq!(key, "morning|gentle|push|hydration");
        let parsed: Arm = key.parse().unwrap();
        assert_eq!(parsed, arm);
    }

    #[test]
    fn test_arm_key_rejects_malformed() {
        assert!("morning|gentle|push".parse::<Arm>().is_err());
        assert!("morning|gentle|carrier_pigeon|hydration".parse::<Arm>().is_err());
        assert!("".parse::<Arm>().is_err());
    }

    #[test]
    fn test_arm_axes_partial_parse() {
        let axes = ArmAxes::parse("evening|sarcastic|in_app|sleep");
        assert_eq!(axes.daypart, Some(Daypart::Evening));
        assert_eq!(axes.tone, None);
        assert_eq!(axes.channel, Some(Channel::InApp));
        assert_eq!(axes.category, Some(Category::Sleep));
    }

    #[test]
    fn test_daypart_from_hour_buckets() {
        assert_eq!(Daypart::from_hour(6), Daypart::Morning);
        assert_eq!(Daypart::from_hour(10), Daypart::Morning);
        assert_eq!(Daypart::from_hour(11), Daypart::Midday);
        assert_eq!(Daypart::from_hour(13), Daypart::Midday);
        assert_eq!(Daypart::from_hour(14), Daypart::Afternoon);
        assert_eq!(Daypart::from_hour(17), Daypart::Afternoon);
        assert_eq!(Daypart::from_hour(18), Daypart::Evening);
        assert_eq!(Daypart::from_hour(23), Daypart::Evening);
        assert_eq!(Daypart::from_hour(0), Daypart::Evening);
        assert_eq!(Daypart::from_hour(5), Daypart::Evening);
    }

    #[test]
    fn test_axis_serde_snake_case() {
        assert_eq!(serde_json::to_string(&Channel::InApp).unwrap(), "\"in_app\"");
        assert_eq!(
            serde_json::from_str::<Category>("\"hydration\"").unwrap(),
            Category::Hydration
        );
    }

    #[test]
    fn test_reason_guardrail_classification() {
        assert!(DecisionReason::Budget.is_guardrail());
        assert!(DecisionReason::Quiet.is_guardrail());
        assert!(!DecisionReason::BelowThreshold.is_guardrail());
        assert!(!DecisionReason::Ok.is_guardrail());
    }
}
