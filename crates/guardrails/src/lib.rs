//! Safety guardrails: daily budget, per-category cooldowns, quiet
//! hours and negative-feedback escalation.
//!
//! Block priority when several rules trip at once:
//! escalated > budget > cooldown > quiet.

mod machine;
mod quiet;

pub use machine::{
    CheckMode, CheckOutcome, GuardrailEngine, GuardrailState, NegativeStreak, GUARDRAIL_BLOB,
};
pub use quiet::QuietSpans;
