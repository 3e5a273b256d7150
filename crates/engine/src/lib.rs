//! Nudge decision engine facade.
//!
//! Wires the persistence layer, bandit strategies, guardrails, uplift
//! gate and context signals into one `NudgeEngine` with four verbs:
//! `decide`, `feedback`, `train_uplift` and `diagnose`.

mod blend;
mod engine;

pub use blend::{Blender, Pick, SignalBundle, GATE_FLOOR, GATE_THRESHOLD};
pub use engine::{Diagnosis, EngineStores, FeedbackReport, NudgeEngine};
