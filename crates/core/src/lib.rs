//! Shared domain types, feature encoding, configuration and errors
//! for the nudge decision engine.

pub mod config;
pub mod error;
pub mod features;
pub mod types;

pub use config::{BanditKind, EngineConfig, UpliftMethod};
pub use error::{NudgeError, NudgeResult};
pub use features::{encode_arm, encode_key, FeatureVector, FEATURE_DIM, FEATURE_NAMES};
pub use types::{
    Arm, ArmAxes, Category, Channel, Contribution, Daypart, DecisionReason, DecisionRequest,
    DecisionResponse, ExposureRecord, NudgeEvent, PassiveActionRecord, Tone,
};
