//! Bandit strategies for arm selection, all behind one trait.

pub mod beta;
pub mod linalg;
pub mod linear;
pub mod logistic;
pub mod strategy;

pub use beta::{BetaArm, BetaBandit, BetaState};
pub use linear::{ArmLinearState, LinUcbBandit, LinearState, ThompsonLinearBandit};
pub use logistic::{LogisticBandit, LogisticState};
pub use strategy::{bandit_blob_name, BanditSet, BanditStrategy};
