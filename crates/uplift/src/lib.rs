//! Heterogeneous-treatment-effect estimation for nudge arms.
//!
//! An offline trainer joins exposure rows to outcomes and fits one
//! uplift estimate per context cell, from the fully specified arm down
//! to a global fallback. At decision time the table answers "does this
//! nudge move the needle for this context" through a hierarchical
//! backoff lookup, and the engine gates sends on the estimate.

pub mod key;
pub mod table;
pub mod train;

pub use key::CellKey;
pub use table::{UpliftTable, UPLIFT_BLOB};
pub use train::UpliftTrainer;
