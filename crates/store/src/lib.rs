//! Persistence layer: named JSON state blobs and append-only CSV logs.

pub mod events;
pub mod state;

pub use events::{
    EventLog, ExposureLog, FileEventLog, FileExposureLog, FilePassiveLog, MemoryEventLog,
    MemoryExposureLog, MemoryPassiveLog, PassiveLog,
};
pub use state::{FileStateStore, MemoryStateStore, StateStore};
