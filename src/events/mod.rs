//! Per-process event log.
//!
//! Events are kept in a bounded in-memory window; readers replay from a
//! cursor and are told when part of the requested history was evicted.

mod log;

pub use log::{EventLog, ReplayBatch};
