//! Registry of managed processes.

mod manager;

pub use manager::{Process, ProcessInfo, ProcessRegistry};
