//! # Process Event Streams
//!
//! Replayable, filtered subscriptions to the output and lifecycle events of
//! managed remote processes.
//!
//! ## Core Concepts
//!
//! - **Event Log**: Bounded, ordered per-process history with detectable eviction
//! - **Process Registry**: Pid to process entry, created on start, removed on release
//! - **Delivery Engine**: Per-process fan-out over bounded, non-blocking channels
//! - **Subscription Manager**: Subscribe with a filter and an optional replay cursor
//!
//! ## Example
//!
//! ```ignore
//! use procstream::{EventFilter, EventType, Pid, SequenceId, SubscriptionManager};
//!
//! let manager = SubscriptionManager::new();
//! manager.process_started(Pid(42))?;
//! manager.publish(Pid(42), EventType::Stdout, "a");
//! manager.publish(Pid(42), EventType::Stdout, "b");
//!
//! // Replays "a" and "b", then streams live output
//! let handle = manager.subscribe(Pid(42), EventFilter::all(), Some(SequenceId::ORIGIN))?;
//!
//! // After a reconnect, resume after the last sequence seen
//! let resumed = manager.subscribe(Pid(42), EventFilter::all(), Some(SequenceId(2)))?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use events::{EventLog, ReplayBatch};
pub use registry::{Process, ProcessInfo, ProcessRegistry};
pub use subscriptions::{
    DeliveryEngine, DropReason, EventFilter, StreamEvent, SubscribeRequest, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
