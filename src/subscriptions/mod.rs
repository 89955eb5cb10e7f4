//! Subscriptions to process event streams.
//!
//! A subscription follows one process and receives the events whose type
//! passes its filter:
//! - Optional replay of retained history after a cursor
//! - `ReplayGap` notice when part of that history was evicted
//! - Bounded queues; slow subscribers are dropped, publishers never block
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//! manager.process_started(Pid(42))?;
//! manager.publish(Pid(42), EventType::Stdout, "hello");
//!
//! // Replay everything, then follow live output
//! let handle = manager.subscribe(
//!     Pid(42),
//!     EventFilter::only([EventType::Stdout]),
//!     Some(SequenceId::ORIGIN),
//! )?;
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StreamEvent::Event { event }) => println!("{}", event.payload),
//!         Ok(StreamEvent::ReplayGap { oldest_retained, .. }) => {
//!             println!("history lost before {}", oldest_retained)
//!         }
//!         Ok(StreamEvent::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod delivery;
mod manager;
mod types;

pub use delivery::{Attached, DeliveryEngine, Published};
pub use manager::SubscriptionManager;
pub use types::{
    DropReason, EventFilter, StreamEvent, SubscribeRequest, SubscriptionHandle, SubscriptionId,
};
