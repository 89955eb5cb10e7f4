//! Subscription types for process event streams.

use crate::error::Result;
use crate::types::{Event, EventType, Pid, SequenceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event-type filter. Empty matches every type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    types: Vec<EventType>,
}

impl EventFilter {
    /// Match every event type.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match only the given types.
    pub fn only(types: impl IntoIterator<Item = EventType>) -> Self {
        let mut filter = Self::default();
        for t in types {
            if !filter.types.contains(&t) {
                filter.types.push(t);
            }
        }
        filter
    }

    /// Parse a comma-separated list of type names, e.g. `"stdout, stderr"`.
    pub fn parse(list: &str) -> Result<Self> {
        let types = list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse::<EventType>)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::only(types))
    }

    pub fn matches(&self, event_type: EventType) -> bool {
        self.types.is_empty() || self.types.contains(&event_type)
    }

    pub fn is_all(&self) -> bool {
        self.types.is_empty()
    }

    pub fn types(&self) -> &[EventType] {
        &self.types
    }
}

/// A client's subscribe request as it arrives from the transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub pid: Pid,

    /// Comma-separated type names (empty = all types).
    #[serde(default)]
    pub event_types: String,

    /// Cursor token: replay events after this sequence.
    #[serde(default)]
    pub after: Option<String>,
}

impl SubscribeRequest {
    /// Decode the filter and the cursor. A blank cursor means no replay.
    pub fn parse(&self) -> Result<(EventFilter, Option<SequenceId>)> {
        let filter = EventFilter::parse(&self.event_types)?;
        let after = match self.after.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(token) => Some(token.parse::<SequenceId>()?),
        };
        Ok((filter, after))
    }
}

/// Items delivered on a subscription channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A process event, replayed or live.
    Event { event: Event },

    /// Part of the requested history was evicted. Sent before the first
    /// replayed event.
    ReplayGap {
        requested_after: SequenceId,
        oldest_retained: SequenceId,
    },

    /// The subscription ended. Nothing follows.
    Dropped { reason: DropReason },
}

impl StreamEvent {
    /// The process event carried, if any.
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            StreamEvent::Event { event } => Some(event),
            _ => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Queue filled up (slow consumer).
    SubscriberOverrun,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The process entry was released.
    ProcessReleased,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving end of a subscription. Dropping it closes the channel, and the
/// subscription is removed on the next delivery attempt.
///
/// A closed channel is only noticed when an event passes the filter; a
/// crossbeam `Sender` cannot be asked whether its receiver is gone. A
/// dropped handle whose filter never matches again stays registered until
/// it is unsubscribed or its process is released.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub pid: Pid,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StreamEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<StreamEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<StreamEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<StreamEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything queued right now, without blocking.
    pub fn drain(&self) -> Vec<StreamEvent> {
        self.receiver.try_iter().collect()
    }
}
