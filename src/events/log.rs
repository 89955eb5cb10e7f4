//! Bounded, append-only event log for one process.

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::types::{Event, EventType, Pid, SequenceId, Timestamp};
use std::collections::VecDeque;

/// Which appends the log still accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteState {
    /// Process running, everything accepted.
    Open,
    /// Process exited, only the terminal event is accepted.
    Sealed,
    /// Terminal event appended, read-only.
    Frozen,
}

/// Result of reading the log after a cursor.
#[derive(Clone, Debug, Default)]
pub struct ReplayBatch {
    /// Retained events with sequence > cursor, ascending.
    pub events: Vec<Event>,
    /// True if events after the cursor were evicted before this read.
    pub gap_occurred: bool,
    /// Lowest sequence still held by the log.
    pub oldest_retained: Option<SequenceId>,
}

/// Ordered record of a process's events.
///
/// Sequence ids are assigned here, start at 1 and never repeat. When the
/// count or byte bound is exceeded the oldest events are evicted; the
/// highest evicted id is remembered so readers can tell when their cursor
/// fell off the retained window.
#[derive(Debug)]
pub struct EventLog {
    pid: Pid,
    events: VecDeque<Event>,
    next_sequence: SequenceId,
    /// Sum of retained payload lengths.
    retained_bytes: usize,
    /// Highest sequence ever evicted.
    evicted_through: Option<SequenceId>,
    max_events: usize,
    max_bytes: usize,
    writes: WriteState,
}

impl EventLog {
    /// Create an empty log bounded by `config`.
    pub fn new(pid: Pid, config: &StreamConfig) -> Self {
        Self {
            pid,
            events: VecDeque::new(),
            next_sequence: SequenceId(1),
            retained_bytes: 0,
            evicted_through: None,
            max_events: config.log_max_events.max(1),
            max_bytes: config.log_max_bytes.max(1),
            writes: WriteState::Open,
        }
    }

    /// Append an event, assigning the next sequence id.
    ///
    /// After [`seal`](Self::seal) only a single `ProcessDied` is accepted.
    /// Appending `ProcessDied` freezes the log.
    pub fn append(&mut self, event_type: EventType, payload: impl Into<String>) -> Result<Event> {
        let accepted = match self.writes {
            WriteState::Open => true,
            WriteState::Sealed => event_type.is_terminal(),
            WriteState::Frozen => false,
        };
        if !accepted {
            return Err(StreamError::ProcessExited(self.pid, event_type));
        }

        let event = Event {
            pid: self.pid,
            sequence: self.next_sequence,
            event_type,
            timestamp: Timestamp::now(),
            payload: payload.into(),
        };

        if let Some(last) = self.events.back() {
            assert!(
                last.sequence < event.sequence,
                "sequence went backwards in log of {}: {:?} after {:?}",
                self.pid,
                event.sequence,
                last.sequence
            );
        }

        self.next_sequence = self.next_sequence.next();
        self.retained_bytes += event.payload.len();
        self.events.push_back(event.clone());
        self.evict();

        if event_type.is_terminal() {
            self.writes = WriteState::Frozen;
        }

        Ok(event)
    }

    /// Stop accepting anything but the terminal event.
    pub fn seal(&mut self) {
        if self.writes == WriteState::Open {
            self.writes = WriteState::Sealed;
        }
    }

    /// Read all retained events after `cursor`.
    pub fn read_from(&self, cursor: SequenceId) -> ReplayBatch {
        let start = self.events.partition_point(|e| e.sequence <= cursor);

        ReplayBatch {
            events: self.events.range(start..).cloned().collect(),
            gap_occurred: self.evicted_through.is_some_and(|evicted| evicted > cursor),
            oldest_retained: self.oldest(),
        }
    }

    /// Last assigned sequence, if any event was ever appended.
    pub fn head(&self) -> Option<SequenceId> {
        self.next_sequence.prev().filter(|s| *s != SequenceId::ORIGIN)
    }

    /// Lowest retained sequence.
    pub fn oldest(&self) -> Option<SequenceId> {
        self.events.front().map(|e| e.sequence)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }

    /// True once the owning process has exited.
    pub fn is_exited(&self) -> bool {
        self.writes != WriteState::Open
    }

    /// True once the terminal event has been appended.
    pub fn is_frozen(&self) -> bool {
        self.writes == WriteState::Frozen
    }

    /// Drop oldest events until both bounds hold. The newest event always stays.
    fn evict(&mut self) {
        while self.events.len() > self.max_events
            || (self.retained_bytes > self.max_bytes && self.events.len() > 1)
        {
            let Some(evicted) = self.events.pop_front() else {
                break;
            };
            self.retained_bytes -= evicted.payload.len();
            self.evicted_through = Some(evicted.sequence);
        }
    }
}
