//! Core types for process event streams.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StreamError;

/// Identifier of a managed process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event in its process's log. Starts at 1.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct SequenceId(pub u64);

impl SequenceId {
    /// The cursor that precedes every event.
    pub const ORIGIN: SequenceId = SequenceId(0);

    pub fn next(self) -> Self {
        SequenceId(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(SequenceId(self.0 - 1))
        } else {
            None
        }
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cursor tokens are the decimal rendering of a sequence id.
impl FromStr for SequenceId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(SequenceId)
            .map_err(|_| StreamError::InvalidCursor(s.to_string()))
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Kind of event a process emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Stdout,
    Stderr,
    ProcessStarted,
    ProcessDied,
    ProcessStatus,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::Stdout,
        EventType::Stderr,
        EventType::ProcessStarted,
        EventType::ProcessDied,
        EventType::ProcessStatus,
    ];

    /// Wire name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Stdout => "stdout",
            EventType::Stderr => "stderr",
            EventType::ProcessStarted => "process_started",
            EventType::ProcessDied => "process_died",
            EventType::ProcessStatus => "process_status",
        }
    }

    /// The event that ends a process's log.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::ProcessDied)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| StreamError::UnknownEventType(name.to_string()))
    }
}

/// A single entry in a process's event log. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub pid: Pid,
    pub sequence: SequenceId,
    pub event_type: EventType,
    pub timestamp: Timestamp,
    /// Opaque text (an output line, a status description, ...).
    pub payload: String,
}

/// Lifecycle state of a registered process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Exited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_navigation() {
        let seq = SequenceId(5);
        assert_eq!(seq.next(), SequenceId(6));
        assert_eq!(seq.prev(), Some(SequenceId(4)));
        assert_eq!(SequenceId::ORIGIN.prev(), None);
    }

    #[test]
    fn test_cursor_parse() {
        assert_eq!(" 42 ".parse::<SequenceId>().unwrap(), SequenceId(42));
        assert!(matches!(
            "abc".parse::<SequenceId>(),
            Err(StreamError::InvalidCursor(_))
        ));
        assert!("-1".parse::<SequenceId>().is_err());
    }

    #[test]
    fn test_event_type_names() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
        assert_eq!("STDOUT".parse::<EventType>().unwrap(), EventType::Stdout);
        assert!(matches!(
            "stdin".parse::<EventType>(),
            Err(StreamError::UnknownEventType(name)) if name == "stdin"
        ));
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let event = Event {
            pid: Pid(7),
            sequence: SequenceId(3),
            event_type: EventType::ProcessDied,
            timestamp: Timestamp(10),
            payload: "exit 0".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "process_died");
        assert_eq!(json["pid"], 7);
        assert_eq!(json["sequence"], 3);
    }
}
