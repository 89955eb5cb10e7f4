//! Process registry implementation.

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::events::{EventLog, ReplayBatch};
use crate::types::{Event, EventType, Pid, ProcessState, SequenceId, Timestamp};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// A registered process and the log it owns.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    /// Distinguishes successive registrations of the same pid.
    incarnation: u64,
    started_at: Timestamp,
    /// Appends take the write lock, replays share the read lock.
    log: RwLock<EventLog>,
}

impl Process {
    fn new(pid: Pid, incarnation: u64, config: &StreamConfig) -> Self {
        Self {
            pid,
            incarnation,
            started_at: Timestamp::now(),
            log: RwLock::new(EventLog::new(pid, config)),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    pub fn state(&self) -> ProcessState {
        if self.log.read().is_exited() {
            ProcessState::Exited
        } else {
            ProcessState::Running
        }
    }

    /// Append to this process's log. Only the delivery engine calls this,
    /// under the process's shard lock.
    pub(crate) fn append(&self, event_type: EventType, payload: impl Into<String>) -> Result<Event> {
        self.log.write().append(event_type, payload)
    }

    /// Read retained events after `cursor`.
    pub fn read_from(&self, cursor: SequenceId) -> ReplayBatch {
        self.log.read().read_from(cursor)
    }

    /// Last assigned sequence.
    pub fn head(&self) -> Option<SequenceId> {
        self.log.read().head()
    }

    fn seal(&self) {
        self.log.write().seal();
    }

    /// Snapshot for listings.
    pub fn info(&self) -> ProcessInfo {
        let log = self.log.read();
        ProcessInfo {
            pid: self.pid,
            state: if log.is_exited() {
                ProcessState::Exited
            } else {
                ProcessState::Running
            },
            started_at: self.started_at.0,
            head: log.head(),
            oldest_retained: log.oldest(),
            retained_events: log.len(),
        }
    }
}

/// Summary of a registered process.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub state: ProcessState,
    pub started_at: i64,
    pub head: Option<SequenceId>,
    pub oldest_retained: Option<SequenceId>,
    pub retained_events: usize,
}

/// Maps process ids to their entries.
///
/// Callers hold a `Pid`, never the entry itself across operations, so a
/// released process simply stops resolving.
pub struct ProcessRegistry {
    processes: RwLock<HashMap<Pid, Arc<Process>>>,
    next_incarnation: AtomicU64,
    config: StreamConfig,
}

impl ProcessRegistry {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            next_incarnation: AtomicU64::new(1),
            config,
        }
    }

    /// Register a newly started process with an empty log.
    pub fn register(&self, pid: Pid) -> Result<Arc<Process>> {
        let mut processes = self.processes.write();

        if processes.contains_key(&pid) {
            return Err(StreamError::ProcessExists(pid));
        }

        let incarnation = self.next_incarnation.fetch_add(1, Ordering::SeqCst);
        let process = Arc::new(Process::new(pid, incarnation, &self.config));
        processes.insert(pid, Arc::clone(&process));
        info!(pid = pid.0, "process registered");

        Ok(process)
    }

    /// Mark a process as exited. Its log then only takes the terminal event.
    pub fn mark_exited(&self, pid: Pid) -> Result<()> {
        self.get(pid)?.seal();
        info!(pid = pid.0, "process exited");
        Ok(())
    }

    pub fn get(&self, pid: Pid) -> Result<Arc<Process>> {
        self.processes
            .read()
            .get(&pid)
            .cloned()
            .ok_or(StreamError::ProcessNotFound(pid))
    }

    /// Remove a process entry entirely.
    pub fn release(&self, pid: Pid) -> Result<()> {
        self.processes
            .write()
            .remove(&pid)
            .ok_or(StreamError::ProcessNotFound(pid))?;
        info!(pid = pid.0, "process released");
        Ok(())
    }

    /// All registered processes, ordered by pid.
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<_> = self.processes.read().values().map(|p| p.info()).collect();
        infos.sort_by_key(|info| info.pid);
        infos
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.read().is_empty()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}
