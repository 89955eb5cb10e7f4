//! Subscription manager: the public entry point for process event streams.

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::events::ReplayBatch;
use crate::registry::{ProcessInfo, ProcessRegistry};
use crate::types::{Event, EventType, Pid, ProcessState, SequenceId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::delivery::DeliveryEngine;
use super::types::{DropReason, EventFilter, SubscribeRequest, SubscriptionHandle, SubscriptionId};

/// Coordinates the process registry and the delivery engine.
///
/// The process-lifecycle collaborator calls [`process_started`],
/// [`publish`] and [`process_exited`]; the transport calls [`subscribe`]
/// and [`unsubscribe`] on behalf of clients.
///
/// [`process_started`]: Self::process_started
/// [`publish`]: Self::publish
/// [`process_exited`]: Self::process_exited
/// [`subscribe`]: Self::subscribe
/// [`unsubscribe`]: Self::unsubscribe
pub struct SubscriptionManager {
    registry: ProcessRegistry,
    engine: DeliveryEngine,
    /// Active subscriptions and the process each one follows.
    subscriptions: RwLock<HashMap<SubscriptionId, Pid>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a manager with default bounds.
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        let config = config.clamped();
        Self {
            engine: DeliveryEngine::new(config.subscriber_buffer),
            registry: ProcessRegistry::new(config),
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    // --- Process lifecycle ---

    /// Register a started process. Fails if the pid is already registered.
    pub fn process_started(&self, pid: Pid) -> Result<()> {
        let process = self.registry.register(pid)?;
        self.engine.open(&process);
        Ok(())
    }

    /// Mark a process as exited. Its log stays readable and accepts one
    /// final `ProcessDied` event.
    pub fn process_exited(&self, pid: Pid) -> Result<()> {
        self.registry.mark_exited(pid)
    }

    /// Drop all subscriptions of a process, then forget the process.
    pub fn release_process(&self, pid: Pid) -> Result<()> {
        let dropped = self.engine.close(pid);
        self.forget(&dropped);
        self.registry.release(pid)
    }

    pub fn process_state(&self, pid: Pid) -> Result<ProcessState> {
        Ok(self.registry.get(pid)?.state())
    }

    /// All registered processes, ordered by pid.
    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.registry.list()
    }

    // --- Publishing ---

    /// Append an event for `pid` and deliver it to matching subscriptions.
    ///
    /// Unknown pids and rejected appends are logged and swallowed, since
    /// the publisher may race process teardown. Returns the appended event.
    pub fn publish(
        &self,
        pid: Pid,
        event_type: EventType,
        payload: impl Into<String>,
    ) -> Option<Event> {
        let process = match self.registry.get(pid) {
            Ok(process) => process,
            Err(_) => {
                debug!(pid = pid.0, %event_type, "publish to unknown process ignored");
                return None;
            }
        };

        match self.engine.publish(&process, event_type, payload.into()) {
            Ok(published) => {
                self.forget(&published.dropped);
                Some(published.event)
            }
            Err(StreamError::ProcessNotFound(_)) => {
                debug!(pid = pid.0, %event_type, "publish raced process release");
                None
            }
            Err(err) => {
                warn!(pid = pid.0, %event_type, error = %err, "publish rejected");
                None
            }
        }
    }

    // --- Subscriptions ---

    /// Subscribe to events of `pid` matching `filter`.
    ///
    /// With `after`, every retained matching event with a greater sequence
    /// is queued before any live event. If some of that history was
    /// evicted, a `ReplayGap` comes first.
    pub fn subscribe(
        &self,
        pid: Pid,
        filter: EventFilter,
        after: Option<SequenceId>,
    ) -> Result<SubscriptionHandle> {
        let process = self.registry.get(pid)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        // Recorded before attaching so a drop during the first publish can
        // always find and remove it.
        self.subscriptions.write().insert(id, pid);

        let attached = match self.engine.attach(&process, id, filter, after) {
            Ok(attached) => attached,
            Err(err) => {
                self.subscriptions.write().remove(&id);
                return Err(err);
            }
        };

        debug!(
            pid = pid.0,
            subscription = id.0,
            after = ?after,
            replayed = attached.replayed,
            gap = attached.gap,
            "subscribed"
        );

        Ok(SubscriptionHandle {
            id,
            pid,
            receiver: attached.receiver,
        })
    }

    /// Parse a transport request and subscribe.
    pub fn subscribe_request(&self, request: &SubscribeRequest) -> Result<SubscriptionHandle> {
        let (filter, after) = request.parse()?;
        self.subscribe(request.pid, filter, after)
    }

    /// Cancel a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some(pid) = self.subscriptions.write().remove(&id) else {
            return false;
        };

        let detached = self.engine.detach(pid, id, DropReason::Unsubscribed);
        debug!(pid = pid.0, subscription = id.0, detached, "unsubscribed");
        detached
    }

    /// Replace the event-type filter of a live subscription.
    pub fn update_filter(&self, id: SubscriptionId, filter: EventFilter) -> Result<()> {
        let pid = self
            .subscriptions
            .read()
            .get(&id)
            .copied()
            .ok_or(StreamError::SubscriptionNotFound(id))?;

        if !self.engine.update_filter(pid, id, filter) {
            self.subscriptions.write().remove(&id);
            return Err(StreamError::SubscriptionNotFound(id));
        }

        debug!(pid = pid.0, subscription = id.0, "filter updated");
        Ok(())
    }

    /// Read a process's retained events after `after` without subscribing.
    pub fn read_from(&self, pid: Pid, after: SequenceId) -> Result<ReplayBatch> {
        Ok(self.registry.get(pid)?.read_from(after))
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    fn forget(&self, ids: &[SubscriptionId]) {
        if ids.is_empty() {
            return;
        }
        let mut subs = self.subscriptions.write();
        for id in ids {
            subs.remove(id);
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
