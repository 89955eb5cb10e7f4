//! Fan-out of process events to subscription channels.
//!
//! Each process has its own shard: a mutex over the subscribers attached to
//! that process. A shard belongs to one registration of a pid; a handle to
//! an earlier registration of the same pid does not resolve to it.
//! Publishing and attaching both hold the shard lock, so a
//! replay batch and the live stream that follows it can never interleave,
//! and unrelated processes never contend.
//!
//! Pushes use `try_send` only. A subscriber whose queue reaches its limit
//! is removed and sent a final `Dropped { SubscriberOverrun }` through a
//! slot reserved for that purpose; the publisher never waits.

use crate::error::{Result, StreamError};
use crate::events::ReplayBatch;
use crate::registry::Process;
use crate::types::{Event, EventType, Pid, SequenceId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{DropReason, EventFilter, StreamEvent, SubscriptionId};

/// Outcome of pushing one event to one subscriber.
#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Sent,
    Filtered,
    Overrun,
    Disconnected,
}

/// Live subscriber state held in a shard.
struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    sender: Sender<StreamEvent>,
    /// Queue length at which the subscriber counts as overrun.
    /// Channel capacity is one more, for the drop notice.
    limit: usize,
    /// Highest sequence this subscriber has been handed (or skipped past).
    last_sequence: SequenceId,
}

impl Subscriber {
    fn deliver(&mut self, event: &Event) -> Delivery {
        assert!(
            event.sequence > self.last_sequence,
            "out of order delivery to subscription {}: {:?} after {:?}",
            self.id,
            event.sequence,
            self.last_sequence
        );
        self.last_sequence = event.sequence;

        if !self.filter.matches(event.event_type) {
            return Delivery::Filtered;
        }

        if self.sender.len() >= self.limit {
            self.notify_dropped(DropReason::SubscriberOverrun);
            return Delivery::Overrun;
        }

        match self.sender.try_send(StreamEvent::Event {
            event: event.clone(),
        }) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Overrun,
            Err(TrySendError::Disconnected(_)) => Delivery::Disconnected,
        }
    }

    /// Best effort: the receiver may already be gone.
    fn notify_dropped(&self, reason: DropReason) {
        let _ = self.sender.try_send(StreamEvent::Dropped { reason });
    }
}

/// Subscribers of one process.
#[derive(Default)]
struct Shard {
    subscribers: Vec<Subscriber>,
}

impl Shard {
    /// Push `event` to every matching subscriber, removing those that
    /// overran or disconnected. Returns the removed ids.
    fn fan_out(&mut self, event: &Event) -> Vec<SubscriptionId> {
        let mut dropped = Vec::new();

        self.subscribers.retain_mut(|sub| match sub.deliver(event) {
            Delivery::Sent | Delivery::Filtered => true,
            Delivery::Overrun => {
                warn!(
                    pid = event.pid.0,
                    subscription = sub.id.0,
                    sequence = event.sequence.0,
                    queued = sub.sender.len(),
                    "subscriber overrun, dropping"
                );
                dropped.push(sub.id);
                false
            }
            Delivery::Disconnected => {
                debug!(
                    pid = event.pid.0,
                    subscription = sub.id.0,
                    "subscriber channel closed"
                );
                dropped.push(sub.id);
                false
            }
        });

        dropped
    }
}

/// An appended event and the subscriptions removed while fanning it out.
#[derive(Debug)]
pub struct Published {
    pub event: Event,
    pub dropped: Vec<SubscriptionId>,
}

/// A new subscription's channel and what was queued on it before going live.
pub struct Attached {
    pub receiver: Receiver<StreamEvent>,
    /// Replayed events queued (after filtering).
    pub replayed: usize,
    pub gap: bool,
}

/// A shard and the process incarnation it was opened for.
struct ShardSlot {
    incarnation: u64,
    shard: Arc<Mutex<Shard>>,
}

/// Fan-out index: pid -> subscribers, one lock per process.
pub struct DeliveryEngine {
    shards: RwLock<HashMap<Pid, ShardSlot>>,
    subscriber_buffer: usize,
}

impl DeliveryEngine {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            subscriber_buffer: subscriber_buffer.max(1),
        }
    }

    /// Create the shard for a newly registered process. A shard left over
    /// from an earlier incarnation of the pid is replaced; a newer one wins.
    pub fn open(&self, process: &Process) {
        let mut shards = self.shards.write();
        let slot = shards.entry(process.pid()).or_insert_with(|| ShardSlot {
            incarnation: process.incarnation(),
            shard: Arc::default(),
        });
        if slot.incarnation < process.incarnation() {
            *slot = ShardSlot {
                incarnation: process.incarnation(),
                shard: Arc::default(),
            };
        }
    }

    /// Remove a process's shard, dropping every subscriber with
    /// `ProcessReleased`. Returns the removed ids.
    pub fn close(&self, pid: Pid) -> Vec<SubscriptionId> {
        let Some(slot) = self.shards.write().remove(&pid) else {
            return Vec::new();
        };

        let mut shard = slot.shard.lock();
        shard
            .subscribers
            .drain(..)
            .map(|sub| {
                sub.notify_dropped(DropReason::ProcessReleased);
                sub.id
            })
            .collect()
    }

    fn shard(&self, pid: Pid) -> Result<Arc<Mutex<Shard>>> {
        self.shards
            .read()
            .get(&pid)
            .map(|slot| Arc::clone(&slot.shard))
            .ok_or(StreamError::ProcessNotFound(pid))
    }

    /// The shard opened for this exact `process`. A stale handle, one whose
    /// pid was released (and possibly registered again), is not found.
    fn shard_of(&self, process: &Process) -> Result<Arc<Mutex<Shard>>> {
        self.shards
            .read()
            .get(&process.pid())
            .filter(|slot| slot.incarnation == process.incarnation())
            .map(|slot| Arc::clone(&slot.shard))
            .ok_or(StreamError::ProcessNotFound(process.pid()))
    }

    /// Append to `process`'s log and fan the new event out.
    ///
    /// The append happens under the shard lock so that attaching
    /// subscribers see it either in their replay or live, never both.
    pub fn publish(
        &self,
        process: &Process,
        event_type: EventType,
        payload: String,
    ) -> Result<Published> {
        let shard = self.shard_of(process)?;
        let mut shard = shard.lock();

        let event = process.append(event_type, payload)?;
        let dropped = shard.fan_out(&event);

        Ok(Published { event, dropped })
    }

    /// Register a subscriber for `process`, first queueing the replay after
    /// `after` (if given).
    ///
    /// The channel is sized for the whole replay backlog plus the live
    /// buffer, so replay never overruns.
    pub fn attach(
        &self,
        process: &Process,
        id: SubscriptionId,
        filter: EventFilter,
        after: Option<SequenceId>,
    ) -> Result<Attached> {
        let shard = self.shard_of(process)?;
        let mut shard = shard.lock();

        let head = process.head().unwrap_or(SequenceId::ORIGIN);
        let (cursor, batch) = match after {
            Some(cursor) => (cursor, process.read_from(cursor)),
            None => (head, ReplayBatch::default()),
        };

        let gap = match (batch.gap_occurred, batch.oldest_retained) {
            (true, Some(oldest_retained)) => Some(StreamEvent::ReplayGap {
                requested_after: cursor,
                oldest_retained,
            }),
            _ => None,
        };
        let replay: Vec<StreamEvent> = batch
            .events
            .into_iter()
            .filter(|event| filter.matches(event.event_type))
            .map(|event| StreamEvent::Event { event })
            .collect();

        let replayed = replay.len();
        let has_gap = gap.is_some();
        let limit = replayed + usize::from(has_gap) + self.subscriber_buffer;
        let (sender, receiver) = bounded(limit + 1);

        for item in gap.into_iter().chain(replay) {
            let queued = sender.try_send(item);
            debug_assert!(queued.is_ok(), "replay exceeded reserved capacity");
        }

        shard.subscribers.push(Subscriber {
            id,
            filter,
            sender,
            limit,
            last_sequence: head,
        });

        Ok(Attached {
            receiver,
            replayed,
            gap: has_gap,
        })
    }

    /// Remove a subscriber, notifying it with `reason`. Returns false if
    /// it was not attached.
    pub fn detach(&self, pid: Pid, id: SubscriptionId, reason: DropReason) -> bool {
        let Ok(shard) = self.shard(pid) else {
            return false;
        };
        let mut shard = shard.lock();

        match shard.subscribers.iter().position(|sub| sub.id == id) {
            Some(index) => {
                let sub = shard.subscribers.remove(index);
                sub.notify_dropped(reason);
                true
            }
            None => false,
        }
    }

    /// Replace a subscriber's filter in place.
    pub fn update_filter(&self, pid: Pid, id: SubscriptionId, filter: EventFilter) -> bool {
        let Ok(shard) = self.shard(pid) else {
            return false;
        };
        let mut shard = shard.lock();

        match shard.subscribers.iter_mut().find(|sub| sub.id == id) {
            Some(sub) => {
                sub.filter = filter;
                true
            }
            None => false,
        }
    }

    /// Subscribers attached to `pid`.
    pub fn subscriber_count(&self, pid: Pid) -> usize {
        self.shard(pid)
            .map(|shard| shard.lock().subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProcessRegistry;

    fn setup(buffer: usize) -> (ProcessRegistry, DeliveryEngine, Arc<Process>) {
        let registry = ProcessRegistry::default();
        let engine = DeliveryEngine::new(buffer);
        let process = registry.register(Pid(1)).unwrap();
        engine.open(&process);
        (registry, engine, process)
    }

    fn publish(engine: &DeliveryEngine, process: &Process, payload: &str) -> Published {
        engine
            .publish(process, EventType::Stdout, payload.to_string())
            .unwrap()
    }

    #[test]
    fn test_replay_then_live() {
        let (_registry, engine, process) = setup(10);
        publish(&engine, &process, "a");
        publish(&engine, &process, "b");

        let attached = engine
            .attach(&process, SubscriptionId(1), EventFilter::all(), Some(SequenceId(1)))
            .unwrap();
        assert_eq!(attached.replayed, 1);
        assert!(!attached.gap);

        publish(&engine, &process, "c");

        let payloads: Vec<_> = attached
            .receiver
            .try_iter()
            .filter_map(|item| item.as_event().map(|e| e.payload.clone()))
            .collect();
        assert_eq!(payloads, vec!["b", "c"]);
    }

    #[test]
    fn test_overrun_drops_with_notice() {
        let (_registry, engine, process) = setup(2);
        let attached = engine
            .attach(&process, SubscriptionId(1), EventFilter::all(), None)
            .unwrap();

        assert!(publish(&engine, &process, "1").dropped.is_empty());
        assert!(publish(&engine, &process, "2").dropped.is_empty());
        let third = publish(&engine, &process, "3");
        assert_eq!(third.dropped, vec![SubscriptionId(1)]);
        assert_eq!(engine.subscriber_count(Pid(1)), 0);

        let items: Vec<_> = attached.receiver.try_iter().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[2],
            StreamEvent::Dropped {
                reason: DropReason::SubscriberOverrun
            }
        );
    }

    #[test]
    fn test_disconnected_receiver_removed() {
        let (_registry, engine, process) = setup(10);
        let attached = engine
            .attach(&process, SubscriptionId(7), EventFilter::all(), None)
            .unwrap();
        drop(attached);

        let published = publish(&engine, &process, "x");
        assert_eq!(published.dropped, vec![SubscriptionId(7)]);
        assert_eq!(engine.subscriber_count(Pid(1)), 0);
    }

    #[test]
    fn test_filtered_events_do_not_fill_queue() {
        let (_registry, engine, process) = setup(1);
        let attached = engine
            .attach(
                &process,
                SubscriptionId(1),
                EventFilter::only([EventType::Stderr]),
                None,
            )
            .unwrap();

        for i in 0..10 {
            assert!(publish(&engine, &process, &i.to_string()).dropped.is_empty());
        }
        assert!(attached.receiver.is_empty());
        assert_eq!(engine.subscriber_count(Pid(1)), 1);
    }

    #[test]
    fn test_close_notifies_subscribers() {
        let (_registry, engine, process) = setup(10);
        let attached = engine
            .attach(&process, SubscriptionId(1), EventFilter::all(), None)
            .unwrap();

        assert_eq!(engine.close(Pid(1)), vec![SubscriptionId(1)]);
        assert_eq!(
            attached.receiver.try_recv().unwrap(),
            StreamEvent::Dropped {
                reason: DropReason::ProcessReleased
            }
        );
        assert!(matches!(
            engine.publish(&process, EventType::Stdout, "late".into()),
            Err(StreamError::ProcessNotFound(Pid(1)))
        ));
    }

    #[test]
    fn test_detach_unknown() {
        let (_registry, engine, _process) = setup(10);
        assert!(!engine.detach(Pid(1), SubscriptionId(99), DropReason::Unsubscribed));
        assert!(!engine.detach(Pid(2), SubscriptionId(99), DropReason::Unsubscribed));
    }

    #[test]
    fn test_stale_handle_does_not_reach_new_incarnation() {
        let (registry, engine, stale) = setup(10);
        for i in 0..5 {
            publish(&engine, &stale, &i.to_string());
        }
        engine.close(Pid(1));
        registry.release(Pid(1)).unwrap();

        let fresh = registry.register(Pid(1)).unwrap();
        engine.open(&fresh);
        let attached = engine
            .attach(&fresh, SubscriptionId(9), EventFilter::all(), None)
            .unwrap();

        // The old handle's log is at sequence 5; it must not leak into the
        // new shard or trip the new subscriber's ordering check.
        assert!(matches!(
            engine.publish(&stale, EventType::Stdout, "old".into()),
            Err(StreamError::ProcessNotFound(Pid(1)))
        ));
        assert!(attached.receiver.is_empty());
        assert!(matches!(
            engine.attach(&stale, SubscriptionId(10), EventFilter::all(), None),
            Err(StreamError::ProcessNotFound(Pid(1)))
        ));
        assert_eq!(engine.subscriber_count(Pid(1)), 1);

        let published = publish(&engine, &fresh, "new");
        assert_eq!(published.event.sequence, SequenceId(1));
        assert_eq!(
            attached.receiver.try_recv().unwrap().as_event().unwrap().payload,
            "new"
        );
    }
}
