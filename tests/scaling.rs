//! Scaling tests with 50k+ event process logs.
//!
//! Measures the key operations at volume:
//! - Publishing into a bounded log with eviction
//! - Replay from a cursor in the middle of the retained window
//! - Filtered replay
//! - Fan-out to many live subscribers

use procstream::{
    EventFilter, EventType, Pid, SequenceId, StreamConfig, StreamEvent, SubscriptionManager,
};
use std::time::{Duration, Instant};

const EVENT_COUNT: usize = 50_000;
const RETAINED: usize = 20_000;

fn test_config() -> StreamConfig {
    StreamConfig {
        log_max_events: RETAINED,
        subscriber_buffer: 1_000,
        ..Default::default()
    }
}

/// Timing helper
struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    fn report_with_count(&self, count: usize) {
        let ms = self.elapsed_ms();
        println!(
            "  {} took {:.2}ms ({} items, {:.0} items/sec)",
            self.name,
            ms,
            count,
            if ms > 0.0 { count as f64 / (ms / 1000.0) } else { 0.0 }
        );
    }
}

fn populated_manager() -> SubscriptionManager {
    let manager = SubscriptionManager::with_config(test_config());
    manager.process_started(Pid(1)).unwrap();

    let timer = Timer::new("Publish");
    for i in 0..EVENT_COUNT {
        let event_type = if i % 3 == 0 {
            EventType::Stderr
        } else {
            EventType::Stdout
        };
        manager.publish(Pid(1), event_type, format!("line {}", i));
    }
    timer.report_with_count(EVENT_COUNT);

    manager
}

#[test]
fn test_scaling_replay_from_middle() {
    println!("\n=== Replay on 50k event log ===");
    let manager = populated_manager();

    let timer = Timer::new("Subscribe + replay (from seq 40000)");
    let handle = manager
        .subscribe(Pid(1), EventFilter::all(), Some(SequenceId(40_000)))
        .unwrap();
    let items = handle.drain();
    timer.report_with_count(items.len());

    assert_eq!(items.len(), EVENT_COUNT - 40_000);
    assert_eq!(items[0].as_event().unwrap().sequence, SequenceId(40_001));
}

#[test]
fn test_scaling_replay_past_eviction() {
    println!("\n=== Replay across evicted history ===");
    let manager = populated_manager();

    let timer = Timer::new("Subscribe + replay (from seq 0, filtered stderr)");
    let handle = manager
        .subscribe(
            Pid(1),
            EventFilter::only([EventType::Stderr]),
            Some(SequenceId::ORIGIN),
        )
        .unwrap();
    let items = handle.drain();
    timer.report_with_count(items.len());

    let oldest = (EVENT_COUNT - RETAINED + 1) as u64;
    assert_eq!(
        items[0],
        StreamEvent::ReplayGap {
            requested_after: SequenceId::ORIGIN,
            oldest_retained: SequenceId(oldest),
        }
    );
    assert!(items[1..]
        .iter()
        .all(|item| item.as_event().unwrap().event_type == EventType::Stderr));
    // Every 3rd event is stderr
    let expected = RETAINED / 3;
    assert!(
        (items.len() - 1).abs_diff(expected) <= 1,
        "Expected ~{} stderr events, got {}",
        expected,
        items.len() - 1
    );
}

#[test]
fn test_scaling_fan_out() {
    println!("\n=== Fan-out to 100 live subscribers ===");
    let manager = SubscriptionManager::with_config(test_config());
    manager.process_started(Pid(1)).unwrap();

    let handles: Vec<_> = (0..100)
        .map(|_| manager.subscribe(Pid(1), EventFilter::all(), None).unwrap())
        .collect();

    let timer = Timer::new("Publish 500 events to 100 subscribers");
    for i in 0..500 {
        manager.publish(Pid(1), EventType::Stdout, format!("live {}", i));
    }
    timer.report_with_count(500 * handles.len());

    for handle in &handles {
        let mut count = 0;
        while let Ok(item) = handle.recv_timeout(Duration::from_millis(10)) {
            assert!(item.as_event().is_some());
            count += 1;
        }
        assert_eq!(count, 500);
    }
    assert_eq!(manager.subscription_count(), 100);

    println!("  ✓ Fan-out test passed");
}
