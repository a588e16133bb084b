//! Tests for the drop-oldest delivery of the event bus.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant, SystemTime},
};

use chained_hotstuff::{
    event_bus::EventBus,
    events::{CommitBlockEvent, Event, HaltEvent, UpdateHighestQCEvent},
    types::{
        data_types::{BlockHeight, BufferSize, CryptoHash},
        quorum_cert::QuorumCert,
    },
};

fn commit_event(height: u64) -> Event {
    Event::CommitBlock(CommitBlockEvent {
        timestamp: SystemTime::now(),
        block: CryptoHash::new([height as u8; 32]),
        height: BlockHeight::new(height),
        transactions: 0,
    })
}

fn commit_height(event: Option<Event>) -> Option<u64> {
    match event {
        Some(Event::CommitBlock(e)) => Some(e.height.int()),
        _ => None,
    }
}

#[test]
fn full_subscription_keeps_latest_events_test() {
    let bus = EventBus::new();
    let subscription = bus.subscribe(|_| true, BufferSize::new(3));

    for height in 1..=5 {
        bus.publish(commit_event(height));
    }

    assert_eq!(subscription.dropped(), 2);
    assert_eq!(commit_height(subscription.try_recv()), Some(3));
    assert_eq!(commit_height(subscription.try_recv()), Some(4));
    assert_eq!(commit_height(subscription.try_recv()), Some(5));
    assert!(subscription.try_recv().is_none());
}

#[test]
fn slow_subscriber_still_sees_latest_qc_test() {
    let bus = EventBus::new();
    let qcs = bus.subscribe(
        |event| matches!(event, Event::UpdateHighestQC(_)),
        BufferSize::new(2),
    );

    for height in 1..=10u64 {
        bus.publish(Event::UpdateHighestQC(UpdateHighestQCEvent {
            timestamp: SystemTime::now(),
            highest_qc: QuorumCert::new(CryptoHash::new([height as u8; 32]), Vec::new()),
            block_height: BlockHeight::new(height),
            proposer: [0; 32],
        }));
    }

    let mut last = None;
    while let Some(event) = qcs.try_recv() {
        if let Event::UpdateHighestQC(e) = event {
            last = Some(e.highest_qc.block_hash);
        }
    }
    assert_eq!(last, Some(CryptoHash::new([10; 32])));
    assert_eq!(qcs.dropped(), 8);
}

#[test]
fn filter_selects_events_test() {
    let bus = EventBus::new();
    let halts = bus.subscribe(|event| matches!(event, Event::Halt(_)), BufferSize::new(8));
    let everything = bus.subscribe(|_| true, BufferSize::new(8));

    bus.publish(commit_event(1));
    bus.publish(Event::Halt(HaltEvent {
        timestamp: SystemTime::now(),
        reason: String::from("test"),
    }));

    assert!(matches!(halts.try_recv(), Some(Event::Halt(e)) if e.reason == "test"));
    assert!(halts.try_recv().is_none());

    assert_eq!(commit_height(everything.try_recv()), Some(1));
    assert!(matches!(everything.try_recv(), Some(Event::Halt(_))));
}

#[test]
fn dropped_subscription_is_forgotten_test() {
    let bus = EventBus::new();
    let kept = bus.subscribe(|_| true, BufferSize::new(1));
    let dropped = bus.subscribe(|_| true, BufferSize::new(1));
    assert_eq!(bus.subscriber_count(), 2);

    drop(dropped);
    bus.publish(commit_event(1));

    assert_eq!(bus.subscriber_count(), 1);
    assert_eq!(commit_height(kept.try_recv()), Some(1));
}

#[test]
fn recv_timeout_waits_for_publisher_test() {
    let bus = Arc::new(EventBus::new());
    let subscription = bus.subscribe(|_| true, BufferSize::new(4));

    let start = Instant::now();
    assert!(subscription.recv_timeout(Duration::from_millis(50)).is_none());
    assert!(start.elapsed() >= Duration::from_millis(50));

    let publisher = {
        let bus = Arc::clone(&bus);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            bus.publish(commit_event(7));
        })
    };
    assert_eq!(
        commit_height(subscription.recv_timeout(Duration::from_secs(5))),
        Some(7)
    );
    publisher.join().unwrap();
}
