use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use itertools::Itertools;
use qrouter_core::core::{Admission, SchedPolicy};
use qrouter_core::packet::Packet;
use qrouter_core::scheduler::{Scheduler, SchedulerConfig};
use tokio_util::sync::CancellationToken;

use crate::common::*;

fn config() -> SchedulerConfig {
    SchedulerConfig {
        cycle: Duration::ZERO,
        idle_wait: Duration::from_millis(1),
    }
}

#[test_log::test]
fn test_round_robin_order() {
    let mut fixture = fixture(SchedPolicy::RoundRobin);
    for (i, name) in ["q0", "q1", "q2"].into_iter().enumerate() {
        add_marked_queue(&fixture.core, name, 0x04 * (i as u8 + 1), 1.0, 16);
    }
    // Admit out of order; service order only depends on registration
    for _ in 0..4 {
        for tos in [0x0c, 0x04, 0x08] {
            assert!(fixture.core.admit(marked(tos), false).is_accepted());
        }
    }

    let token = CancellationToken::new();
    let handle = Scheduler::new(fixture.core.clone(), config())
        .spawn(token.clone())
        .unwrap();
    let served = (0..12)
        .map(|_| fixture.work_rx.blocking_recv().unwrap().queue.to_string())
        .collect_vec();
    token.cancel();
    handle.join().unwrap().unwrap();

    let expected = ["q0", "q1", "q2"].repeat(4);
    assert_eq!(served, expected);
    assert_eq!(fixture.core.pending(), 0);
}

#[test_log::test]
fn test_counter_matches_occupancy() {
    let mut fixture = fixture(SchedPolicy::RoundRobin);
    for (i, name) in ["q0", "q1", "q2"].into_iter().enumerate() {
        add_marked_queue(&fixture.core, name, 0x04 * (i as u8 + 1), 1.0, 64);
    }

    let producers = (0..4u8)
        .map(|id| {
            let core = fixture.core.clone();
            thread::spawn(move || {
                let mut accepted = 0;
                for n in 0..200u8 {
                    // 0x00 ends up in default
                    let tos = 0x04 * ((id + n) % 4);
                    if core.admit(marked(tos), false).is_accepted() {
                        accepted += 1;
                    }
                }
                accepted
            })
        })
        .collect_vec();

    let mut scheduler = Scheduler::new(fixture.core.clone(), config());
    let mut dispatched = 0;
    for _ in 0..300 {
        if scheduler.run_once().unwrap().is_some() {
            dispatched += 1;
        }
    }
    let accepted: usize = producers.into_iter().map(|h| h.join().unwrap()).sum();

    let occupancy: usize = fixture
        .core
        .list_queues()
        .iter()
        .map(|stats| stats.occupancy)
        .sum();
    assert_eq!(fixture.core.pending(), occupancy);
    assert_eq!(accepted, dispatched + occupancy);

    let mut received = 0;
    while fixture.work_rx.try_recv().is_some() {
        received += 1;
    }
    assert_eq!(received, dispatched);
    let stats = fixture.core.stats();
    assert_eq!(stats.dispatched, dispatched as u64);
    assert_eq!(stats.enqueued, accepted as u64);
}

#[test_log::test]
fn test_weighted_fair_share() {
    let fixture = fixture(SchedPolicy::WeightedFair);
    add_marked_queue(&fixture.core, "a", 0x04, 1.0, 64);
    add_marked_queue(&fixture.core, "b", 0x08, 3.0, 64);
    for _ in 0..50 {
        fixture.core.admit(marked(0x04), false);
        fixture.core.admit(marked(0x08), false);
    }

    let mut scheduler = Scheduler::new(fixture.core.clone(), config());
    for _ in 0..20 {
        assert!(scheduler.run_once().unwrap().is_some());
    }
    let mut work_rx = fixture.work_rx;
    let counts: HashMap<String, usize> = (0..20)
        .map(|_| work_rx.try_recv().unwrap().queue.to_string())
        .counts();
    let a = counts.get("a").copied().unwrap_or_default();
    let b = counts.get("b").copied().unwrap_or_default();
    assert!(a >= 1, "a starved: {counts:?}");
    assert!(b >= 2 * a, "{counts:?}");

    // Draining everything leaves both flows idle
    while scheduler.run_once().unwrap().is_some() {}
    assert_eq!(fixture.core.pending(), 0);
}

#[test_log::test]
fn test_side_channel_bypass() {
    let mut fixture = fixture(SchedPolicy::RoundRobin);

    // Alternate flag is ignored while the mode is off
    assert_eq!(
        fixture.core.admit(marked(0), true),
        Admission::Enqueued {
            queue: "default".into()
        }
    );
    fixture.core.set_alternate_mode(true);
    assert_eq!(fixture.core.admit(marked(0), true), Admission::Bypassed);
    assert!(fixture.core.admit(marked(0), false).is_accepted());

    let item = fixture.side_rx.try_recv().unwrap();
    assert_eq!(item.length, marked(0).length());
    assert!(fixture.side_rx.try_recv().is_none());
    assert_eq!(fixture.core.pending(), 2);
    assert_eq!(fixture.core.stats().bypassed, 1);
}

#[tokio::test]
async fn test_async_worker_drains_work_queue() {
    let fixture = fixture(SchedPolicy::RoundRobin);
    let core = Arc::clone(&fixture.core);
    for _ in 0..3 {
        core.admit(marked(0), false);
    }
    let token = CancellationToken::new();
    let handle = Scheduler::new(core.clone(), config())
        .spawn(token.clone())
        .unwrap();

    let mut work_rx = fixture.work_rx;
    for _ in 0..3 {
        let item = work_rx.recv().await.unwrap();
        assert_eq!(&*item.queue, "default");
    }
    token.cancel();
    handle.join().unwrap().unwrap();
}
