use std::net::Ipv4Addr;
use std::time::Duration;

use qrouter_core::classify::{FilterKind, MatchMode, PortRange};
use qrouter_core::control::QosControlInterface;
use qrouter_core::core::{Admission, DropReason, SchedPolicy};
use qrouter_core::packet::Packet;
use qrouter_core::qdisc::TAIL_DROP;
use qrouter_core::queue::{QueueConfig, DEFAULT_QUEUE};

use crate::common::*;

#[test_log::test]
fn test_voice_end_to_end() -> anyhow::Result<()> {
    let fixture = fixture(SchedPolicy::RoundRobin);
    let control = QosControlInterface::new(fixture.core.clone());

    control.create_class("voice")?;
    control.set_protocol("voice", UDP)?;
    control.set_tos("voice", 0x10)?;
    control.create_queue(QueueConfig::new("voice", TAIL_DROP, 1.0, Duration::ZERO, 4))?;

    for port in 0..4 {
        let admission = fixture.core.admit(udp(CLIENT, SERVER, 5000 + port, 5060, 0x10), false);
        assert_eq!(
            admission,
            Admission::Enqueued {
                queue: "voice".into()
            }
        );
    }
    let others = [
        udp(CLIENT, SERVER, 5000, 53, 0),
        tcp(CLIENT, SERVER, 40000, 443),
    ];
    for packet in others {
        assert!(fixture.core.admit(packet, false).is_accepted());
    }

    assert_eq!(control.describe_queue("voice")?.occupancy, 4);
    assert_eq!(control.describe_queue(DEFAULT_QUEUE)?.occupancy, 2);
    assert_eq!(
        fixture.core.admit(udp(CLIENT, SERVER, 6000, 5060, 0x10), false),
        Admission::Dropped(DropReason::QueueFull)
    );

    let voice = control.describe_queue("voice")?;
    assert_eq!(voice.dropped_full, 1);
    assert_eq!(voice.enqueued_packets, 4);
    assert_eq!(fixture.core.pending(), 6);
    Ok(())
}

#[test_log::test]
fn test_filter_denies_subnet() -> anyhow::Result<()> {
    let fixture = fixture(SchedPolicy::RoundRobin);
    let control = QosControlInterface::new(fixture.core.clone());

    control.create_class("lan")?;
    control.set_source("lan", "192.168.1.0/24".parse()?)?;
    control.create_class("guest")?;
    control.set_source("guest", "192.168.1.128/25".parse()?)?;
    // Allow rules only count; the deny rule still applies to guests
    control.append_filter(FilterKind::Allow, "lan")?;
    control.append_filter(FilterKind::Deny, "guest")?;
    control.set_filtering(true);

    let guest = Ipv4Addr::new(192, 168, 1, 200);
    assert_eq!(
        fixture.core.admit(udp(guest, SERVER, 1, 2, 0), false),
        Admission::Dropped(DropReason::Filtered)
    );
    assert!(fixture.core.admit(udp(CLIENT, SERVER, 1, 2, 0), false).is_accepted());
    let outside = Ipv4Addr::new(172, 16, 0, 1);
    assert!(fixture.core.admit(udp(outside, SERVER, 1, 2, 0), false).is_accepted());

    let filters = control.list_filters();
    assert_eq!((filters[0].passed, filters[0].failed), (2, 0));
    assert_eq!((filters[1].passed, filters[1].failed), (0, 1));

    control.set_filtering(false);
    assert!(fixture.core.admit(udp(guest, SERVER, 1, 2, 0), false).is_accepted());
    assert_eq!(control.core_stats().filtered, 1);
    Ok(())
}

#[test_log::test]
fn test_strict_port_matching() -> anyhow::Result<()> {
    let fixture = fixture(SchedPolicy::RoundRobin);
    let control = QosControlInterface::new(fixture.core.clone());

    control.create_class("sip")?;
    control.set_protocol("sip", UDP)?;
    control.set_destination_ports("sip", PortRange::new(5060, 5061)?)?;
    control.create_queue(QueueConfig::new("sip", TAIL_DROP, 1.0, Duration::ZERO, 16))?;

    let rtp = udp(CLIENT, SERVER, 4000, 16384, 0);
    // Port ranges are not consulted in legacy mode
    assert_eq!(&*fixture.core.classify(rtp.meta().as_ref()), "sip");

    control.set_match_mode(MatchMode::Strict);
    assert_eq!(&*fixture.core.classify(rtp.meta().as_ref()), DEFAULT_QUEUE);
    let sip = udp(CLIENT, SERVER, 4000, 5061, 0);
    assert_eq!(&*fixture.core.classify(sip.meta().as_ref()), "sip");
    Ok(())
}

#[test_log::test]
fn test_delete_queue_falls_back_to_default() -> anyhow::Result<()> {
    let fixture = fixture(SchedPolicy::RoundRobin);
    let control = QosControlInterface::new(fixture.core.clone());
    add_marked_queue(&fixture.core, "video", 0x20, 1.0, 8);

    for _ in 0..3 {
        fixture.core.admit(marked(0x20), false);
    }
    let removed = control.delete_queue("video")?;
    assert_eq!(removed.discarded, 3);
    assert_eq!(fixture.core.pending(), 0);

    // The class survives, but without a queue of the same name it no longer
    // steers packets
    assert_eq!(
        fixture.core.admit(marked(0x20), false),
        Admission::Enqueued {
            queue: DEFAULT_QUEUE.into()
        }
    );
    assert!(control.delete_queue(DEFAULT_QUEUE).is_err());
    Ok(())
}
