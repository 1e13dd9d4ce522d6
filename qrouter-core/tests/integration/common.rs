use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use etherparse::PacketBuilder;
use qrouter_core::channel::{side_channel, work_queue, SideChannelReceiver, WorkQueueReceiver};
use qrouter_core::core::{CoreConfig, PacketCore, SchedPolicy, Tables};
use qrouter_core::packet::{Packet, StdPacket, ETHERNET_HEADER_LEN};
use qrouter_core::qdisc::TAIL_DROP;
use qrouter_core::queue::QueueConfig;

pub const UDP: u8 = 17;
pub const TCP: u8 = 6;

pub const CLIENT: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
pub const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

const MAC_LEFT: [u8; 6] = [0x38, 0x7e, 0x58, 0xe7, 0, 1];
const MAC_RIGHT: [u8; 6] = [0x38, 0x7e, 0x58, 0xe7, 0, 2];

pub fn udp(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16, tos: u8) -> StdPacket {
    let builder = PacketBuilder::ethernet2(MAC_LEFT, MAC_RIGHT)
        .ipv4(src.octets(), dst.octets(), 64)
        .udp(sport, dport);
    let payload = [0u8; 64];
    let mut buffer = Vec::<u8>::with_capacity(builder.size(payload.len()));
    builder.write(&mut buffer, &payload).unwrap();
    // Second octet of the IPv4 header; the checksum is never verified
    buffer[ETHERNET_HEADER_LEN + 1] = tos;
    StdPacket::from_raw_buffer(&buffer)
}

pub fn tcp(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16) -> StdPacket {
    let builder = PacketBuilder::ethernet2(MAC_LEFT, MAC_RIGHT)
        .ipv4(src.octets(), dst.octets(), 64)
        .tcp(sport, dport, 1, 1024);
    let payload = [0u8; 64];
    let mut buffer = Vec::<u8>::with_capacity(builder.size(payload.len()));
    builder.write(&mut buffer, &payload).unwrap();
    StdPacket::from_raw_buffer(&buffer)
}

/// A UDP packet whose TOS selects the queue in the scheduler tests.
pub fn marked(tos: u8) -> StdPacket {
    udp(CLIENT, SERVER, 4000, 5000, tos)
}

pub struct Fixture {
    pub core: Arc<PacketCore<StdPacket>>,
    pub work_rx: WorkQueueReceiver<StdPacket>,
    pub side_rx: SideChannelReceiver<StdPacket>,
}

pub fn fixture(policy: SchedPolicy) -> Fixture {
    let (work_tx, work_rx) = work_queue();
    let (side_tx, side_rx) = side_channel();
    let config = CoreConfig {
        policy,
        red_seed: Some(42),
        ..Default::default()
    };
    let core = PacketCore::new(config, Tables::new(), work_tx, side_tx).unwrap();
    Fixture {
        core: Arc::new(core),
        work_rx,
        side_rx,
    }
}

/// Register a tail-drop queue fed by the class `name`, matching UDP with
/// the given TOS.
pub fn add_marked_queue(
    core: &PacketCore<StdPacket>,
    name: &str,
    tos: u8,
    weight: f64,
    capacity: usize,
) {
    core.create_queue(QueueConfig::new(
        name,
        TAIL_DROP,
        weight,
        Duration::ZERO,
        capacity,
    ))
    .unwrap();
    let mut classes = core.tables().classes.write();
    let class = classes.create(name).unwrap();
    class.protocol = Some(UDP);
    class.tos = tos;
}
