use std::{fmt::Debug, net::Ipv4Addr, time::Instant};

use etherparse::{EtherType, Ethernet2HeaderSlice, IpNumber, Ipv4HeaderSlice};

/// Length of an Ethernet II header without VLAN tags.
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Header fields consulted by classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub tos: u8,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
}

impl PacketMeta {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, protocol: u8, tos: u8) -> Self {
        Self {
            source,
            destination,
            protocol,
            tos,
            source_port: None,
            destination_port: None,
        }
    }

    pub fn with_ports(mut self, source_port: u16, destination_port: u16) -> Self {
        self.source_port = Some(source_port);
        self.destination_port = Some(destination_port);
        self
    }
}

pub trait Packet: Debug + Send + 'static {
    fn from_raw_buffer(buf: &[u8]) -> Self;

    // Raw buffer length
    fn length(&self) -> usize;
    // Network layer length
    fn l3_length(&self) -> usize;
    fn as_slice(&self) -> &[u8];

    /// IPv4 header fields, `None` for anything that is not IPv4.
    fn meta(&self) -> Option<PacketMeta>;

    fn get_timestamp(&self) -> Instant;
    fn set_timestamp(&mut self, timestamp: Instant);

    // Packet description
    fn desc(&self) -> String {
        String::new()
    }
}

#[derive(Clone, Debug)]
pub struct StdPacket {
    buf: Vec<u8>,
    timestamp: Instant,
}

impl StdPacket {
    fn ether_hdr(&self) -> Option<Ethernet2HeaderSlice<'_>> {
        Ethernet2HeaderSlice::from_slice(self.buf.as_slice()).ok()
    }

    fn ipv4_hdr(&self) -> Option<Ipv4HeaderSlice<'_>> {
        let ether_hdr = self.ether_hdr()?;
        if ether_hdr.ether_type() != EtherType::IPV4 {
            return None;
        }
        Ipv4HeaderSlice::from_slice(
            self.buf
                .as_slice()
                .get(ether_hdr.slice().len()..)
                .unwrap_or(&[]),
        )
        .ok()
    }
}

impl Packet for StdPacket {
    fn from_raw_buffer(buf: &[u8]) -> Self {
        Self {
            buf: buf.to_vec(),
            timestamp: Instant::now(),
        }
    }

    fn length(&self) -> usize {
        self.buf.len()
    }

    fn l3_length(&self) -> usize {
        self.buf.len().saturating_sub(ETHERNET_HEADER_LEN)
    }

    fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn meta(&self) -> Option<PacketMeta> {
        let ip_hdr = self.ipv4_hdr()?;
        // TOS is the second octet of the IPv4 header (DSCP + ECN)
        let tos = ip_hdr.slice().get(1).copied().unwrap_or(0);
        let mut meta = PacketMeta::new(
            ip_hdr.source_addr(),
            ip_hdr.destination_addr(),
            ip_hdr.protocol().0,
            tos,
        );

        let transport = self
            .buf
            .as_slice()
            .get(ETHERNET_HEADER_LEN + ip_hdr.slice().len()..)
            .unwrap_or(&[]);
        match ip_hdr.protocol() {
            IpNumber::UDP => {
                if let Ok(udp_hdr) = etherparse::UdpHeaderSlice::from_slice(transport) {
                    meta = meta.with_ports(udp_hdr.source_port(), udp_hdr.destination_port());
                }
            }
            IpNumber::TCP => {
                if let Ok(tcp_hdr) = etherparse::TcpHeaderSlice::from_slice(transport) {
                    meta = meta.with_ports(tcp_hdr.source_port(), tcp_hdr.destination_port());
                }
            }
            _ => {}
        }
        Some(meta)
    }

    fn get_timestamp(&self) -> Instant {
        self.timestamp
    }

    fn set_timestamp(&mut self, timestamp: Instant) {
        self.timestamp = timestamp;
    }

    fn desc(&self) -> String {
        match self.meta() {
            Some(meta) => {
                let mut desc = format!(
                    "[Ether] [IPv4] src: {} dst: {} proto: {} tos: {:#04x}",
                    meta.source, meta.destination, meta.protocol, meta.tos
                );
                if let (Some(sport), Some(dport)) = (meta.source_port, meta.destination_port) {
                    desc.push_str(&format!(" sport: {sport} dport: {dport}"));
                }
                desc
            }
            None if self.ether_hdr().is_some() => "[Ether] [Unknown]".to_string(),
            None => "[Unknown]".to_string(),
        }
    }
}
