use std::fmt::{Debug, Formatter};
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ClassTableError;
use crate::packet::PacketMeta;

/// Name of the reserved catch-all class.
pub const DEFAULT_CLASS: &str = "default";

/// Whether port ranges take part in matching.
///
/// `Legacy` stores port ranges on a class without consulting them, `Strict`
/// requires the packet's transport port to fall inside every configured range.
#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    #[default]
    Legacy,
    Strict,
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Debug for PortRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, ClassTableError> {
        if start > end {
            return Err(ClassTableError::InvalidPortRange(start, end));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

/// Build a network prefix, keeping only the top `prefix_len` bits of `addr`.
pub fn prefix(addr: Ipv4Addr, prefix_len: u8) -> Result<Ipv4Net, ClassTableError> {
    Ipv4Net::new(addr, prefix_len)
        .map(|net| net.trunc())
        .map_err(|_| ClassTableError::InvalidPrefixLength(prefix_len))
}

#[cfg_attr(
    feature = "serde",
    serde_with::skip_serializing_none,
    derive(Deserialize, Serialize)
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficClass {
    pub name: String,
    pub source: Option<Ipv4Net>,
    pub destination: Option<Ipv4Net>,
    pub source_ports: Option<PortRange>,
    pub destination_ports: Option<PortRange>,
    /// `None` matches any protocol
    pub protocol: Option<u8>,
    /// 0 matches any TOS
    #[cfg_attr(feature = "serde", serde(default))]
    pub tos: u8,
}

impl TrafficClass {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            source: None,
            destination: None,
            source_ports: None,
            destination_ports: None,
            protocol: None,
            tos: 0,
        }
    }

    /// A class without any predicate matches every packet, IPv4 or not.
    pub fn is_wildcard(&self, mode: MatchMode) -> bool {
        self.source.is_none()
            && self.destination.is_none()
            && self.protocol.is_none()
            && self.tos == 0
            && (mode == MatchMode::Legacy
                || (self.source_ports.is_none() && self.destination_ports.is_none()))
    }

    pub fn matches(&self, meta: Option<&PacketMeta>, mode: MatchMode) -> bool {
        let Some(meta) = meta else {
            return self.is_wildcard(mode);
        };

        let address_match = self.source.map_or(true, |net| net.contains(&meta.source))
            && self
                .destination
                .map_or(true, |net| net.contains(&meta.destination));
        let protocol_match = self.protocol.map_or(true, |proto| proto == meta.protocol);
        let tos_match = self.tos == 0 || self.tos == meta.tos;
        let port_match = match mode {
            MatchMode::Legacy => true,
            MatchMode::Strict => {
                port_in_range(self.source_ports, meta.source_port)
                    && port_in_range(self.destination_ports, meta.destination_port)
            }
        };

        address_match && protocol_match && tos_match && port_match
    }
}

fn port_in_range(range: Option<PortRange>, port: Option<u16>) -> bool {
    match (range, port) {
        (None, _) => true,
        (Some(range), Some(port)) => range.contains(port),
        (Some(_), None) => false,
    }
}

/// Named match predicates, kept in creation order.
#[derive(Debug)]
pub struct ClassTable {
    classes: Vec<TrafficClass>,
    mode: MatchMode,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassTable {
    pub fn new() -> Self {
        Self {
            classes: vec![TrafficClass::new(DEFAULT_CLASS)],
            mode: MatchMode::default(),
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: MatchMode) {
        debug!(?mode, "Set match mode");
        self.mode = mode;
    }

    pub fn create(&mut self, name: &str) -> Result<&mut TrafficClass, ClassTableError> {
        if self.contains(name) {
            return Err(ClassTableError::DuplicateClass(name.to_string()));
        }
        debug!(name, "New traffic class");
        let index = self.classes.len();
        self.classes.push(TrafficClass::new(name));
        Ok(&mut self.classes[index])
    }

    /// Insert a fully specified class. Addresses are truncated to their prefix.
    pub fn insert(&mut self, mut class: TrafficClass) -> Result<(), ClassTableError> {
        if self.contains(&class.name) {
            return Err(ClassTableError::DuplicateClass(class.name));
        }
        if class.name == DEFAULT_CLASS {
            return Err(ClassTableError::ReservedClass(class.name));
        }
        class.source = class.source.map(|net| net.trunc());
        class.destination = class.destination.map(|net| net.trunc());
        debug!(?class, "New traffic class");
        self.classes.push(class);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<TrafficClass, ClassTableError> {
        if name == DEFAULT_CLASS {
            return Err(ClassTableError::ReservedClass(name.to_string()));
        }
        match self.classes.iter().position(|c| c.name == name) {
            Some(pos) => Ok(self.classes.remove(pos)),
            None => Err(ClassTableError::ClassNotFound(name.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TrafficClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn list(&self) -> &[TrafficClass] {
        &self.classes
    }

    // Field setters are no-ops for unknown names and for the reserved class,
    // which has to keep matching everything.
    fn modify<F>(&mut self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut TrafficClass),
    {
        if name == DEFAULT_CLASS {
            warn!("Refusing to narrow the {DEFAULT_CLASS} class");
            return false;
        }
        match self.classes.iter_mut().find(|c| c.name == name) {
            Some(class) => {
                f(class);
                debug!(?class, "Modified traffic class");
                true
            }
            None => false,
        }
    }

    pub fn set_source(&mut self, name: &str, net: Ipv4Net) -> bool {
        self.modify(name, |c| c.source = Some(net.trunc()))
    }

    pub fn set_destination(&mut self, name: &str, net: Ipv4Net) -> bool {
        self.modify(name, |c| c.destination = Some(net.trunc()))
    }

    pub fn set_source_ports(&mut self, name: &str, range: PortRange) -> bool {
        self.modify(name, |c| c.source_ports = Some(range))
    }

    pub fn set_destination_ports(&mut self, name: &str, range: PortRange) -> bool {
        self.modify(name, |c| c.destination_ports = Some(range))
    }

    pub fn set_protocol(&mut self, name: &str, protocol: u8) -> bool {
        self.modify(name, |c| c.protocol = Some(protocol))
    }

    pub fn set_tos(&mut self, name: &str, tos: u8) -> bool {
        self.modify(name, |c| c.tos = tos)
    }

    /// Match a packet against the class called `name`. Unknown names never match.
    pub fn matches(&self, name: &str, meta: Option<&PacketMeta>) -> bool {
        self.get(name)
            .is_some_and(|class| class.matches(meta, self.mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UDP: u8 = 17;

    fn meta(src: Ipv4Addr, dst: Ipv4Addr) -> PacketMeta {
        PacketMeta::new(src, dst, UDP, 0).with_ports(1000, 2000)
    }

    #[test_log::test]
    fn test_prefix_match_every_length() {
        let addr = Ipv4Addr::new(0b1010_1100, 0x10, 0xab, 0x5c);
        let bits = u32::from(addr);
        for len in 0..=32u8 {
            let net = prefix(addr, len).unwrap();
            let mut class = TrafficClass::new("c");
            class.destination = Some(net);

            // Same top bits, different host bits
            let host_mask = if len == 32 { 0 } else { u32::MAX >> len };
            let candidate = Ipv4Addr::from(bits ^ host_mask);
            let m = meta(Ipv4Addr::new(1, 1, 1, 1), candidate);
            assert!(class.matches(Some(&m), MatchMode::Legacy), "len {len}");

            // Any flipped bit inside the prefix breaks the match
            for bit in 0..len {
                let flipped = Ipv4Addr::from(bits ^ (1u32 << (31 - bit)));
                let m = meta(Ipv4Addr::new(1, 1, 1, 1), flipped);
                assert!(
                    !class.matches(Some(&m), MatchMode::Legacy),
                    "len {len} bit {bit}"
                );
            }
        }

        // /0 matches everything
        let mut class = TrafficClass::new("any");
        class.source = Some(prefix(Ipv4Addr::new(9, 9, 9, 9), 0).unwrap());
        for addr in [Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST, Ipv4Addr::new(1, 2, 3, 4)] {
            assert!(class.matches(Some(&meta(addr, addr)), MatchMode::Legacy));
        }
        assert!(prefix(Ipv4Addr::new(9, 9, 9, 9), 33).is_err());
    }

    #[test_log::test]
    fn test_protocol_and_tos() {
        let mut class = TrafficClass::new("voice");
        class.protocol = Some(UDP);
        class.tos = 0x10;

        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let mut m = PacketMeta::new(src, dst, UDP, 0x10);
        assert!(class.matches(Some(&m), MatchMode::Legacy));
        m.tos = 0;
        assert!(!class.matches(Some(&m), MatchMode::Legacy));
        m.tos = 0x10;
        m.protocol = 6;
        assert!(!class.matches(Some(&m), MatchMode::Legacy));

        // Non-IPv4 frames only match wildcard classes
        assert!(!class.matches(None, MatchMode::Legacy));
        assert!(TrafficClass::new("w").matches(None, MatchMode::Legacy));
    }

    #[test_log::test]
    fn test_port_range_modes() {
        let mut class = TrafficClass::new("web");
        class.destination_ports = Some(PortRange::new(80, 443).unwrap());

        let inside = meta(Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2)).with_ports(5555, 443);
        let outside = inside.with_ports(5555, 8080);
        let portless = PacketMeta::new(inside.source, inside.destination, 1, 0);

        // Legacy ignores ports entirely
        assert!(class.matches(Some(&outside), MatchMode::Legacy));
        assert!(class.matches(Some(&portless), MatchMode::Legacy));

        assert!(class.matches(Some(&inside), MatchMode::Strict));
        assert!(!class.matches(Some(&outside), MatchMode::Strict));
        assert!(!class.matches(Some(&portless), MatchMode::Strict));

        assert!(PortRange::new(10, 9).is_err());
    }

    #[test_log::test]
    fn test_class_table() -> Result<(), ClassTableError> {
        let mut table = ClassTable::new();
        assert!(table.contains(DEFAULT_CLASS));
        assert!(table.create(DEFAULT_CLASS).is_err());
        assert!(table.delete(DEFAULT_CLASS).is_err());

        table.create("voice")?;
        assert!(table.create("voice").is_err());
        assert!(table.set_protocol("voice", UDP));
        assert!(table.set_tos("voice", 0x10));
        assert!(!table.set_tos("video", 0x20)); // unknown, no-op
        assert!(!table.set_protocol(DEFAULT_CLASS, UDP)); // reserved, no-op
        assert!(table.set_source(
            "voice",
            "10.1.2.3/16".parse::<Ipv4Net>().unwrap()
        ));
        assert_eq!(
            table.get("voice").unwrap().source,
            Some("10.1.0.0/16".parse().unwrap())
        );

        let m = PacketMeta::new(Ipv4Addr::new(10, 1, 9, 9), Ipv4Addr::new(8, 8, 8, 8), UDP, 0x10);
        assert!(table.matches("voice", Some(&m)));
        assert!(table.matches(DEFAULT_CLASS, Some(&m)));
        assert!(!table.matches("video", Some(&m)));

        table.delete("voice")?;
        assert!(table.delete("voice").is_err());
        assert_eq!(table.list().len(), 1);
        Ok(())
    }
}
