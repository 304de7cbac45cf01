use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

use super::utils::{decode_frame, decode_tcp};

/// Name given to every frame whose ethertype we cannot place.
pub const UNKNOWN_PROTOCOL: &str = "Unknown Protocol";

/// One stored capture record. `index` is the capture-order position and the record's identity;
/// timestamps may repeat.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub index: usize,
    pub timestamp: f64,
    pub raw: Vec<u8>,
}

/// Well-known IP protocol numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpProtocol {
    Icmp,
    Igmp,
    Tcp,
    Udp,
    Ipv6Encap,
    Gre,
    Esp,
    Ah,
    Icmpv6,
    Ospf,
    Sctp,
    Other(u8),
}

impl IpProtocol {
    pub fn from_number(number: u8) -> Self {
        match number {
            1 => IpProtocol::Icmp,
            2 => IpProtocol::Igmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            41 => IpProtocol::Ipv6Encap,
            47 => IpProtocol::Gre,
            50 => IpProtocol::Esp,
            51 => IpProtocol::Ah,
            58 => IpProtocol::Icmpv6,
            89 => IpProtocol::Ospf,
            132 => IpProtocol::Sctp,
            other => IpProtocol::Other(other),
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            IpProtocol::Icmp => 1,
            IpProtocol::Igmp => 2,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Ipv6Encap => 41,
            IpProtocol::Gre => 47,
            IpProtocol::Esp => 50,
            IpProtocol::Ah => 51,
            IpProtocol::Icmpv6 => 58,
            IpProtocol::Ospf => 89,
            IpProtocol::Sctp => 132,
            IpProtocol::Other(number) => *number,
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Igmp => write!(f, "IGMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Ipv6Encap => write!(f, "IPv6-in-IPv4"),
            IpProtocol::Gre => write!(f, "GRE"),
            IpProtocol::Esp => write!(f, "ESP"),
            IpProtocol::Ah => write!(f, "AH"),
            IpProtocol::Icmpv6 => write!(f, "ICMP6"),
            IpProtocol::Ospf => write!(f, "OSPF"),
            IpProtocol::Sctp => write!(f, "SCTP"),
            IpProtocol::Other(number) => write!(f, "IP-PROTO-{number}"),
        }
    }
}

/// Non-IPv4 frame types, keyed off the ethertype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameType {
    Arp,
    Rarp,
    Ipv6,
    Mpls,
    PppoeDiscovery,
    PppoeSession,
    Lldp,
    /// 802.3 frame; the ethertype field holds a length.
    Llc,
    Unknown,
}

impl FrameType {
    pub fn from_ethertype(ether_type: u16) -> Self {
        match ether_type {
            0x0000..=0x05dc => FrameType::Llc,
            0x0806 => FrameType::Arp,
            0x8035 => FrameType::Rarp,
            0x86dd => FrameType::Ipv6,
            0x8847 | 0x8848 => FrameType::Mpls,
            0x8863 => FrameType::PppoeDiscovery,
            0x8864 => FrameType::PppoeSession,
            0x88cc => FrameType::Lldp,
            _ => FrameType::Unknown,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FrameType::Arp => "ARP",
            FrameType::Rarp => "RARP",
            FrameType::Ipv6 => "IP6",
            FrameType::Mpls => "MPLS",
            FrameType::PppoeDiscovery => "PPPoE-Discovery",
            FrameType::PppoeSession => "PPPoE",
            FrameType::Lldp => "LLDP",
            FrameType::Llc => "LLC",
            FrameType::Unknown => UNKNOWN_PROTOCOL,
        };
        write!(f, "{name}")
    }
}

/// Identifier used to classify and count records. The two id-spaces are separate variants and
/// cannot collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolId {
    Ip(IpProtocol),
    Frame(FrameType),
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolId::Ip(protocol) => protocol.fmt(f),
            ProtocolId::Frame(frame_type) => frame_type.fmt(f),
        }
    }
}

/// Name <-> id table for the protocols observed in one capture.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProtocolRegistry {
    by_name: BTreeMap<String, ProtocolId>,
    by_id: BTreeMap<ProtocolId, String>,
}

impl ProtocolRegistry {
    /// Records `id` if unseen and returns its name.
    pub fn register(&mut self, id: ProtocolId) -> &str {
        if !self.by_id.contains_key(&id) {
            let name = id.to_string();
            debug_assert!(
                !self.by_name.contains_key(&name),
                "protocol name {name} already maps to {:?}",
                self.by_name.get(&name)
            );
            log::debug!("Registering protocol {name}");
            self.by_name.insert(name.clone(), id);
            self.by_id.insert(id, name);
        }
        &self.by_id[&id]
    }

    pub fn id(&self, name: &str) -> Option<ProtocolId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: ProtocolId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Observed protocols, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ProtocolId)> {
        self.by_name.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// The parsed capture: every record in capture order plus per-protocol counts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Capture {
    pub records: Vec<Record>,
    pub counts: BTreeMap<String, usize>,
    pub registry: ProtocolRegistry,
}

impl Capture {
    /// Appends a record, classifies it and bumps its protocol counter.
    pub fn push(&mut self, timestamp: f64, raw: Vec<u8>) -> ProtocolId {
        let id = decode_frame(&raw).protocol_id();
        if id == ProtocolId::Frame(FrameType::Unknown) {
            log::error!("Unknown or unsupported packet detected (record {})", self.records.len());
        }

        let name = self.registry.register(id);
        *self.counts.entry(name.to_string()).or_insert(0) += 1;

        self.records.push(Record {
            index: self.records.len(),
            timestamp,
            raw,
        });
        id
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    /// Records paired with their decoded frame.
    pub fn frames(&self) -> impl Iterator<Item = (&Record, Frame<'_>)> {
        self.records.iter().map(|record| (record, decode_frame(&record.raw)))
    }
}

/// Classification of one raw frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Frame<'a> {
    Ip(IpView<'a>),
    Other(FrameType),
}

impl<'a> Frame<'a> {
    pub fn protocol_id(&self) -> ProtocolId {
        match self {
            Frame::Ip(ip) => ProtocolId::Ip(ip.protocol),
            Frame::Other(frame_type) => ProtocolId::Frame(*frame_type),
        }
    }

    pub fn ip(&self) -> Option<&IpView<'a>> {
        match self {
            Frame::Ip(ip) => Some(ip),
            Frame::Other(_) => None,
        }
    }
}

/// IPv4 header fields of a frame, borrowing the record bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IpView<'a> {
    pub protocol: IpProtocol,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub payload: &'a [u8],
}

impl<'a> IpView<'a> {
    /// The TCP segment carried by this packet, if it is TCP and the header parses.
    pub fn tcp(&self) -> Option<TcpSegment<'a>> {
        if self.protocol != IpProtocol::Tcp {
            return None;
        }
        decode_tcp(self.payload)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    pub source_port: u16,
    pub destination_port: u16,
    pub payload: &'a [u8],
}

/// Conversation key. Pairs are ordered and not normalised, so A->B and B->A are distinct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationKey {
    Pair {
        source: Ipv4Addr,
        destination: Ipv4Addr,
    },
    /// Frames without an IPv4 header.
    Unresolved,
}

impl ConversationKey {
    pub fn endpoints(&self) -> (String, String) {
        match self {
            ConversationKey::Pair { source, destination } => (source.to_string(), destination.to_string()),
            ConversationKey::Unresolved => ("Unable to".to_string(), "Calculate".to_string()),
        }
    }
}

/// Addresses seen in SMTP envelopes. `inbound` holds recipients, `outbound` senders.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EmailSet {
    pub inbound: BTreeSet<String>,
    pub outbound: BTreeSet<String>,
}

impl EmailSet {
    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty() && self.outbound.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HistogramBucket {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProtocolSummary {
    pub protocol: String,
    pub packets: usize,
    pub first: Option<f64>,
    pub last: Option<f64>,
    pub average_length: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProtocolTimestamps {
    pub protocol: String,
    pub first: Option<f64>,
    pub last: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProtocolLength {
    pub protocol: String,
    pub average_length: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub source: String,
    pub destination: String,
    pub packets: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DestinationCount {
    pub address: Ipv4Addr,
    pub packets: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrafficGraph {
    pub interval: f64,
    pub protocol: Option<String>,
    pub buckets: Vec<HistogramBucket>,
    pub threshold: Option<f64>,
}

/// Result of one analysis operation, handed to the output layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "operation", content = "result", rename_all = "snake_case")]
pub enum Report {
    Summary(Vec<ProtocolSummary>),
    ImageUris(Vec<String>),
    Filenames(Vec<String>),
    Emails(EmailSet),
    Conversations(Vec<ConversationSummary>),
    AverageLengths(Vec<ProtocolLength>),
    Timestamps(Vec<ProtocolTimestamps>),
    Destinations(Vec<DestinationCount>),
    /// `None` when the capture holds no records to plot.
    Graph(Option<TrafficGraph>),
}
