//! Contains utilities and helper functions that aid in capture loading and frame decoding.
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::DateTime;
use etherparse::{Ethernet2HeaderSlice, Ipv4HeaderSlice, SingleVlanHeaderSlice, TcpHeaderSlice};
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{create_reader, Block, Linktype, PcapBlockOwned, PcapError};

use super::containers::{Capture, Frame, FrameType, IpProtocol, IpView, TcpSegment};
use crate::error::{AnalyserError, Result};

/// Initial buffer handed to the streaming pcap reader.
pub const READER_BUFFER_SIZE: usize = 65536;

/// The reader buffer doubles for oversized records up to this size.
pub const MAX_READER_BUFFER_SIZE: usize = 64 * 1024 * 1024;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const MAX_VLAN_TAGS: usize = 2;

/// pcapng default when an interface carries no `if_tsresol` option: microseconds.
const DEFAULT_TS_RESOLUTION: f64 = 1_000_000.0;

/// Timestamp encoding declared by one pcapng interface description block.
#[derive(Clone, Copy, Debug, PartialEq)]
struct InterfaceClock {
    /// Ticks per second.
    resolution: f64,
    /// Seconds added to every timestamp (`if_tsoffset`).
    offset: i64,
}

impl Default for InterfaceClock {
    fn default() -> Self {
        InterfaceClock {
            resolution: DEFAULT_TS_RESOLUTION,
            offset: 0,
        }
    }
}

impl InterfaceClock {
    fn seconds(&self, ts_high: u32, ts_low: u32) -> f64 {
        let ticks = (u64::from(ts_high) << 32) | u64::from(ts_low);
        self.offset as f64 + ticks as f64 / self.resolution
    }
}

/// Loads a pcap/pcapng file into memory.
///
/// Calls [parse_capture] on a buffered reader over the file.
pub fn load_file(filepath: &Path) -> Result<Capture> {
    log::info!("Loading capture file.");
    let file = File::open(filepath)?;
    log::info!("Reading from {}", filepath.display());

    let capture = parse_capture(BufReader::new(file))?;
    log::info!("Finished parsing. Found {} packets", capture.total());

    Ok(capture)
}

/// Reads capture blocks strictly in file order and builds the [Capture].
///
/// Both legacy pcap and pcapng are accepted. Any header or block that fails to decode aborts the
/// whole parse with [AnalyserError::InvalidCaptureFormat]; no partial capture is returned.
pub fn parse_capture<R: Read>(source: R) -> Result<Capture> {
    let mut buffer_size = READER_BUFFER_SIZE;
    let mut reader = create_reader(buffer_size, source)
        .map_err(|e| AnalyserError::InvalidCaptureFormat(format!("{e:?}")))?;

    let mut capture = Capture::default();
    let mut legacy_nanos = false;
    let mut interfaces: Vec<InterfaceClock> = Vec::new();

    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(header) => {
                        legacy_nanos = header.is_nanosecond_precision();
                        if header.network != Linktype::ETHERNET {
                            log::warn!("Link type {:?} is not Ethernet; frames will classify as unknown", header.network);
                        }
                    }
                    PcapBlockOwned::Legacy(packet) => {
                        let divisor = if legacy_nanos { 1e9 } else { 1e6 };
                        let timestamp = f64::from(packet.ts_sec) + f64::from(packet.ts_usec) / divisor;
                        capture.push(timestamp, packet.data.to_vec());
                    }
                    PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                        // New section, interface ids restart
                        interfaces.clear();
                    }
                    PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                        if idb.linktype != Linktype::ETHERNET {
                            log::warn!("Interface {} link type {:?} is not Ethernet", interfaces.len(), idb.linktype);
                        }
                        interfaces.push(InterfaceClock {
                            resolution: ts_resolution(idb.if_tsresol),
                            offset: idb.if_tsoffset,
                        });
                    }
                    PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                        let clock = match interfaces.get(epb.if_id as usize) {
                            Some(clock) => *clock,
                            None => {
                                log::warn!("Packet refers to undeclared interface {}", epb.if_id);
                                InterfaceClock::default()
                            }
                        };
                        capture.push(clock.seconds(epb.ts_high, epb.ts_low), epb.packet_data().to_vec());
                    }
                    PcapBlockOwned::NG(Block::SimplePacket(_)) => {
                        log::warn!("Skipping pcapng simple packet block: it carries no timestamp");
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| AnalyserError::InvalidCaptureFormat(format!("{e:?}")))?;
            }
            Err(PcapError::BufferTooSmall) => {
                // A single record does not fit, make room for it and read on
                let grown = buffer_size * 2;
                if grown > MAX_READER_BUFFER_SIZE || !reader.grow(grown) {
                    return Err(AnalyserError::InvalidCaptureFormat(format!(
                        "record larger than {buffer_size} bytes"
                    )));
                }
                log::debug!("Reader buffer grown to {grown} bytes");
                buffer_size = grown;
                reader
                    .refill()
                    .map_err(|e| AnalyserError::InvalidCaptureFormat(format!("{e:?}")))?;
            }
            Err(e) => return Err(AnalyserError::InvalidCaptureFormat(format!("{e:?}"))),
        }
    }

    Ok(capture)
}

/// Ticks per second encoded by a pcapng `if_tsresol` option.
///
/// The high bit selects a power of two, otherwise a power of ten.
fn ts_resolution(if_tsresol: u8) -> f64 {
    let exponent = i32::from(if_tsresol & 0x7f);
    if if_tsresol & 0x80 != 0 {
        2f64.powi(exponent)
    } else {
        10f64.powi(exponent)
    }
}

/// Classifies one raw Ethernet frame. Never fails; anything undecodable is [FrameType::Unknown].
pub fn decode_frame(raw: &[u8]) -> Frame<'_> {
    let ethernet = match Ethernet2HeaderSlice::from_slice(raw) {
        Ok(ethernet) => ethernet,
        Err(_) => return Frame::Other(FrameType::Unknown),
    };

    let mut ether_type = ethernet.ether_type().0;
    let mut rest = &raw[ethernet.slice().len()..];

    for _ in 0..MAX_VLAN_TAGS {
        if ether_type != ETHERTYPE_VLAN && ether_type != ETHERTYPE_QINQ {
            break;
        }
        match SingleVlanHeaderSlice::from_slice(rest) {
            Ok(vlan) => {
                ether_type = vlan.ether_type().0;
                rest = &rest[vlan.slice().len()..];
            }
            Err(_) => return Frame::Other(FrameType::Unknown),
        }
    }

    if ether_type == ETHERTYPE_IPV4 {
        return match decode_ipv4(rest) {
            Some(ip) => Frame::Ip(ip),
            None => Frame::Other(FrameType::Unknown),
        };
    }

    Frame::Other(FrameType::from_ethertype(ether_type))
}

/// Payload is bounded by the IPv4 total length so Ethernet padding is dropped.
fn decode_ipv4(data: &[u8]) -> Option<IpView<'_>> {
    let header = Ipv4HeaderSlice::from_slice(data).ok()?;
    let header_len = header.slice().len();
    let end = usize::from(header.total_len()).clamp(header_len, data.len());

    Some(IpView {
        protocol: IpProtocol::from_number(header.protocol().0),
        source: header.source_addr(),
        destination: header.destination_addr(),
        payload: &data[header_len..end],
    })
}

pub fn decode_tcp(segment: &[u8]) -> Option<TcpSegment<'_>> {
    let header = TcpHeaderSlice::from_slice(segment).ok()?;
    Some(TcpSegment {
        source_port: header.source_port(),
        destination_port: header.destination_port(),
        payload: &segment[header.slice().len()..],
    })
}

/// Formats capture seconds as a UTC wall-clock time with millisecond precision.
pub fn format_timestamp(timestamp: f64) -> String {
    let seconds = timestamp.floor();
    let nanos = (((timestamp - seconds) * 1e9).round() as u32).min(999_999_999);

    match DateTime::from_timestamp(seconds as i64, nanos) {
        Some(datetime) => datetime.format("%H:%M:%S%.3f").to_string(),
        None => timestamp.to_string(),
    }
}
