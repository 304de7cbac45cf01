//! Synthetic frames and in-memory pcap files for tests.
use super::containers::Capture;
use super::utils::parse_capture;

pub fn ethernet(ether_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x02, 0, 0, 0, 0, 0x02, 0x02, 0, 0, 0, 0, 0x01];
    frame.extend_from_slice(&ether_type.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Minimal IPv4 header (no options, checksum left at zero) followed by `payload`.
pub fn ipv4(protocol: u8, source: [u8; 4], destination: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let total_len = (20 + payload.len()) as u16;
    let mut packet = vec![0x45, 0x00];
    packet.extend_from_slice(&total_len.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x01, 0x40, 0x00, 64, protocol, 0x00, 0x00]);
    packet.extend_from_slice(&source);
    packet.extend_from_slice(&destination);
    packet.extend_from_slice(payload);
    packet
}

pub fn tcp(source_port: u16, destination_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut segment = Vec::with_capacity(20 + payload.len());
    segment.extend_from_slice(&source_port.to_be_bytes());
    segment.extend_from_slice(&destination_port.to_be_bytes());
    segment.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0]);
    segment.extend_from_slice(&[0x50, 0x18, 0xff, 0xff, 0, 0, 0, 0]);
    segment.extend_from_slice(payload);
    segment
}

pub fn udp(source_port: u16, destination_port: u16, payload: &[u8]) -> Vec<u8> {
    let length = (8 + payload.len()) as u16;
    let mut datagram = Vec::with_capacity(length as usize);
    datagram.extend_from_slice(&source_port.to_be_bytes());
    datagram.extend_from_slice(&destination_port.to_be_bytes());
    datagram.extend_from_slice(&length.to_be_bytes());
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(payload);
    datagram
}

pub fn tcp_frame(source: [u8; 4], destination: [u8; 4], source_port: u16, destination_port: u16, payload: &[u8]) -> Vec<u8> {
    ethernet(0x0800, &ipv4(6, source, destination, &tcp(source_port, destination_port, payload)))
}

pub fn udp_frame(source: [u8; 4], destination: [u8; 4], source_port: u16, destination_port: u16, payload: &[u8]) -> Vec<u8> {
    ethernet(0x0800, &ipv4(17, source, destination, &udp(source_port, destination_port, payload)))
}

/// ARP who-has request.
pub fn arp_frame() -> Vec<u8> {
    let mut arp = vec![0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01];
    arp.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01, 10, 0, 0, 1]);
    arp.extend_from_slice(&[0, 0, 0, 0, 0, 0, 10, 0, 0, 2]);
    ethernet(0x0806, &arp)
}

/// Little-endian legacy pcap, microsecond timestamps, Ethernet link type.
pub fn pcap(records: &[(f64, Vec<u8>)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&0i32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&262144u32.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());

    for (timestamp, frame) in records {
        let seconds = timestamp.floor();
        let micros = ((timestamp - seconds) * 1e6).round() as u32;
        bytes.extend_from_slice(&(seconds as u32).to_le_bytes());
        bytes.extend_from_slice(&micros.to_le_bytes());
        bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        bytes.extend_from_slice(frame);
    }
    bytes
}

/// Little-endian pcapng stream, built block by block.
pub struct PcapNg {
    bytes: Vec<u8>,
}

impl PcapNg {
    /// Starts with a section header block.
    pub fn new() -> Self {
        PcapNg { bytes: Vec::new() }.section()
    }

    fn block(mut self, block_type: u32, body: &[u8]) -> Self {
        let padded = (body.len() + 3) / 4 * 4;
        let total = (12 + padded) as u32;
        self.bytes.extend_from_slice(&block_type.to_le_bytes());
        self.bytes.extend_from_slice(&total.to_le_bytes());
        self.bytes.extend_from_slice(body);
        self.bytes.resize(self.bytes.len() + padded - body.len(), 0);
        self.bytes.extend_from_slice(&total.to_le_bytes());
        self
    }

    /// New section; interface ids start over.
    pub fn section(self) -> Self {
        let mut body = Vec::new();
        body.extend_from_slice(&0x1a2b_3c4du32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(-1i64).to_le_bytes());
        self.block(0x0a0d_0d0a, &body)
    }

    /// Ethernet interface with optional `if_tsresol` and `if_tsoffset`.
    pub fn interface(self, tsresol: Option<u8>, tsoffset: Option<i64>) -> Self {
        let mut body = Vec::new();
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&262144u32.to_le_bytes());
        if let Some(resolution) = tsresol {
            body.extend_from_slice(&9u16.to_le_bytes());
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&[resolution, 0, 0, 0]);
        }
        if let Some(offset) = tsoffset {
            body.extend_from_slice(&14u16.to_le_bytes());
            body.extend_from_slice(&8u16.to_le_bytes());
            body.extend_from_slice(&offset.to_le_bytes());
        }
        if tsresol.is_some() || tsoffset.is_some() {
            body.extend_from_slice(&[0, 0, 0, 0]);
        }
        self.block(0x0000_0001, &body)
    }

    /// Enhanced packet block; `ticks` is in the interface's resolution.
    pub fn packet(self, interface: u32, ticks: u64, frame: &[u8]) -> Self {
        let mut body = Vec::new();
        body.extend_from_slice(&interface.to_le_bytes());
        body.extend_from_slice(&((ticks >> 32) as u32).to_le_bytes());
        body.extend_from_slice(&(ticks as u32).to_le_bytes());
        body.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        body.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        body.extend_from_slice(frame);
        self.block(0x0000_0006, &body)
    }

    pub fn simple_packet(self, frame: &[u8]) -> Self {
        let mut body = Vec::new();
        body.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        body.extend_from_slice(frame);
        self.block(0x0000_0003, &body)
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn capture(records: &[(f64, Vec<u8>)]) -> Capture {
    parse_capture(&pcap(records)[..]).expect("synthetic capture parses")
}

/// 3 TCP (2 to 10.0.0.2, 1 to 10.0.0.3), 1 UDP, 1 ARP, one second apart.
pub fn mixed_capture() -> Capture {
    capture(&[
        (100.0, tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 80, b"")),
        (101.0, tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 80, b"abc")),
        (102.0, tcp_frame([10, 0, 0, 1], [10, 0, 0, 3], 40001, 443, b"")),
        (103.0, udp_frame([10, 0, 0, 1], [8, 8, 8, 8], 5353, 53, b"q")),
        (104.0, arp_frame()),
    ])
}
