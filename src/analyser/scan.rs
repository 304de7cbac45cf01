//! Scanners that pull application-layer artifacts out of a [Capture].
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use super::containers::{
    Capture, ConversationKey, ConversationSummary, DestinationCount, EmailSet, Frame, TcpSegment,
};
use super::utils::decode_frame;

/// Recorded image URIs are cut to this many characters.
pub const MAX_URI_LENGTH: usize = 45;

pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "gif", "png", "ico"];
pub const DEFAULT_SMTP_PORTS: [u16; 4] = [25, 465, 2525, 587];

const HTTP_METHODS: [&str; 24] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
    "COPY", "LOCK", "MOVE", "POLL", "ICY", "MKCOL", "MERGE", "LABEL", "SEARCH",
    "UNLOCK", "REPORT", "UPDATE", "NOTIFY", "PROPFIND", "PROPPATCH",
];

lazy_static! {
    static ref FROM_PATTERN: Regex = Regex::new(r"FROM:\s*<([\w.-]+@[\w.-]+\.[\w.-]+)>").unwrap();
    static ref TO_PATTERN: Regex = Regex::new(r"TO:\s*<([\w.-]+@[\w.-]+\.[\w.-]+)>").unwrap();
}

/// Why a TCP payload was not accepted as an HTTP request.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is empty")]
    Empty,
    #[error("request line is not text")]
    NotText,
    #[error("not an HTTP request line")]
    NotHttp,
    #[error("request header block is incomplete")]
    Truncated,
}

#[derive(Debug, PartialEq, Eq)]
pub struct HttpRequest<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub version: &'a str,
}

/// Parses an HTTP request line and checks that its header block is complete.
pub fn parse_http_request(payload: &[u8]) -> Result<HttpRequest<'_>, PayloadError> {
    if payload.is_empty() {
        return Err(PayloadError::Empty);
    }

    let line_end = payload
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(PayloadError::Truncated)?;
    let line = std::str::from_utf8(&payload[..line_end])
        .map_err(|_| PayloadError::NotText)?
        .trim_end_matches('\r');

    let mut parts = line.split_whitespace();
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(uri), Some(version), None) => (method, uri, version),
        _ => return Err(PayloadError::NotHttp),
    };
    if !HTTP_METHODS.contains(&method) || !version.starts_with("HTTP/") {
        return Err(PayloadError::NotHttp);
    }

    if !headers_complete(&payload[line_end + 1..]) {
        return Err(PayloadError::Truncated);
    }

    Ok(HttpRequest { method, uri, version })
}

/// True once the blank line ending the header block has arrived.
fn headers_complete(rest: &[u8]) -> bool {
    rest.starts_with(b"\r\n")
        || rest.starts_with(b"\n")
        || rest.windows(3).any(|w| w == b"\n\r\n")
        || rest.windows(2).any(|w| w == b"\n\n")
}

fn tcp_segments(capture: &Capture) -> impl Iterator<Item = TcpSegment<'_>> {
    capture.records.iter().filter_map(|record| match decode_frame(&record.raw) {
        Frame::Ip(ip) => ip.tcp(),
        Frame::Other(_) => None,
    })
}

/// Finds all requested URIs that name an image file.
///
/// A URI matches when its lower-cased form contains `.<ext>` for one of `extensions`.
pub fn image_uris<S: AsRef<str>>(capture: &Capture, extensions: &[S]) -> Vec<String> {
    let suffixes: Vec<String> = extensions
        .iter()
        .map(|ext| format!(".{}", ext.as_ref().trim_start_matches('.').to_lowercase()))
        .collect();
    log::info!("Finding image URIs with extensions {suffixes:?}");

    let mut uris = Vec::new();
    for segment in tcp_segments(capture) {
        let request = match parse_http_request(segment.payload) {
            Ok(request) => request,
            Err(_) => continue,
        };

        let uri_lower = request.uri.to_lowercase();
        if suffixes.iter().any(|suffix| uri_lower.contains(suffix.as_str())) {
            uris.push(request.uri.chars().take(MAX_URI_LENGTH).collect());
        }
    }
    uris
}

/// Strips path and query string from each URI.
pub fn filenames(uris: &[String]) -> Vec<String> {
    uris.iter()
        .map(|uri| {
            let name = uri.rsplit('/').next().unwrap_or(uri);
            name.split('?').next().unwrap_or(name).to_string()
        })
        .collect()
}

/// Collects envelope addresses from SMTP traffic on any of `ports`.
pub fn smtp_emails(capture: &Capture, ports: &[u16]) -> EmailSet {
    log::info!("Finding emails via SMTP on ports: {ports:?}");
    let mut emails = EmailSet::default();

    for segment in tcp_segments(capture) {
        if !ports.contains(&segment.source_port) && !ports.contains(&segment.destination_port) {
            continue;
        }

        let text = String::from_utf8_lossy(segment.payload);
        emails
            .outbound
            .extend(FROM_PATTERN.captures_iter(&text).map(|c| c[1].to_string()));
        emails
            .inbound
            .extend(TO_PATTERN.captures_iter(&text).map(|c| c[1].to_string()));
    }
    emails
}

/// Groups frames by (source, destination), preserving arrival order within each group.
pub fn conversations(capture: &Capture) -> BTreeMap<ConversationKey, Vec<Frame<'_>>> {
    log::info!("Getting conversations");
    let mut conversations: BTreeMap<ConversationKey, Vec<Frame<'_>>> = BTreeMap::new();

    for (_, frame) in capture.frames() {
        let key = match &frame {
            Frame::Ip(ip) => ConversationKey::Pair {
                source: ip.source,
                destination: ip.destination,
            },
            Frame::Other(_) => ConversationKey::Unresolved,
        };
        conversations.entry(key).or_default().push(frame);
    }
    conversations
}

/// Busiest conversations first.
pub fn conversation_summaries(conversations: &BTreeMap<ConversationKey, Vec<Frame<'_>>>) -> Vec<ConversationSummary> {
    let mut ordered: Vec<(&ConversationKey, usize)> = conversations
        .iter()
        .map(|(key, frames)| (key, frames.len()))
        .collect();
    // Stable sort keeps key order among ties
    ordered.sort_by(|a, b| b.1.cmp(&a.1));

    ordered
        .into_iter()
        .map(|(key, packets)| {
            let (source, destination) = key.endpoints();
            ConversationSummary { source, destination, packets }
        })
        .collect()
}

/// Number of IPv4 packets sent to each destination address.
pub fn destination_counts(capture: &Capture) -> Vec<DestinationCount> {
    let mut counts: BTreeMap<Ipv4Addr, usize> = BTreeMap::new();
    for (_, frame) in capture.frames() {
        if let Some(ip) = frame.ip() {
            *counts.entry(ip.destination).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .map(|(address, packets)| DestinationCount { address, packets })
        .collect()
}
