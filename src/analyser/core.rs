//! Per-protocol statistics and dispatch of the analysis operations.
use clap::ValueEnum;

use super::containers::{
    Capture, ProtocolId, ProtocolLength, ProtocolSummary, ProtocolTimestamps, Record, Report,
};
use super::utils::decode_frame;
use super::{histogram, scan};
use crate::config::AnalyserConfig;

/// The analyses that can be requested from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Per-protocol packet counts, timestamps and lengths
    Summarise,
    /// Image URIs requested over HTTP
    Uris,
    /// Filenames taken from the image URIs
    Filenames,
    /// Addresses from SMTP envelopes
    Emails,
    /// Packets per source/destination pair
    Conversations,
    /// Average packet length per protocol
    Plength,
    /// First and last timestamp per protocol
    Timestamps,
    /// Geolocated destination addresses as KML
    Kml,
    /// Packets over time with heavy traffic threshold
    Graph,
    /// Every operation above
    All,
}

impl Operation {
    /// Every concrete operation, in the order `All` runs them.
    pub const EACH: [Operation; 9] = [
        Operation::Summarise,
        Operation::Uris,
        Operation::Filenames,
        Operation::Emails,
        Operation::Conversations,
        Operation::Plength,
        Operation::Timestamps,
        Operation::Kml,
        Operation::Graph,
    ];
}

/// Runs one operation against the capture.
pub fn execute(operation: Operation, capture: &Capture, config: &AnalyserConfig) -> Vec<Report> {
    log::info!("'{:?}' command executed", operation);

    match operation {
        Operation::Summarise => vec![Report::Summary(summarise(capture))],
        Operation::Uris => vec![Report::ImageUris(scan::image_uris(capture, &config.image_extensions))],
        Operation::Filenames => {
            let uris = scan::image_uris(capture, &config.image_extensions);
            vec![Report::Filenames(scan::filenames(&uris))]
        }
        Operation::Emails => vec![Report::Emails(scan::smtp_emails(capture, &config.smtp_ports))],
        Operation::Conversations => {
            vec![Report::Conversations(scan::conversation_summaries(&scan::conversations(capture)))]
        }
        Operation::Plength => vec![Report::AverageLengths(average_lengths(capture))],
        Operation::Timestamps => vec![Report::Timestamps(timestamps(capture))],
        Operation::Kml => vec![Report::Destinations(scan::destination_counts(capture))],
        Operation::Graph => {
            let protocol = match config.graph_protocol.as_deref() {
                None => None,
                Some(name) => match capture.registry.id(name) {
                    Some(id) => Some(id),
                    None => {
                        log::warn!("Protocol {name} does not occur in this capture; nothing to graph");
                        return vec![Report::Graph(None)];
                    }
                },
            };
            vec![Report::Graph(histogram::traffic_graph(capture, config.graph_interval, protocol))]
        }
        Operation::All => Operation::EACH
            .iter()
            .flat_map(|operation| execute(*operation, capture, config))
            .collect(),
    }
}

fn matching(capture: &Capture, protocol: ProtocolId) -> impl Iterator<Item = &Record> {
    capture
        .records
        .iter()
        .filter(move |record| decode_frame(&record.raw).protocol_id() == protocol)
}

/// Earliest and latest timestamp among records of `protocol`, or `None` when there are none.
pub fn first_last(capture: &Capture, protocol: ProtocolId) -> Option<(f64, f64)> {
    log::info!("Finding first and last timestamps for protocol: {protocol}");
    matching(capture, protocol).fold(None, |span, record| match span {
        None => Some((record.timestamp, record.timestamp)),
        Some((first, last)) => Some((first.min(record.timestamp), last.max(record.timestamp))),
    })
}

/// Mean raw frame length of records of `protocol`, or `None` when there are none.
pub fn average_length(capture: &Capture, protocol: ProtocolId) -> Option<f64> {
    log::info!("Finding avg packet length for protocol: {protocol}");
    let (total, count) = matching(capture, protocol)
        .fold((0usize, 0usize), |(total, count), record| (total + record.raw.len(), count + 1));

    if count == 0 {
        return None;
    }
    Some(total as f64 / count as f64)
}

pub fn summarise(capture: &Capture) -> Vec<ProtocolSummary> {
    capture
        .counts
        .iter()
        .map(|(name, packets)| {
            let id = capture.registry.id(name);
            let span = id.and_then(|id| first_last(capture, id));
            ProtocolSummary {
                protocol: name.clone(),
                packets: *packets,
                first: span.map(|(first, _)| first),
                last: span.map(|(_, last)| last),
                average_length: id.and_then(|id| average_length(capture, id)),
            }
        })
        .collect()
}

pub fn average_lengths(capture: &Capture) -> Vec<ProtocolLength> {
    capture
        .registry
        .iter()
        .map(|(name, id)| ProtocolLength {
            protocol: name.to_string(),
            average_length: average_length(capture, id),
        })
        .collect()
}

pub fn timestamps(capture: &Capture) -> Vec<ProtocolTimestamps> {
    capture
        .registry
        .iter()
        .map(|(name, id)| {
            let span = first_last(capture, id);
            ProtocolTimestamps {
                protocol: name.to_string(),
                first: span.map(|(first, _)| first),
                last: span.map(|(_, last)| last),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::containers::{FrameType, IpProtocol};
    use crate::analyser::testdata;

    const TCP: ProtocolId = ProtocolId::Ip(IpProtocol::Tcp);
    const ARP: ProtocolId = ProtocolId::Frame(FrameType::Arp);

    #[test]
    fn counts_cover_every_record() {
        let capture = testdata::mixed_capture();

        assert_eq!(capture.counts.values().sum::<usize>(), capture.total());
        assert_eq!(capture.counts.len(), 3);
        assert_eq!(capture.counts["TCP"], 3);
        assert_eq!(capture.counts["UDP"], 1);
        assert_eq!(capture.counts["ARP"], 1);
    }

    #[test]
    fn parsing_is_deterministic() {
        let records = [
            (5.0, testdata::tcp_frame([1, 2, 3, 4], [5, 6, 7, 8], 1, 2, b"x")),
            (5.0, testdata::arp_frame()),
            (6.5, testdata::ethernet(0x9999, b"??")),
        ];
        assert_eq!(testdata::capture(&records), testdata::capture(&records));
    }

    #[test]
    fn first_last_finds_true_extremes() {
        // Out of capture order on purpose
        let capture = testdata::capture(&[
            (50.0, testdata::tcp_frame([1, 1, 1, 1], [2, 2, 2, 2], 1, 2, b"")),
            (10.0, testdata::tcp_frame([1, 1, 1, 1], [2, 2, 2, 2], 1, 2, b"")),
            (5.0, testdata::arp_frame()),
            (70.0, testdata::tcp_frame([1, 1, 1, 1], [2, 2, 2, 2], 1, 2, b"")),
        ]);

        assert_eq!(first_last(&capture, TCP), Some((10.0, 70.0)));
        assert_eq!(first_last(&capture, ARP), Some((5.0, 5.0)));
        assert_eq!(first_last(&capture, ProtocolId::Ip(IpProtocol::Udp)), None);
    }

    #[test]
    fn average_length_divides_total_bytes_by_matches() {
        let capture = testdata::mixed_capture();
        let tcp_lengths: Vec<usize> = capture
            .frames()
            .filter(|(_, frame)| frame.protocol_id() == TCP)
            .map(|(record, _)| record.raw.len())
            .collect();
        let expected = tcp_lengths.iter().sum::<usize>() as f64 / tcp_lengths.len() as f64;

        assert_eq!(average_length(&capture, TCP), Some(expected));
        assert_eq!(average_length(&capture, ARP), Some(42.0));
        assert_eq!(average_length(&capture, ProtocolId::Ip(IpProtocol::Icmp)), None);
    }

    #[test]
    fn unknown_frames_still_have_statistics() {
        let capture = testdata::capture(&[(1.0, testdata::ethernet(0x9999, b"abcd"))]);
        let unknown = ProtocolId::Frame(FrameType::Unknown);

        assert_eq!(capture.counts["Unknown Protocol"], 1);
        assert_eq!(average_length(&capture, unknown), Some(18.0));
        assert_eq!(first_last(&capture, unknown), Some((1.0, 1.0)));
    }

    #[test]
    fn summary_has_a_row_per_observed_protocol() {
        let summary = summarise(&testdata::mixed_capture());
        let names: Vec<&str> = summary.iter().map(|row| row.protocol.as_str()).collect();
        assert_eq!(names, ["ARP", "TCP", "UDP"]);

        let tcp = &summary[1];
        assert_eq!(tcp.packets, 3);
        assert_eq!(tcp.first, Some(100.0));
        assert_eq!(tcp.last, Some(102.0));
        assert!(tcp.average_length.is_some());
    }

    #[test]
    fn tunnelled_and_native_ipv6_are_counted_apart() {
        let tunnelled = testdata::ethernet(0x0800, &testdata::ipv4(41, [10, 0, 0, 1], [10, 0, 0, 2], &[0u8; 26]));
        let native = testdata::ethernet(0x86dd, &[0u8; 40]);
        let capture = testdata::capture(&[(1.0, tunnelled.clone()), (2.0, tunnelled), (3.0, native)]);

        assert_eq!(capture.counts["IPv6-in-IPv4"], 2);
        assert_eq!(capture.counts["IP6"], 1);
        assert_eq!(capture.registry.len(), 2);

        let summary = summarise(&capture);
        let native = &summary[0];
        assert_eq!((native.protocol.as_str(), native.packets), ("IP6", 1));
        assert_eq!((native.first, native.last, native.average_length), (Some(3.0), Some(3.0), Some(54.0)));
        let tunnelled = &summary[1];
        assert_eq!((tunnelled.protocol.as_str(), tunnelled.packets), ("IPv6-in-IPv4", 2));
        assert_eq!((tunnelled.first, tunnelled.last, tunnelled.average_length), (Some(1.0), Some(2.0), Some(60.0)));
    }

    #[test]
    fn empty_capture_yields_empty_tables() {
        let capture = Capture::default();
        assert!(summarise(&capture).is_empty());
        assert!(average_lengths(&capture).is_empty());
        assert!(timestamps(&capture).is_empty());
    }

    #[test]
    fn all_runs_every_operation_once() {
        let capture = testdata::mixed_capture();
        let reports = execute(Operation::All, &capture, &AnalyserConfig::default());

        assert_eq!(reports.len(), Operation::EACH.len());
        assert!(matches!(reports[0], Report::Summary(_)));
        assert!(matches!(reports[8], Report::Graph(Some(_))));
    }

    #[test]
    fn graph_for_an_absent_protocol_is_empty() {
        let capture = testdata::mixed_capture();
        let config = AnalyserConfig {
            graph_protocol: Some("ICMP".to_string()),
            ..AnalyserConfig::default()
        };
        assert_eq!(execute(Operation::Graph, &capture, &config), vec![Report::Graph(None)]);
    }
}
