use crate::analyser::containers::{Report, TrafficGraph};
use crate::analyser::utils::format_timestamp;
use crate::error::{AnalyserError, Result};
use ansi_term::Colour;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

pub const NO_PACKETS: &str = "No Supported Packets Detected";
pub const NO_URIS: &str = "No image URIs detected";
pub const NO_FILENAMES: &str = "No filenames detected";
pub const NO_EMAILS: &str = "No emails detected";
pub const NO_CONVERSATIONS: &str = "No conversations detected";
pub const NO_DESTINATIONS: &str = "No IPv4 destinations detected";
pub const NO_GRAPH: &str = "No packets to graph";
pub const UNDEFINED: &str = "Unable to Calculate";

/// Longest bar drawn by the traffic graph.
const BAR_WIDTH: usize = 50;

struct Table {
    title: &'static str,
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(title: &'static str, headers: Vec<&'static str>) -> Self {
        Self { title, headers, rows: Vec::new() }
    }

    fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render(&self, styled: bool) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = format!("\u{250F}\u{2501}\u{2501}\u{2501}\u{2501} {}\n", self.title);

        let header: Vec<String> = self
            .headers
            .iter()
            .zip(widths.iter().copied())
            .map(|(h, w)| {
                let padded = format!("{h:<w$}");
                if styled {
                    Colour::Fixed(226).paint(padded).to_string()
                } else {
                    padded
                }
            })
            .collect();
        out.push_str(&format!("\u{2503} {}\n", header.join("  ")));

        let rule: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(*w)).collect();
        out.push_str(&format!("\u{2503} {}\n", rule.join("  ")));

        for row in &self.rows {
            let cells: Vec<String> = row.iter().zip(widths.iter().copied()).map(|(c, w)| format!("{c:<w$}")).collect();
            out.push_str(&format!("\u{2503} {}\n", cells.join("  ").trim_end()));
        }
        out.push_str("\u{2517}\u{2501}\u{2501}\u{2501}\u{2501}");
        out
    }
}

fn timestamp_cell(timestamp: Option<f64>) -> String {
    timestamp.map(format_timestamp).unwrap_or_else(|| UNDEFINED.to_string())
}

fn length_cell(length: Option<f64>) -> String {
    length.map(|l| format!("{l:.2}")).unwrap_or_else(|| UNDEFINED.to_string())
}

/// Renders a report as a text table, or the matching "no data" sentinel.
pub fn render(report: &Report, styled: bool) -> String {
    match report {
        Report::Summary(rows) => {
            if rows.is_empty() {
                return NO_PACKETS.to_string();
            }
            let mut table = Table::new(
                "Summary",
                vec!["Protocol", "Number of Packets", "First timestamp", "Last timestamp", "Avg packet length"],
            );
            for row in rows {
                table.add_row(vec![
                    row.protocol.clone(),
                    row.packets.to_string(),
                    timestamp_cell(row.first),
                    timestamp_cell(row.last),
                    length_cell(row.average_length),
                ]);
            }
            table.render(styled)
        }
        Report::ImageUris(uris) => single_column("Image URIs", "URI", uris, NO_URIS, styled),
        Report::Filenames(names) => single_column("Filenames", "Filename", names, NO_FILENAMES, styled),
        Report::Emails(emails) => {
            if emails.is_empty() {
                return NO_EMAILS.to_string();
            }
            let mut table = Table::new("SMTP Emails", vec!["Address", "To/From"]);
            for address in &emails.outbound {
                table.add_row(vec![address.clone(), "From".to_string()]);
            }
            for address in &emails.inbound {
                table.add_row(vec![address.clone(), "To".to_string()]);
            }
            table.render(styled)
        }
        Report::Conversations(conversations) => {
            if conversations.is_empty() {
                return NO_CONVERSATIONS.to_string();
            }
            let mut table = Table::new("Conversations", vec!["Sender", "Recipient", "Packets Sent"]);
            for c in conversations {
                table.add_row(vec![c.source.clone(), c.destination.clone(), c.packets.to_string()]);
            }
            table.render(styled)
        }
        Report::AverageLengths(rows) => {
            if rows.is_empty() {
                return NO_PACKETS.to_string();
            }
            let mut table = Table::new("Average Packet Length", vec!["Protocol", "Avg Length"]);
            for row in rows {
                table.add_row(vec![row.protocol.clone(), length_cell(row.average_length)]);
            }
            table.render(styled)
        }
        Report::Timestamps(rows) => {
            if rows.is_empty() {
                return NO_PACKETS.to_string();
            }
            let mut table = Table::new("Timestamps", vec!["Protocol", "First Timestamp", "Last Timestamp"]);
            for row in rows {
                table.add_row(vec![row.protocol.clone(), timestamp_cell(row.first), timestamp_cell(row.last)]);
            }
            table.render(styled)
        }
        Report::Destinations(destinations) => {
            if destinations.is_empty() {
                return NO_DESTINATIONS.to_string();
            }
            let mut table = Table::new("Destinations", vec!["Address", "Packets Sent"]);
            for d in destinations {
                table.add_row(vec![d.address.to_string(), d.packets.to_string()]);
            }
            table.render(styled)
        }
        Report::Graph(None) => NO_GRAPH.to_string(),
        Report::Graph(Some(graph)) => render_graph(graph, styled),
    }
}

fn single_column(title: &'static str, header: &'static str, values: &[String], empty: &str, styled: bool) -> String {
    if values.is_empty() {
        return empty.to_string();
    }
    let mut table = Table::new(title, vec![header]);
    for value in values {
        table.add_row(vec![value.clone()]);
    }
    table.render(styled)
}

/// Horizontal bar chart of packets per interval. Bars above the threshold are red.
pub fn render_graph(graph: &TrafficGraph, styled: bool) -> String {
    let threshold = match graph.threshold {
        Some(threshold) => threshold,
        None => return "ERROR IN ANALYSIS - TIME PERIOD OF CAPTURE TOO SHORT".to_string(),
    };

    let title = match &graph.protocol {
        Some(protocol) => format!("Number Of {protocol} Packets Sent Over Time"),
        None => "Number Of Packets Sent Over Time".to_string(),
    };
    let mut out = format!("\u{250F}\u{2501}\u{2501}\u{2501}\u{2501} {title}\n");
    out.push_str(&format!(
        "\u{2503} Interval: {:.2}s  Heavy traffic threshold: {threshold:.2}\n",
        graph.interval
    ));

    let max = graph.buckets.iter().map(|b| b.count).max().unwrap_or(0).max(1);
    for bucket in &graph.buckets {
        let bar = "\u{2588}".repeat(bucket.count * BAR_WIDTH / max);
        let heavy = bucket.count as f64 > threshold;
        let bar = if styled && heavy {
            Colour::Red.paint(bar).to_string()
        } else {
            bar
        };
        let marker = if heavy { " !" } else { "" };
        out.push_str(&format!(
            "\u{2503} {} \u{2502}{bar} {}{marker}\n",
            format_timestamp(bucket.start),
            bucket.count
        ));
    }
    out.push_str("\u{2517}\u{2501}\u{2501}\u{2501}\u{2501}");
    out
}

pub fn print_results(reports: &[Report]) {
    println!("\n\u{250F}\u{2501}\u{2501}\u{2501}\u{2501} Results");
    for report in reports {
        println!("{}\n", render(report, true));
    }
}

pub fn data_as_json<T: serde::Serialize + ?Sized>(data: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(data)
}

/// Replaces `path` with `data`.
pub fn data_to_file(data: &str, path: &Path) -> Result<()> {
    fs::write(path, data).map_err(|source| AnalyserError::WriteFailure {
        path: path.to_path_buf(),
        source,
    })
}

/// Appends one block of output to the results file.
pub fn append_to_file(data: &str, path: &Path) -> Result<()> {
    log::info!("Writing results to {}", path.display());
    let write = || -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{data}")
    };
    write().map_err(|source| AnalyserError::WriteFailure {
        path: path.to_path_buf(),
        source,
    })
}
