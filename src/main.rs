mod analyser;
mod config;
mod error;
mod ui;

use analyser::containers::Report;
use analyser::core::Operation;
use clap::Parser;
use config::AnalyserConfig;
use error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use ui::{geo, output};

/// pcapsift derives traffic statistics, artifacts and an activity graph from a packet capture
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// pcap/pcapng file to analyze
    #[arg(short = 'f', long, value_parser)]
    file: PathBuf,

    /// Analysis to run
    #[arg(value_enum, default_value_t = Operation::All)]
    operation: Operation,

    /// File the results are appended to; KML and graph data are written next to it
    #[arg(short = 'o', long, default_value = "outputs/results.txt")]
    out: PathBuf,

    /// JSON config file with scanner and graph settings
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Graph interval in seconds, default is a 17th of the capture duration
    #[arg(short = 'i', long, value_parser = positive_seconds)]
    interval: Option<f64>,

    /// Graph only packets of this protocol, e.g. TCP or ARP
    #[arg(short = 'p', long)]
    protocol: Option<String>,

    /// MaxMind City database (.mmdb) for the KML export
    #[arg(short = 'g', long)]
    geo_db: Option<PathBuf>,

    /// Display output as formatted JSON
    #[arg(short = 'j', long)]
    json: bool,
}

fn positive_seconds(value: &str) -> std::result::Result<f64, String> {
    let seconds: f64 = value.parse().map_err(|_| format!("{value} is not a number"))?;
    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(format!("interval must be a positive number of seconds, got {value}"))
    }
}

fn main() -> ExitCode {
    if let Err(e) = simple_logger::init_with_env() {
        eprintln!("Could not initialise logging: {e}");
    }

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    log::info!("Program Started");

    let mut config = match args.config.as_deref() {
        Some(path) => AnalyserConfig::load(path)?,
        None => AnalyserConfig::default(),
    };
    if args.interval.is_some() {
        config.graph_interval = args.interval;
    }
    if args.protocol.is_some() {
        config.graph_protocol = args.protocol.clone();
    }
    if args.geo_db.is_some() {
        config.geo_db = args.geo_db.clone();
    }

    let out_dir = match args.out.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    log::info!("Output directory {}", out_dir.display());
    if let Err(e) = fs::create_dir_all(&out_dir) {
        log::warn!("Could not create output directory {}: {e}", out_dir.display());
    }

    let capture = analyser::utils::load_file(&args.file)?;
    log::info!("Beginning Analysis for {}", args.file.display());

    let reports = analyser::core::execute(args.operation, &capture, &config);

    // ---- Output ----
    if args.json {
        match output::data_as_json(&reports) {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("Could not serialise results: {e}"),
        }
    } else {
        output::print_results(&reports);
    }

    for report in &reports {
        if let Err(e) = output::append_to_file(&output::render(report, false), &args.out) {
            log::error!("{e}");
        }

        match report {
            Report::Destinations(destinations) => export_kml(destinations, &config, &out_dir)?,
            Report::Graph(Some(graph)) => {
                let path = out_dir.join("graph.json");
                match output::data_as_json(graph) {
                    Ok(json) => match output::data_to_file(&json, &path) {
                        Ok(()) => log::info!("Graph data saved to {}", path.display()),
                        Err(e) => log::error!("{e}"),
                    },
                    Err(e) => log::error!("Could not serialise graph: {e}"),
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Only an unreadable geolocation database is fatal; an unwritable KML file is logged.
fn export_kml(destinations: &[analyser::containers::DestinationCount], config: &AnalyserConfig, out_dir: &Path) -> Result<()> {
    let database = match config.geo_db.as_deref() {
        Some(path) => geo::GeoDatabase::open(path)?,
        None => {
            log::warn!("No geolocation database supplied; KML will contain no placemarks");
            geo::GeoDatabase::default()
        }
    };

    let path = out_dir.join("ip_activity.kml");
    match output::data_to_file(&geo::generate_kml(destinations, &database), &path) {
        Ok(()) => log::info!("KML file saved to {}", path.display()),
        Err(e) => log::error!("{e}"),
    }
    Ok(())
}
