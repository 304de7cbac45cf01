//! Presentation of analysis results: tables, JSON, graph and KML output.
pub mod geo;
pub mod output;
