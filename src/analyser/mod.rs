//! The core of capture decoding and traffic analysis.
//! Classify frames, aggregate them per protocol, and derive statistics, artifacts and histograms.
pub mod utils;
pub mod core;
pub mod scan;
pub mod histogram;
pub mod containers;

#[cfg(test)]
mod testdata;
