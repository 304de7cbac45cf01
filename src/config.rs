use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::analyser::scan::{DEFAULT_IMAGE_EXTENSIONS, DEFAULT_SMTP_PORTS};
use crate::error::{AnalyserError, Result};

/// Tunables for the scanners and the graph. Missing keys in a config file take the defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnalyserConfig {
    pub image_extensions: Vec<String>,
    pub smtp_ports: Vec<u16>,
    /// Seconds per graph bucket; computed from the capture when unset.
    pub graph_interval: Option<f64>,
    /// Only graph records of this protocol name.
    pub graph_protocol: Option<String>,
    /// JSON location table used for the KML export.
    pub geo_db: Option<PathBuf>,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        AnalyserConfig {
            image_extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            smtp_ports: DEFAULT_SMTP_PORTS.to_vec(),
            graph_interval: None,
            graph_protocol: None,
            geo_db: None,
        }
    }
}

impl AnalyserConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| AnalyserError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&contents).map_err(|e| AnalyserError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str(contents)
    }
}
