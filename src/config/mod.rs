//! Instrument configuration and construction-time options.
//!
//! Two sources feed a controller:
//!
//! 1. The instrument configuration file, a JSON document (lines starting with `#` are
//!    comments) describing the wiring of one readout system. It is wrapped in a
//!    read-only [`ConfigView`]. Key order is preserved, because several lookup tables
//!    take their row order from it.
//! 2. [`ControllerOptions`], layered with Figment from defaults, an optional TOML file
//!    and `SMURF_`-prefixed environment variables.
//!
//! # Example
//!
//! ```no_run
//! use smurf_control::config::{ConfigView, ControllerOptions};
//!
//! let options = ControllerOptions::load_from(None)?;
//! let config = ConfigView::load(&options.cfg_file)?;
//! println!("epics root: {}", config.string("epics_root")?);
//! # Ok::<(), smurf_control::error::SmurfError>(())
//! ```

pub mod options;
pub mod sections;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{AppResult, SmurfError};

pub use options::ControllerOptions;
pub use sections::{
    AmplifierConfig, BandInit, ConstantConfig, FluxRampConfig, InitConfig, SmurfToMceConfig,
};

/// Read-only accessor over a parsed configuration tree.
#[derive(Debug, Clone)]
pub struct ConfigView {
    root: Map<String, Value>,
    source: Option<PathBuf>,
}

impl ConfigView {
    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| SmurfError::filesystem(path, e))?;
        let mut view = Self::parse(&text)?;
        view.source = Some(path.to_path_buf());
        Ok(view)
    }

    /// Parse configuration text. Whole-line `#` comments are dropped first.
    pub fn parse(text: &str) -> AppResult<Self> {
        let stripped: String = text
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .collect::<Vec<_>>()
            .join("\n");
        let value: Value = serde_json::from_str(&stripped)?;
        Self::from_value(value)
    }

    /// Wrap an already-parsed tree. The root must be a mapping.
    pub fn from_value(value: Value) -> AppResult<Self> {
        match value {
            Value::Object(root) => Ok(Self { root, source: None }),
            other => Err(SmurfError::config(format!(
                "configuration root must be a mapping, found {}",
                kind_of(&other)
            ))),
        }
    }

    /// File this view was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Raw value of a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Raw value of a top-level key that must be present.
    pub fn require(&self, key: &str) -> AppResult<&Value> {
        self.root
            .get(key)
            .ok_or_else(|| SmurfError::config(format!("missing required section '{key}'")))
    }

    /// A required, non-empty mapping section.
    pub fn section(&self, key: &str) -> AppResult<&Map<String, Value>> {
        match self.require(key)? {
            Value::Object(map) if map.is_empty() => Err(SmurfError::config(format!(
                "section '{key}' must not be empty"
            ))),
            Value::Object(map) => Ok(map),
            other => Err(SmurfError::config(format!(
                "section '{key}' must be a mapping, found {}",
                kind_of(other)
            ))),
        }
    }

    /// Deserialize a section into a typed struct.
    pub fn typed<T: DeserializeOwned>(&self, key: &str) -> AppResult<T> {
        let value = self.require(key)?.clone();
        serde_json::from_value(value)
            .map_err(|e| SmurfError::config(format!("section '{key}': {e}")))
    }

    /// A required numeric top-level value.
    pub fn number(&self, key: &str) -> AppResult<f64> {
        self.require(key)?
            .as_f64()
            .ok_or_else(|| SmurfError::config(format!("'{key}' must be a number")))
    }

    /// A required string top-level value.
    pub fn string(&self, key: &str) -> AppResult<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| SmurfError::config(format!("'{key}' must be a string")))
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
