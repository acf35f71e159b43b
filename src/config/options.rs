//! Construction-time options using Figment
//!
//! Options are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `SMURF_`
//!
//! ```text
//! SMURF_EPICS_ROOT=smurf_server_s5
//! SMURF_CFG_FILE=/data/pysmurf_cfg/experiment.cfg
//! SMURF_OFFLINE=true
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppResult;

/// Recognised construction-time options of a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerOptions {
    /// Overrides the configuration's `epics_root`.
    #[serde(default)]
    pub epics_root: Option<String>,
    /// Path of the instrument configuration file.
    pub cfg_file: PathBuf,
    /// Overrides the configuration's `default_data_dir`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Run name; defaults to the start timestamp. Numeric names are taken verbatim.
    #[serde(default, deserialize_with = "string_or_number")]
    pub name: Option<String>,
    /// Bind a per-run logfile.
    pub make_logfile: bool,
    /// Run the bring-up sequence during construction.
    pub setup: bool,
    /// Use the simulated port instead of live hardware.
    pub offline: bool,
    /// Use the shared command-mode directory tree.
    pub smurf_cmd_mode: bool,
    /// Skip all directory creation.
    pub no_dir: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            epics_root: None,
            cfg_file: PathBuf::from("experiment.cfg"),
            data_dir: None,
            name: None,
            make_logfile: true,
            setup: true,
            offline: false,
            smurf_cmd_mode: false,
            no_dir: false,
        }
    }
}

impl ControllerOptions {
    /// Load options from defaults, `path` (if given) and the environment.
    pub fn load_from(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(ControllerOptions::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let options = figment.merge(Env::prefixed("SMURF_")).extract()?;
        Ok(options)
    }
}

/// Run names are often dates or timestamps, which env and TOML sources type as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Name {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    Ok(Option::<Name>::deserialize(deserializer)?.map(|name| match name {
        Name::Text(s) => s,
        Name::Unsigned(n) => n.to_string(),
        Name::Signed(n) => n.to_string(),
        Name::Float(n) => n.to_string(),
    }))
}
