//! `smurf_control`: bring up a readout carrier from an instrument configuration file.
//!
//! Options are read from defaults, an optional TOML file (`--options`) and `SMURF_*`
//! environment variables; flags given on the command line win.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use smurf_control::config::ControllerOptions;
use smurf_control::{logging, SmurfController};

#[derive(Parser, Debug)]
#[command(name = "smurf_control", about = "SMuRF readout bring-up", version)]
struct Cli {
    /// TOML file with controller options
    #[arg(long)]
    options: Option<PathBuf>,

    /// Instrument configuration file
    #[arg(short, long)]
    cfg_file: Option<PathBuf>,

    /// Override the configuration's epics_root
    #[arg(long)]
    epics_root: Option<String>,

    /// Base directory for run output
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run name (defaults to the start timestamp)
    #[arg(long)]
    name: Option<String>,

    /// Do not bind a per-run logfile
    #[arg(long)]
    no_logfile: bool,

    /// Build tables and session but skip the bring-up sequence
    #[arg(long)]
    no_setup: bool,

    /// Drive a simulated register file instead of hardware
    #[arg(long)]
    offline: bool,

    /// Use the shared smurf_cmd directory tree
    #[arg(long)]
    smurf_cmd_mode: bool,

    /// Create no directories at all
    #[arg(long)]
    no_dir: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn apply(&self, options: &mut ControllerOptions) {
        if let Some(cfg_file) = &self.cfg_file {
            options.cfg_file = cfg_file.clone();
        }
        if self.epics_root.is_some() {
            options.epics_root = self.epics_root.clone();
        }
        if self.data_dir.is_some() {
            options.data_dir = self.data_dir.clone();
        }
        if self.name.is_some() {
            options.name = self.name.clone();
        }
        options.make_logfile &= !self.no_logfile;
        options.setup &= !self.no_setup;
        options.offline |= self.offline;
        options.smurf_cmd_mode |= self.smurf_cmd_mode;
        options.no_dir |= self.no_dir;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let sink = logging::init(&cli.log_level).context("failed to install tracing subscriber")?;

    let mut options = ControllerOptions::load_from(cli.options.as_deref())
        .context("failed to load controller options")?;
    cli.apply(&mut options);

    let controller = SmurfController::new(options, None, sink).await
        .context("bring-up failed")?;

    let session = controller.session();
    info!(
        name = %session.name,
        output_dir = ?session.output_dir(),
        state = ?controller.state(),
        "Controller ready"
    );
    if let Some(report) = controller.last_report() {
        info!(
            receiver_ip = report.receiver_ip.as_deref().unwrap_or("unknown"),
            hemt_vg = report.amplifier_bias.hemt_vg,
            lna_vg = report.amplifier_bias.lna_vg,
            "Bring-up complete"
        );
    }
    Ok(())
}
