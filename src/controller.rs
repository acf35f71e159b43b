//! The bring-up controller.
//!
//! `SmurfController` composes the pieces of a bring-up: it owns the read-only
//! configuration, the lookup tables built from it, the run session and a handle to the
//! device port, and hands them to the [`BringUpSequencer`] as explicit arguments.
//!
//! Construction order matters. Everything that can fail on bad configuration (tables,
//! constants, the per-band plan) runs before the session touches the filesystem, and
//! both happen before the first hardware call.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::config::{ConfigView, ControllerOptions, FluxRampConfig, InitConfig};
use crate::device::{DeviceCommandPort, MockDevicePort};
use crate::error::{AppResult, SmurfError};
use crate::hardware_map::{Constants, HardwareMaps, PerBandState};
use crate::logging::LogSink;
use crate::sequencer::{
    AmplifierBias, BringUpPlan, BringUpReport, BringUpSequencer, SequencerState,
};
use crate::session::{get_timestamp, RunSession, SessionManager};

/// Owns everything one instrument needs to be brought up.
pub struct SmurfController {
    options: ControllerOptions,
    config: ConfigView,
    epics_root: String,
    maps: HardwareMaps,
    constants: Constants,
    band_state: BTreeMap<u32, PerBandState>,
    plan: BringUpPlan,
    session: RunSession,
    log_sink: LogSink,
    port: Arc<dyn DeviceCommandPort>,
    sequencer: BringUpSequencer,
    last_report: Option<BringUpReport>,
}

impl SmurfController {
    /// Load the configuration named by `options`, build every table, establish the run
    /// session and, when `options.setup` is set, run the bring-up sequence.
    ///
    /// `live_port` is the transport to the real instrument. It is ignored in offline
    /// mode, where a simulated register file is used instead; otherwise it is required.
    pub async fn new(
        options: ControllerOptions,
        live_port: Option<Arc<dyn DeviceCommandPort>>,
        log_sink: LogSink,
    ) -> AppResult<Self> {
        let config = ConfigView::load(&options.cfg_file)?;
        Self::with_config(options, config, live_port, log_sink).await
    }

    /// As [`new`](Self::new), with an already parsed configuration.
    pub async fn with_config(
        options: ControllerOptions,
        config: ConfigView,
        live_port: Option<Arc<dyn DeviceCommandPort>>,
        log_sink: LogSink,
    ) -> AppResult<Self> {
        let epics_root = match &options.epics_root {
            Some(root) => root.clone(),
            None => config.string("epics_root")?.to_string(),
        };

        let maps = HardwareMaps::build(&config)?;
        let constants = Constants::from_config(&config)?;
        let init: InitConfig = config.typed("init")?;
        let flux_ramp: FluxRampConfig = config.typed("flux_ramp")?;
        let plan = BringUpPlan::new(&init, flux_ramp, &maps, &constants)?;
        let band_state = init
            .bands
            .iter()
            .map(|&band| (band, PerBandState::default()))
            .collect();

        let port: Arc<dyn DeviceCommandPort> = if options.offline {
            warn!(
                epics_root = %epics_root,
                "Offline mode: register writes go to a simulated device"
            );
            Arc::new(MockDevicePort::new(epics_root.clone()))
        } else {
            live_port.ok_or_else(|| {
                SmurfError::config("no device transport is available; use offline mode")
            })?
        };

        let session = SessionManager::new(&options, &config).establish(&log_sink)?;
        info!(
            epics_root = %epics_root,
            cfg_file = %options.cfg_file.display(),
            bands = ?init.bands,
            "Controller initialised"
        );

        let mut controller = Self {
            options,
            config,
            epics_root,
            maps,
            constants,
            band_state,
            plan,
            session,
            log_sink,
            port,
            sequencer: BringUpSequencer::default(),
            last_report: None,
        };

        if controller.options.setup {
            controller.setup().await?;
        }
        Ok(controller)
    }

    /// Run the full bring-up sequence from phase 1.
    pub async fn setup(&mut self) -> AppResult<&BringUpReport> {
        let report = self.sequencer.run(self.port.as_ref(), &self.plan).await?;
        Ok(&*self.last_report.insert(report))
    }

    /// Options the controller was built with.
    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// The loaded configuration.
    pub fn config(&self) -> &ConfigView {
        &self.config
    }

    /// PV prefix in effect, after any override.
    pub fn epics_root(&self) -> &str {
        &self.epics_root
    }

    /// Lookup tables built from the configuration.
    pub fn maps(&self) -> &HardwareMaps {
        &self.maps
    }

    /// Calibration constants.
    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    /// The validated bring-up plan.
    pub fn plan(&self) -> &BringUpPlan {
        &self.plan
    }

    /// Run identity and directory layout.
    pub fn session(&self) -> &RunSession {
        &self.session
    }

    /// Shared handle to the device port in use.
    pub fn port(&self) -> Arc<dyn DeviceCommandPort> {
        Arc::clone(&self.port)
    }

    /// Current bring-up state.
    pub fn state(&self) -> SequencerState {
        self.sequencer.state()
    }

    /// Report of the most recent successful bring-up.
    pub fn last_report(&self) -> Option<&BringUpReport> {
        self.last_report.as_ref()
    }

    /// Gate voltages read back by the most recent successful bring-up.
    pub fn amplifier_bias(&self) -> Option<AmplifierBias> {
        self.last_report.as_ref().map(|r| r.amplifier_bias)
    }

    /// Tracking state for a configured band.
    pub fn band_state(&self, band: u32) -> Option<&PerBandState> {
        self.band_state.get(&band)
    }

    /// Mutable tracking state for a configured band.
    pub fn band_state_mut(&mut self, band: u32) -> Option<&mut PerBandState> {
        self.band_state.get_mut(&band)
    }

    /// Redirect the run logfile, or stop writing one.
    pub fn set_logfile(&mut self, path: Option<PathBuf>) -> AppResult<()> {
        self.session.rebind_logfile(path, &self.log_sink)
    }

    /// Current time as unix seconds, right-aligned to ten characters.
    pub fn get_timestamp(&self) -> String {
        get_timestamp(&Local::now())
    }

    /// Current time as unix seconds.
    pub fn get_timestamp_secs(&self) -> i64 {
        Local::now().timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Register, RegisterAddress, RegisterValue};
    use serde_json::json;

    fn band_block(mux: [u32; 2]) -> serde_json::Value {
        json!({
            "iq_swap_in": 0, "iq_swap_out": 0,
            "refPhaseDelay": 6, "refPhaseDelayFine": 0,
            "toneScale": 2, "analysisScale": 3,
            "feedbackEnable": 1, "feedbackGain": 256, "lmsGain": 7,
            "feedbackPolarity": 1, "synthesisScale": 2,
            "data_out_mux": mux,
            "att_uc": 6, "att_dc": 0
        })
    }

    fn raw_config(data_dir: &std::path::Path) -> serde_json::Value {
        json!({
            "epics_root": "test_epics",
            "default_data_dir": data_dir,
            "smurf_cmd_dir": data_dir.join("smurf_cmd"),
            "constant": {"pA_per_phi0": 9.0e6},
            "attenuator": {"att1": 0, "att2": 1},
            "amplifier": {"hemt_Vg": 0.6, "LNA_Vg": 0.4},
            "flux_ramp": {"select_ramp": 1, "ramp_start_mode": 0},
            "chip_to_freq": {"0": [4.0, 4.5]},
            "band_to_chip": {"band0": [0, 1], "band1": [2, 3]},
            "all_bias_groups": [0, 1, 2],
            "bias_group_to_pair": {"0": [1, 2]},
            "pic_to_bias_group": {"0": 0},
            "bias_line_resistance": 15650.0,
            "R_sh": 0.0004,
            "high_low_current_ratio": 6.08,
            "smurf_to_mce": {
                "smurf_to_mce_file": "/data/smurf2mce.cfg",
                "receiver_ip": "192.168.3.1",
                "port_number": 3334,
                "mask_file": "/data/mask.txt"
            },
            "bad_mask": {"0": [5.0, 5.1]},
            "init": {
                "bands": [0, 1],
                "dspEnable": 1,
                "band_0": band_block([2, 3]),
                "band_1": band_block([0, 1]),
            }
        })
    }

    fn config(data_dir: &std::path::Path) -> ConfigView {
        ConfigView::from_value(raw_config(data_dir)).unwrap()
    }

    fn offline(dir: &std::path::Path) -> ControllerOptions {
        ControllerOptions {
            offline: true,
            data_dir: Some(dir.to_path_buf()),
            name: Some("unit".into()),
            ..ControllerOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_controller_runs_setup() {
        let dir = tempfile::tempdir().unwrap();
        let ctrl = SmurfController::with_config(
            offline(dir.path()),
            config(dir.path()),
            None,
            LogSink::new(),
        )
        .await
        .unwrap();

        assert_eq!(ctrl.state(), SequencerState::Ready);
        assert_eq!(ctrl.epics_root(), "test_epics");
        let bias = ctrl.amplifier_bias().unwrap();
        assert_eq!(bias.hemt_vg, 0.6);
        assert_eq!(bias.lna_vg, 0.4);
        assert_eq!(ctrl.band_state(1).unwrap().lms_freq_hz, 4000);
        assert!(ctrl.band_state(2).is_none());

        let stream = ctrl
            .port()
            .read(RegisterAddress::indexed(Register::StreamEnable, 1))
            .await
            .unwrap();
        assert_eq!(stream, RegisterValue::Int(1));
    }

    #[tokio::test]
    async fn test_setup_false_leaves_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let options = ControllerOptions {
            setup: false,
            epics_root: Some("override_root".into()),
            ..offline(dir.path())
        };
        let ctrl = SmurfController::with_config(options, config(dir.path()), None, LogSink::new())
            .await
            .unwrap();
        assert_eq!(ctrl.state(), SequencerState::Unconfigured);
        assert_eq!(ctrl.epics_root(), "override_root");
        assert!(ctrl.last_report().is_none());
    }

    #[tokio::test]
    async fn test_missing_transport_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = ControllerOptions {
            offline: false,
            ..offline(dir.path())
        };
        let result =
            SmurfController::with_config(options, config(dir.path()), None, LogSink::new()).await;
        assert!(matches!(result, Err(SmurfError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_bad_config_fails_before_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = raw_config(dir.path());
        raw["attenuator"] = json!({"att_x": 0});

        let result = SmurfController::with_config(
            offline(dir.path()),
            ConfigView::from_value(raw).unwrap(),
            None,
            LogSink::new(),
        )
        .await;
        assert!(matches!(result, Err(SmurfError::Configuration(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_band_without_attenuator_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = raw_config(dir.path());
        raw["attenuator"] = json!({"att1": 0});

        let err = SmurfController::with_config(
            offline(dir.path()),
            ConfigView::from_value(raw).unwrap(),
            None,
            LogSink::new(),
        )
        .await
        .err()
        .unwrap();
        assert!(err.to_string().contains("band 1"), "{err}");
    }
}
