//! Ordered bring-up of a readout carrier.
//!
//! The sequencer drives the instrument from power-on defaults to a state where it can
//! stream. It is a strict state machine over the eleven [`Phase`]s, which always run in
//! the order of [`Phase::ALL`]:
//!
//! ```text
//! Unconfigured -> BulkDefaults -> PerBand -> Triggers -> FluxRampHardware
//!   -> ResetPulse -> MceChannel -> FluxRampRearm -> StreamGateClosed
//!   -> StreamEnable -> ClearPulse -> AmplifierBias -> Ready
//! ```
//!
//! Every call into the [`DeviceCommandPort`] is awaited before the next one is issued.
//! The sequence is not transactional: when a call fails the state becomes
//! [`SequencerState::Failed`], the instrument is left partially configured and the
//! error is returned. Every phase re-applies absolute values, so re-running the whole
//! sequence from the start is the recovery path.
//!
//! The literal constants below are load-bearing hardware behaviour and are kept as
//! found on working systems.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{AmplifierConfig, FluxRampConfig, InitConfig};
use crate::device::{DeviceCommandPort, Register, RegisterValue, SmurfToMceParams};
use crate::error::{AppResult, DeviceError, DeviceResult, SmurfError};
use crate::hardware_map::{Constants, HardwareMaps};

/// Feedback bandwidth limit written to every band, in kHz.
pub const FEEDBACK_LIMIT_KHZ: i64 = 225;
/// Timing trigger channel used for the flux-ramp trigger.
pub const TRIGGER_CHANNEL: u32 = 0;
/// Trigger pulse width. Triggering does not work without it.
pub const TRIGGER_WIDTH: i64 = 10;
/// Event-receiver destination select for the trigger channel.
pub const EVR_TRIGGER_DEST_SEL: i64 = 0x20000;
/// Flux-ramp reset rate used when re-arming, in kHz.
pub const FLUX_RAMP_RESET_RATE_KHZ: f64 = 4.0;
/// Source every listed data-out mux slot is routed to.
pub const DATA_OUT_MUX_SOURCE: &str = "UserData";
/// Pause between writing and reading back the MCE converter configuration.
pub const MCE_CONFIG_SETTLE: Duration = Duration::from_millis(100);
/// Minimum time the MCE clear line is held before release.
pub const CLEAR_SETTLE: Duration = Duration::from_secs(1);

/// One step of the bring-up sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Phase {
    /// Refresh registers and load firmware defaults.
    BulkDefaults,
    /// Apply each band's block.
    PerBand,
    /// Configure the EVR trigger.
    Triggers,
    /// Select and arm the flux ramp.
    FluxRampHardware,
    /// Pulse the CPLD reset.
    ResetPulse,
    /// Configure the MCE streamer and read back its receiver.
    MceChannel,
    /// Restart the flux ramp at its operating rate.
    FluxRampRearm,
    /// Stop the MCE stream and writer.
    StreamGateClosed,
    /// Enable streaming on every band.
    StreamEnable,
    /// Pulse the MCE clear line.
    ClearPulse,
    /// Set and read back the amplifier gate voltages.
    AmplifierBias,
}

impl Phase {
    /// Execution order.
    pub const ALL: [Phase; 11] = [
        Phase::BulkDefaults,
        Phase::PerBand,
        Phase::Triggers,
        Phase::FluxRampHardware,
        Phase::ResetPulse,
        Phase::MceChannel,
        Phase::FluxRampRearm,
        Phase::StreamGateClosed,
        Phase::StreamEnable,
        Phase::ClearPulse,
        Phase::AmplifierBias,
    ];

    /// 1-based position in the sequence.
    pub fn number(self) -> usize {
        self as usize + 1
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::BulkDefaults => "bulk defaults",
            Phase::PerBand => "per-band configuration",
            Phase::Triggers => "trigger setup",
            Phase::FluxRampHardware => "flux-ramp hardware",
            Phase::ResetPulse => "reset pulse",
            Phase::MceChannel => "MCE channel setup",
            Phase::FluxRampRearm => "flux-ramp re-arm",
            Phase::StreamGateClosed => "stream gate",
            Phase::StreamEnable => "stream enable",
            Phase::ClearPulse => "clear pulse",
            Phase::AmplifierBias => "amplifier bias",
        };
        write!(f, "phase {} ({name})", self.number())
    }
}

/// Where the sequencer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SequencerState {
    /// No sequence has run yet.
    Unconfigured,
    /// A sequence is executing the given phase.
    Running(Phase),
    /// The last sequence completed.
    Ready,
    /// The last sequence stopped in the given phase.
    Failed(Phase),
}

/// Per-band values resolved from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BandPlan {
    /// Band number.
    pub band: u32,
    /// Attenuator wired to this band.
    pub attenuator: u32,
    /// See [`BandInit::iq_swap_in`](crate::config::BandInit::iq_swap_in).
    pub iq_swap_in: i64,
    /// See [`BandInit::iq_swap_out`](crate::config::BandInit::iq_swap_out).
    pub iq_swap_out: i64,
    /// Coarse reference phase delay.
    pub ref_phase_delay: i64,
    /// Fine reference phase delay.
    pub ref_phase_delay_fine: i64,
    /// Output tone scale.
    pub tone_scale: i64,
    /// Analysis filter scale.
    pub analysis_scale: i64,
    /// Tracking feedback enable.
    pub feedback_enable: i64,
    /// Tracking feedback gain.
    pub feedback_gain: i64,
    /// LMS filter gain.
    pub lms_gain: i64,
    /// Tracking feedback polarity.
    pub feedback_polarity: i64,
    /// Synthesis filter scale.
    pub synthesis_scale: i64,
    /// Mux slots routed to user data.
    pub data_out_mux: Vec<u32>,
    /// Up-converter attenuation.
    pub att_uc: i64,
    /// Down-converter attenuation.
    pub att_dc: i64,
    /// Band override or the global `init.dspEnable`.
    pub dsp_enable: i64,
}

/// Everything the sequence writes, resolved and validated up front so that
/// configuration problems surface before the first hardware call.
#[derive(Debug, Clone, PartialEq)]
pub struct BringUpPlan {
    /// Declared bands, in order.
    pub bands: Vec<BandPlan>,
    /// Flux-ramp selection.
    pub flux_ramp: FluxRampConfig,
    /// Fraction of full scale for the re-arm.
    pub fraction_full_scale: f64,
    /// MCE streamer settings.
    pub smurf_to_mce: SmurfToMceParams,
    /// Gate voltages to apply; unset ones are left alone.
    pub amplifier: AmplifierConfig,
}

impl BringUpPlan {
    /// Resolve every band against its block and the attenuator table.
    pub fn new(
        init: &InitConfig,
        flux_ramp: FluxRampConfig,
        maps: &HardwareMaps,
        constants: &Constants,
    ) -> AppResult<Self> {
        let bands = init
            .all_bands()?
            .into_iter()
            .map(|(band, cfg)| {
                let attenuator = maps.att_to_band.attenuator_for_band(band).ok_or_else(|| {
                    SmurfError::config(format!("no attenuator is wired to band {band}"))
                })?;
                Ok(BandPlan {
                    band,
                    attenuator,
                    dsp_enable: init.dsp_enable_for(&cfg),
                    iq_swap_in: cfg.iq_swap_in,
                    iq_swap_out: cfg.iq_swap_out,
                    ref_phase_delay: cfg.ref_phase_delay,
                    ref_phase_delay_fine: cfg.ref_phase_delay_fine,
                    tone_scale: cfg.tone_scale,
                    analysis_scale: cfg.analysis_scale,
                    feedback_enable: cfg.feedback_enable,
                    feedback_gain: cfg.feedback_gain,
                    lms_gain: cfg.lms_gain,
                    feedback_polarity: cfg.feedback_polarity,
                    synthesis_scale: cfg.synthesis_scale,
                    data_out_mux: cfg.data_out_mux,
                    att_uc: cfg.att_uc,
                    att_dc: cfg.att_dc,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            bands,
            flux_ramp,
            fraction_full_scale: constants.fraction_full_scale,
            smurf_to_mce: constants.smurf_to_mce.params(),
            amplifier: constants.amplifier.clone(),
        })
    }
}

/// Amplifier gate voltages as read back after the bias phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AmplifierBias {
    /// HEMT gate voltage, volts.
    pub hemt_vg: f64,
    /// LNA gate voltage, volts.
    pub lna_vg: f64,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BringUpReport {
    /// Receiver address the MCE converter reported after configuration.
    pub receiver_ip: Option<String>,
    /// Gate voltages read back at the end of the run.
    pub amplifier_bias: AmplifierBias,
    /// Wall time of the run.
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Readback {
    receiver_ip: Option<String>,
    amplifier_bias: AmplifierBias,
}

/// Runs [`BringUpPlan`]s against a port and tracks the sequence state.
#[derive(Debug)]
pub struct BringUpSequencer {
    state: SequencerState,
    write_log: bool,
}

impl Default for BringUpSequencer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BringUpSequencer {
    /// `write_log` is passed through to every port call.
    pub fn new(write_log: bool) -> Self {
        Self {
            state: SequencerState::Unconfigured,
            write_log,
        }
    }

    /// Current state.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// True after a completed run.
    pub fn is_ready(&self) -> bool {
        self.state == SequencerState::Ready
    }

    /// Run every phase in order. A re-run always starts again from phase 1.
    pub async fn run(
        &mut self,
        port: &dyn DeviceCommandPort,
        plan: &BringUpPlan,
    ) -> AppResult<BringUpReport> {
        info!(bands = plan.bands.len(), "Setting up...");
        let started = Instant::now();
        let mut readback = Readback::default();

        for phase in Phase::ALL {
            self.state = SequencerState::Running(phase);
            let span = info_span!("bring_up", phase = phase.number());
            let result = self
                .run_phase(phase, port, plan, &mut readback)
                .instrument(span)
                .await;

            if let Err(source) = result {
                self.state = SequencerState::Failed(phase);
                warn!(
                    error = %source,
                    "Bring-up aborted during {phase}; instrument is partially configured"
                );
                return Err(SmurfError::BringUp { phase, source });
            }
        }

        self.state = SequencerState::Ready;
        let elapsed = started.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "Done with setup");
        Ok(BringUpReport {
            receiver_ip: readback.receiver_ip,
            amplifier_bias: readback.amplifier_bias,
            elapsed,
        })
    }

    async fn run_phase(
        &self,
        phase: Phase,
        port: &dyn DeviceCommandPort,
        plan: &BringUpPlan,
        readback: &mut Readback,
    ) -> DeviceResult<()> {
        let log = self.write_log;
        debug!("starting {phase}");
        match phase {
            Phase::BulkDefaults => {
                port.set_read_all(log).await?;
                port.set_defaults(log).await?;
            }
            Phase::PerBand => {
                for band in &plan.bands {
                    self.configure_band(port, band).await?;
                }
            }
            Phase::Triggers => {
                // width before enable, otherwise the pulse shape is undefined
                port.set_trigger_width(TRIGGER_CHANNEL, TRIGGER_WIDTH, log).await?;
                port.set_trigger_enable(TRIGGER_CHANNEL, 1, log).await?;
                port.set_evr_channel_reg_enable(TRIGGER_CHANNEL, true, log).await?;
                port.set_evr_trigger_reg_enable(TRIGGER_CHANNEL, true, log).await?;
                port.set_evr_trigger_channel_reg_dest_sel(
                    TRIGGER_CHANNEL,
                    EVR_TRIGGER_DEST_SEL,
                    log,
                )
                .await?;
                port.set_enable_ramp_trigger(1, log).await?;
            }
            Phase::FluxRampHardware => {
                port.set_select_ramp(plan.flux_ramp.select_ramp, log).await?;
                port.set_ramp_start_mode(plan.flux_ramp.ramp_start_mode, log).await?;
            }
            Phase::ResetPulse => {
                port.set_cpld_reset(0, log).await?;
                port.cpld_toggle(log).await?;
            }
            Phase::MceChannel => {
                readback.receiver_ip = self.mce_channel(port, plan).await?;
            }
            Phase::FluxRampRearm => {
                port.flux_ramp_off(log).await?;
                port.flux_ramp_setup(FLUX_RAMP_RESET_RATE_KHZ, plan.fraction_full_scale, log)
                    .await?;
            }
            Phase::StreamGateClosed => {
                port.set_smurf_to_mce_stream(false, log).await?;
                port.set_smurf_to_mce_writer(false, log).await?;
            }
            Phase::StreamEnable => {
                // internal PCIe path only; the MCE stream stays gated
                for band in &plan.bands {
                    port.set_stream_enable(band.band, 1, log).await?;
                }
            }
            Phase::ClearPulse => {
                port.set_smurf_to_mce_clear(1, log).await?;
                sleep(CLEAR_SETTLE).await;
                port.set_smurf_to_mce_clear(0, log).await?;
            }
            Phase::AmplifierBias => {
                readback.amplifier_bias = self.amplifier_bias(port, plan).await?;
            }
        }
        Ok(())
    }

    async fn configure_band(&self, port: &dyn DeviceCommandPort, b: &BandPlan) -> DeviceResult<()> {
        let log = self.write_log;
        let band = b.band;
        debug!(band, attenuator = b.attenuator, "configuring band");

        port.set_iq_swap_in(band, b.iq_swap_in, log).await?;
        port.set_iq_swap_out(band, b.iq_swap_out, log).await?;
        port.set_ref_phase_delay(band, b.ref_phase_delay, log).await?;
        port.set_ref_phase_delay_fine(band, b.ref_phase_delay_fine, log).await?;
        port.set_tone_scale(band, b.tone_scale, log).await?;
        port.set_analysis_scale(band, b.analysis_scale, log).await?;
        port.set_feedback_enable(band, b.feedback_enable, log).await?;
        port.set_feedback_gain(band, b.feedback_gain, log).await?;
        port.set_lms_gain(band, b.lms_gain, log).await?;
        port.set_feedback_limit_khz(band, FEEDBACK_LIMIT_KHZ, log).await?;
        port.set_feedback_polarity(band, b.feedback_polarity, log).await?;
        port.set_synthesis_scale(band, b.synthesis_scale, log).await?;
        for &mux in &b.data_out_mux {
            port.set_data_out_mux(mux, DATA_OUT_MUX_SOURCE, log).await?;
        }
        port.set_att_uc(b.attenuator, b.att_uc, log).await?;
        port.set_att_dc(b.attenuator, b.att_dc, log).await?;
        port.set_dsp_enable(band, b.dsp_enable, log).await?;
        Ok(())
    }

    /// Configure the converter channel and return the receiver address it reports.
    /// Nothing from the read-back is written anywhere.
    async fn mce_channel(
        &self,
        port: &dyn DeviceCommandPort,
        plan: &BringUpPlan,
    ) -> DeviceResult<Option<String>> {
        port.make_smurf_to_mce_config(&plan.smurf_to_mce, self.write_log).await?;
        sleep(MCE_CONFIG_SETTLE).await;
        let ip = match port.read_smurf_to_mce_config().await? {
            RegisterValue::SmurfToMce(params) => Some(params.receiver_ip),
            RegisterValue::Text(ip) => Some(ip),
            other => {
                warn!(value = %other, "MCE converter read-back carried no receiver address");
                None
            }
        };
        if let Some(ip) = &ip {
            info!(receiver_ip = %ip, "MCE converter receiver");
        }
        Ok(ip)
    }

    /// Apply the configured gate voltages, then read both back.
    async fn amplifier_bias(
        &self,
        port: &dyn DeviceCommandPort,
        plan: &BringUpPlan,
    ) -> DeviceResult<AmplifierBias> {
        let log = self.write_log;
        match plan.amplifier.hemt_vg {
            Some(v) => port.set_hemt_gate_voltage(v, log).await?,
            None => debug!("no hemt_Vg configured, leaving HEMT gate untouched"),
        }
        match plan.amplifier.lna_vg {
            Some(v) => port.set_lna_gate_voltage(v, log).await?,
            None => debug!("no LNA_Vg configured, leaving LNA gate untouched"),
        }

        let hemt_vg = gate_voltage(
            Register::HemtGateVoltage,
            port.get_hemt_gate_voltage().await?,
        )?;
        let lna_vg = gate_voltage(
            Register::LnaGateVoltage,
            port.get_lna_gate_voltage().await?,
        )?;
        info!(hemt_vg, lna_vg, "Amplifier bias");
        Ok(AmplifierBias { hemt_vg, lna_vg })
    }
}

/// A gate voltage read-back must be numeric; anything else is a device fault.
fn gate_voltage(register: Register, value: RegisterValue) -> DeviceResult<f64> {
    match value {
        RegisterValue::Float(v) => Ok(v),
        RegisterValue::Int(v) => Ok(v as f64),
        other => Err(DeviceError::Rejected {
            register,
            message: format!("gate voltage read back as {other}"),
        }),
    }
}
