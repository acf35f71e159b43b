//! Device command capability used by the bring-up sequencer.
//!
//! The register transport (point get/set over the control-system bus) is not part of
//! this crate. Everything that touches hardware goes through [`DeviceCommandPort`],
//! which only has to implement two primitives, [`DeviceCommandPort::write`] and
//! [`DeviceCommandPort::read`]. Every named hardware setting the sequencer uses is a
//! provided method that builds a [`RegisterWrite`] and forwards it, so a transport
//! (or a test double) sees one uniform stream of addressed writes.
//!
//! Registers are named after the process variables they map to; see
//! [`Register::pv_name`].

pub mod mock;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};

pub use mock::{CallKind, MockDevicePort, RecordedCall};

const SYSGEN_CRYO: &str = "AMCc:FpgaTopLevel:AppTop:AppCore:SysgenCryo";
const RTM_CRYO_DET: &str = "AMCc:FpgaTopLevel:AppTop:AppCore:RtmCryoDet";
const EVR_TRIGGERS: &str = "AMCc:FpgaTopLevel:AmcCarrierCore:AmcCarrierTiming:EvrV2CoreTriggers";
const SMURF_TO_MCE: &str = "AMCc:SmurfProcessor:SmurfToMce";

/// How a register is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterScope {
    /// One instance for the whole instrument.
    Global,
    /// One instance per band (`Base[band]`).
    Band,
    /// One instance per attenuator (`ATT:UC[att]`).
    Attenuator,
    /// Indexed by a channel or slot number unrelated to bands.
    Channel,
}

/// Every hardware setting the bring-up sequence touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Register {
    /// Refresh every cached register from hardware.
    ReadAll,
    /// Load the firmware default register set.
    SetDefaults,
    /// Swap I and Q on the ADC side.
    IqSwapIn,
    /// Swap I and Q on the DAC side.
    IqSwapOut,
    /// Coarse reference phase delay.
    RefPhaseDelay,
    /// Fine reference phase delay.
    RefPhaseDelayFine,
    /// Output tone scale.
    ToneScale,
    /// Analysis filter scale.
    AnalysisScale,
    /// Tracking feedback enable.
    FeedbackEnable,
    /// Tracking feedback gain.
    FeedbackGain,
    /// Tracking feedback polarity.
    FeedbackPolarity,
    /// Tracking feedback limit, kHz.
    FeedbackLimitKhz,
    /// LMS filter gain.
    LmsGain,
    /// Synthesis filter scale.
    SynthesisScale,
    /// Data-out mux slot source.
    DataOutMux,
    /// Up-converter attenuator.
    AttUc,
    /// Down-converter attenuator.
    AttDc,
    /// Per-band DSP enable.
    DspEnable,
    /// EVR trigger pulse width.
    TriggerWidth,
    /// EVR trigger enable.
    TriggerEnable,
    /// EVR channel enable.
    EvrChannelRegEnable,
    /// EVR trigger-register enable.
    EvrTriggerRegEnable,
    /// EVR destination select.
    EvrTriggerDestSel,
    /// Flux-ramp trigger enable.
    EnableRampTrigger,
    /// Flux-ramp source select.
    SelectRamp,
    /// Flux-ramp start mode.
    RampStartMode,
    /// RTM CPLD reset line.
    CpldReset,
    /// RTM CPLD toggle.
    CpldToggle,
    /// MCE streamer configuration.
    SmurfToMceConfig,
    /// Flux-ramp output enable bit.
    FluxRampEnable,
    /// Flux-ramp rate and amplitude.
    FluxRampSetup,
    /// MCE streamer data flow.
    SmurfToMceStream,
    /// MCE streamer file writer.
    SmurfToMceWriter,
    /// MCE streamer buffer clear.
    SmurfToMceClear,
    /// Per-band data stream enable.
    StreamEnable,
    /// HEMT gate voltage.
    HemtGateVoltage,
    /// LNA gate voltage.
    LnaGateVoltage,
}

impl Register {
    /// Indexing scheme of this register.
    pub fn scope(self) -> RegisterScope {
        use Register::*;
        match self {
            IqSwapIn | IqSwapOut | RefPhaseDelay | RefPhaseDelayFine | ToneScale
            | AnalysisScale | FeedbackEnable | FeedbackGain | FeedbackPolarity
            | FeedbackLimitKhz | LmsGain | SynthesisScale | DspEnable | StreamEnable => {
                RegisterScope::Band
            }
            AttUc | AttDc => RegisterScope::Attenuator,
            DataOutMux | TriggerWidth | TriggerEnable | EvrChannelRegEnable
            | EvrTriggerRegEnable | EvrTriggerDestSel => RegisterScope::Channel,
            _ => RegisterScope::Global,
        }
    }

    /// Process-variable name of this register under `epics_root`.
    ///
    /// `index` is the band, attenuator or channel number for indexed registers and is
    /// ignored for global ones.
    pub fn pv_name(self, epics_root: &str, index: Option<u32>) -> String {
        use Register::*;
        let i = index.unwrap_or(0);
        match self {
            ReadAll => format!("{epics_root}:AMCc:ReadAll"),
            SetDefaults => format!("{epics_root}:AMCc:setDefaults"),
            IqSwapIn => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:iqSwapIn"),
            IqSwapOut => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:iqSwapOut"),
            RefPhaseDelay => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:refPhaseDelay"),
            RefPhaseDelayFine => {
                format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:refPhaseDelayFine")
            }
            ToneScale => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:toneScale"),
            AnalysisScale => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:analysisScale"),
            FeedbackEnable => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:feedbackEnable"),
            FeedbackGain => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:feedbackGain"),
            FeedbackPolarity => {
                format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:feedbackPolarity")
            }
            FeedbackLimitKhz => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:feedbackLimit"),
            LmsGain => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:lmsGain"),
            SynthesisScale => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:synthesisScale"),
            DspEnable => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:dspEnable"),
            StreamEnable => format!("{epics_root}:{SYSGEN_CRYO}:Base[{i}]:streamEnable"),
            DataOutMux => format!("{epics_root}:AMCc:FpgaTopLevel:AppTop:DataOutMux[{i}]"),
            AttUc => format!("{epics_root}:AMCc:ATT:UC[{i}]"),
            AttDc => format!("{epics_root}:AMCc:ATT:DC[{i}]"),
            TriggerWidth => format!("{epics_root}:{EVR_TRIGGERS}:EvrV2TriggerReg[{i}]:Width"),
            TriggerEnable => format!("{epics_root}:{EVR_TRIGGERS}:EvrV2TriggerReg[{i}]:Enable"),
            EvrChannelRegEnable => {
                format!("{epics_root}:{EVR_TRIGGERS}:EvrV2ChannelReg[{i}]:EnableReg")
            }
            EvrTriggerRegEnable => {
                format!("{epics_root}:{EVR_TRIGGERS}:EvrV2TriggerReg[{i}]:EnableTrig")
            }
            EvrTriggerDestSel => {
                format!("{epics_root}:{EVR_TRIGGERS}:EvrV2ChannelReg[{i}]:DestSel")
            }
            EnableRampTrigger => format!("{epics_root}:{RTM_CRYO_DET}:EnableRampTrigger"),
            SelectRamp => format!("{epics_root}:{RTM_CRYO_DET}:SelectRamp"),
            RampStartMode => format!("{epics_root}:{RTM_CRYO_DET}:RampStartMode"),
            CpldReset => format!("{epics_root}:{RTM_CRYO_DET}:RtmSpiSr:CpldReset"),
            CpldToggle => format!("{epics_root}:{RTM_CRYO_DET}:RtmSpiSr:CpldToggle"),
            FluxRampEnable => format!("{epics_root}:{RTM_CRYO_DET}:RtmSpiSr:CfgRegEnaBit"),
            FluxRampSetup => format!("{epics_root}:{RTM_CRYO_DET}:RampMaxCnt"),
            HemtGateVoltage => format!("{epics_root}:{RTM_CRYO_DET}:RtmSpiMax:HemtBiasDacData"),
            LnaGateVoltage => format!("{epics_root}:{RTM_CRYO_DET}:RtmSpiMax:LnaBiasDacData"),
            SmurfToMceConfig => format!("{epics_root}:{SMURF_TO_MCE}:Config"),
            SmurfToMceStream => format!("{epics_root}:{SMURF_TO_MCE}:Stream"),
            SmurfToMceWriter => format!("{epics_root}:{SMURF_TO_MCE}:Writer"),
            SmurfToMceClear => format!("{epics_root}:{SMURF_TO_MCE}:Clear"),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Connection parameters of the instrument-to-MCE converter channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmurfToMceParams {
    /// Path of the converter configuration file.
    pub config_file: PathBuf,
    /// Address of the receiving host. Read back after the write because the
    /// converter may assign it dynamically.
    pub receiver_ip: String,
    /// Receiver port.
    pub port: u16,
    /// Channel mask file.
    pub mask_file: PathBuf,
}

/// A value written to or read from a register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegisterValue {
    /// Flag.
    Bool(bool),
    /// Integer setting.
    Int(i64),
    /// Analog setting, e.g. a voltage.
    Float(f64),
    /// Enumerated setting or address.
    Text(String),
    /// Flux-ramp configuration, applied as one composite write.
    FluxRamp {
        /// Ramp reset rate, kHz.
        reset_rate_khz: f64,
        /// Fraction of full scale swept.
        fraction_full_scale: f64,
    },
    /// Converter channel parameters.
    SmurfToMce(SmurfToMceParams),
}

impl RegisterValue {
    /// Numeric value as `f64`, if the value is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RegisterValue::Int(v) => Some(*v as f64),
            RegisterValue::Float(v) => Some(*v),
            RegisterValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Bool(v) => write!(f, "{v}"),
            RegisterValue::Int(v) => write!(f, "{v}"),
            RegisterValue::Float(v) => write!(f, "{v}"),
            RegisterValue::Text(v) => write!(f, "{v:?}"),
            RegisterValue::FluxRamp {
                reset_rate_khz,
                fraction_full_scale,
            } => write!(
                f,
                "reset_rate={reset_rate_khz}kHz fraction_full_scale={fraction_full_scale}"
            ),
            RegisterValue::SmurfToMce(p) => write!(
                f,
                "file={} receiver={}:{} mask={}",
                p.config_file.display(),
                p.receiver_ip,
                p.port,
                p.mask_file.display()
            ),
        }
    }
}

impl From<bool> for RegisterValue {
    fn from(v: bool) -> Self {
        RegisterValue::Bool(v)
    }
}

impl From<i64> for RegisterValue {
    fn from(v: i64) -> Self {
        RegisterValue::Int(v)
    }
}

impl From<f64> for RegisterValue {
    fn from(v: f64) -> Self {
        RegisterValue::Float(v)
    }
}

impl From<&str> for RegisterValue {
    fn from(v: &str) -> Self {
        RegisterValue::Text(v.to_string())
    }
}

/// A register together with its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegisterAddress {
    /// Register being addressed.
    pub register: Register,
    /// Band, channel or slot index; `None` for global registers.
    pub index: Option<u32>,
}

impl RegisterAddress {
    /// Address of a global register.
    pub fn global(register: Register) -> Self {
        Self {
            register,
            index: None,
        }
    }

    /// Address of one instance of an indexed register.
    pub fn indexed(register: Register, index: u32) -> Self {
        Self {
            register,
            index: Some(index),
        }
    }

    /// Full PV name under `epics_root`.
    pub fn pv_name(&self, epics_root: &str) -> String {
        self.register.pv_name(epics_root, self.index)
    }

    /// Reject addresses whose index does not match the register's scope.
    pub fn check_scope(&self) -> DeviceResult<()> {
        let scope = self.register.scope();
        match (scope, self.index) {
            (RegisterScope::Global, None) => Ok(()),
            (RegisterScope::Global, Some(i)) => Err(DeviceError::Rejected {
                register: self.register,
                message: format!("global register addressed with index {i}"),
            }),
            (_, Some(_)) => Ok(()),
            (scope, None) => Err(DeviceError::Rejected {
                register: self.register,
                message: format!("{scope:?}-scoped register addressed without an index"),
            }),
        }
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.register, i),
            None => write!(f, "{}", self.register),
        }
    }
}

/// One addressed write.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterWrite {
    /// Target register.
    pub address: RegisterAddress,
    /// Value to apply.
    pub value: RegisterValue,
    /// Whether the transport should log this write at user level.
    pub write_log: bool,
}

impl RegisterWrite {
    /// Write to a global register.
    pub fn global(register: Register, value: impl Into<RegisterValue>, write_log: bool) -> Self {
        Self {
            address: RegisterAddress::global(register),
            value: value.into(),
            write_log,
        }
    }

    /// Write to one instance of an indexed register.
    pub fn indexed(
        register: Register,
        index: u32,
        value: impl Into<RegisterValue>,
        write_log: bool,
    ) -> Self {
        Self {
            address: RegisterAddress::indexed(register, index),
            value: value.into(),
            write_log,
        }
    }
}

/// Capability surface the bring-up sequencer drives.
///
/// Implementors provide [`write`](Self::write) and [`read`](Self::read); the named
/// settings are expressed in terms of those. Each call must complete (or fail) before
/// returning; the sequencer never has two operations in flight.
#[async_trait]
pub trait DeviceCommandPort: Send + Sync {
    /// Apply one register write.
    async fn write(&self, write: RegisterWrite) -> DeviceResult<()>;

    /// Read the current value of one register.
    async fn read(&self, address: RegisterAddress) -> DeviceResult<RegisterValue>;

    // --- bulk -----------------------------------------------------------------

    /// Refresh every cached register.
    async fn set_read_all(&self, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::ReadAll, true, write_log)).await
    }

    /// Load firmware defaults.
    async fn set_defaults(&self, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::SetDefaults, true, write_log)).await
    }

    // --- per band ---------------------------------------------------------------

    /// Swap I and Q on the ADC side of `band`.
    async fn set_iq_swap_in(&self, band: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::IqSwapIn, band, value, write_log)).await
    }

    /// Swap I and Q on the DAC side of `band`.
    async fn set_iq_swap_out(&self, band: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::IqSwapOut, band, value, write_log)).await
    }

    /// Coarse reference phase delay of `band`.
    async fn set_ref_phase_delay(
        &self,
        band: u32,
        value: i64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::RefPhaseDelay, band, value, write_log)).await
    }

    /// Fine reference phase delay of `band`.
    async fn set_ref_phase_delay_fine(
        &self,
        band: u32,
        value: i64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(
            Register::RefPhaseDelayFine,
            band,
            value,
            write_log,
        ))
        .await
    }

    /// Output tone scale of `band`.
    async fn set_tone_scale(&self, band: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::ToneScale, band, value, write_log)).await
    }

    /// Analysis filter scale of `band`.
    async fn set_analysis_scale(&self, band: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::AnalysisScale, band, value, write_log)).await
    }

    /// Tracking feedback enable of `band`.
    async fn set_feedback_enable(
        &self,
        band: u32,
        value: i64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::FeedbackEnable, band, value, write_log)).await
    }

    /// Tracking feedback gain of `band`.
    async fn set_feedback_gain(&self, band: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::FeedbackGain, band, value, write_log)).await
    }

    /// Tracking feedback polarity of `band`.
    async fn set_feedback_polarity(
        &self,
        band: u32,
        value: i64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(
            Register::FeedbackPolarity,
            band,
            value,
            write_log,
        ))
        .await
    }

    /// Tracking feedback limit of `band`, kHz.
    async fn set_feedback_limit_khz(
        &self,
        band: u32,
        value: i64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(
            Register::FeedbackLimitKhz,
            band,
            value,
            write_log,
        ))
        .await
    }

    /// LMS filter gain of `band`.
    async fn set_lms_gain(&self, band: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::LmsGain, band, value, write_log)).await
    }

    /// Synthesis filter scale of `band`.
    async fn set_synthesis_scale(
        &self,
        band: u32,
        value: i64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::SynthesisScale, band, value, write_log)).await
    }

    /// DSP enable of `band`.
    async fn set_dsp_enable(&self, band: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::DspEnable, band, value, write_log)).await
    }

    /// Data stream enable of `band`.
    async fn set_stream_enable(&self, band: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::StreamEnable, band, value, write_log)).await
    }

    /// Route data-out mux slot `mux` to `source`.
    async fn set_data_out_mux(&self, mux: u32, source: &str, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::DataOutMux, mux, source, write_log)).await
    }

    /// Up-converter attenuation. Indexed by attenuator, not band.
    async fn set_att_uc(&self, attenuator: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::AttUc, attenuator, value, write_log)).await
    }

    /// Down-converter attenuation. Indexed by attenuator, not band.
    async fn set_att_dc(&self, attenuator: u32, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::AttDc, attenuator, value, write_log)).await
    }

    // --- timing / triggers ------------------------------------------------------

    /// Pulse width of EVR trigger `channel`.
    async fn set_trigger_width(
        &self,
        channel: u32,
        value: i64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::TriggerWidth, channel, value, write_log)).await
    }

    /// Enable EVR trigger `channel`.
    async fn set_trigger_enable(
        &self,
        channel: u32,
        value: i64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(Register::TriggerEnable, channel, value, write_log)).await
    }

    /// Enable EVR channel `channel`.
    async fn set_evr_channel_reg_enable(
        &self,
        channel: u32,
        value: bool,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(
            Register::EvrChannelRegEnable,
            channel,
            value,
            write_log,
        ))
        .await
    }

    /// Enable the trigger register of EVR channel `channel`.
    async fn set_evr_trigger_reg_enable(
        &self,
        channel: u32,
        value: bool,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(
            Register::EvrTriggerRegEnable,
            channel,
            value,
            write_log,
        ))
        .await
    }

    /// Destination select of EVR channel `channel`.
    async fn set_evr_trigger_channel_reg_dest_sel(
        &self,
        channel: u32,
        value: i64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::indexed(
            Register::EvrTriggerDestSel,
            channel,
            value,
            write_log,
        ))
        .await
    }

    /// Flux-ramp trigger enable.
    async fn set_enable_ramp_trigger(&self, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::EnableRampTrigger, value, write_log)).await
    }

    // --- flux ramp / RTM ------------------------------------------------------------

    /// Flux-ramp source select.
    async fn set_select_ramp(&self, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::SelectRamp, value, write_log)).await
    }

    /// Flux-ramp start mode.
    async fn set_ramp_start_mode(&self, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::RampStartMode, value, write_log)).await
    }

    /// Drive the RTM CPLD reset line.
    async fn set_cpld_reset(&self, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::CpldReset, value, write_log)).await
    }

    /// Toggle the RTM CPLD.
    async fn cpld_toggle(&self, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::CpldToggle, true, write_log)).await
    }

    /// Disable the flux-ramp output.
    async fn flux_ramp_off(&self, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::FluxRampEnable, false, write_log)).await
    }

    /// Configure flux-ramp rate and amplitude.
    async fn flux_ramp_setup(
        &self,
        reset_rate_khz: f64,
        fraction_full_scale: f64,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::global(
            Register::FluxRampSetup,
            RegisterValue::FluxRamp {
                reset_rate_khz,
                fraction_full_scale,
            },
            write_log,
        ))
        .await
    }

    // --- MCE converter channel --------------------------------------------------------

    /// Write the MCE streamer configuration.
    async fn make_smurf_to_mce_config(
        &self,
        params: &SmurfToMceParams,
        write_log: bool,
    ) -> DeviceResult<()> {
        self.write(RegisterWrite::global(
            Register::SmurfToMceConfig,
            RegisterValue::SmurfToMce(params.clone()),
            write_log,
        ))
        .await
    }

    /// Read back the MCE streamer configuration.
    async fn read_smurf_to_mce_config(&self) -> DeviceResult<RegisterValue> {
        self.read(RegisterAddress::global(Register::SmurfToMceConfig)).await
    }

    /// Start or stop the MCE data stream.
    async fn set_smurf_to_mce_stream(&self, value: bool, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::SmurfToMceStream, value, write_log)).await
    }

    /// Start or stop the MCE file writer.
    async fn set_smurf_to_mce_writer(&self, value: bool, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::SmurfToMceWriter, value, write_log)).await
    }

    /// Drive the MCE buffer clear line.
    async fn set_smurf_to_mce_clear(&self, value: i64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::SmurfToMceClear, value, write_log)).await
    }

    // --- cold amplifiers ------------------------------------------------------------------

    /// HEMT gate voltage, volts.
    async fn set_hemt_gate_voltage(&self, volts: f64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::HemtGateVoltage, volts, write_log)).await
    }

    /// LNA gate voltage, volts.
    async fn set_lna_gate_voltage(&self, volts: f64, write_log: bool) -> DeviceResult<()> {
        self.write(RegisterWrite::global(Register::LnaGateVoltage, volts, write_log)).await
    }

    /// Read back the HEMT gate voltage.
    async fn get_hemt_gate_voltage(&self) -> DeviceResult<RegisterValue> {
        self.read(RegisterAddress::global(Register::HemtGateVoltage)).await
    }

    /// Read back the LNA gate voltage.
    async fn get_lna_gate_voltage(&self) -> DeviceResult<RegisterValue> {
        self.read(RegisterAddress::global(Register::LnaGateVoltage)).await
    }
}
