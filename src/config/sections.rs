//! Typed views of individual configuration sections.
//!
//! Optional keys are explicit `Option`s or carry a serde default instead of being
//! probed for at use sites.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::SmurfToMceParams;
use crate::error::{AppResult, SmurfError};

/// Counter width of the flux-ramp reset counter when the config does not say.
pub const DEFAULT_FLUX_RAMP_COUNTER_BITS: u32 = 20;

/// `constant` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantConfig {
    /// Flux-quantum calibration, pA per Φ0.
    #[serde(rename = "pA_per_phi0")]
    pub pa_per_phi0: f64,
}

/// `amplifier` section. Either gate voltage may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmplifierConfig {
    /// HEMT gate voltage, volts.
    #[serde(rename = "hemt_Vg", default)]
    pub hemt_vg: Option<f64>,
    /// LNA gate voltage, volts.
    #[serde(rename = "LNA_Vg", default)]
    pub lna_vg: Option<f64>,
}

/// `flux_ramp` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxRampConfig {
    /// Ramp source selector.
    pub select_ramp: i64,
    /// Ramp start-mode register value.
    pub ramp_start_mode: i64,
    /// Width of the ramp reset counter.
    #[serde(default = "default_counter_bits")]
    pub num_flux_ramp_counter_bits: u32,
}

fn default_counter_bits() -> u32 {
    DEFAULT_FLUX_RAMP_COUNTER_BITS
}

/// `smurf_to_mce` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmurfToMceConfig {
    /// Config file handed to the MCE streamer.
    pub smurf_to_mce_file: PathBuf,
    /// Address of the receiving MCE host.
    pub receiver_ip: String,
    /// Receiver UDP port.
    pub port_number: u16,
    /// Channel mask file.
    pub mask_file: PathBuf,
}

impl SmurfToMceConfig {
    /// Parameters for the streamer config write.
    pub fn params(&self) -> SmurfToMceParams {
        SmurfToMceParams {
            config_file: self.smurf_to_mce_file.clone(),
            receiver_ip: self.receiver_ip.clone(),
            port: self.port_number,
            mask_file: self.mask_file.clone(),
        }
    }
}

/// Per-band defaults from an `init.band_<n>` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandInit {
    /// Swap I and Q on the ADC side.
    pub iq_swap_in: i64,
    /// Swap I and Q on the DAC side.
    pub iq_swap_out: i64,
    /// Coarse reference phase delay.
    #[serde(rename = "refPhaseDelay")]
    pub ref_phase_delay: i64,
    /// Fine reference phase delay.
    #[serde(rename = "refPhaseDelayFine")]
    pub ref_phase_delay_fine: i64,
    /// Output tone scale.
    #[serde(rename = "toneScale")]
    pub tone_scale: i64,
    /// Analysis filter scale.
    #[serde(rename = "analysisScale")]
    pub analysis_scale: i64,
    /// Tracking feedback on (1) or off (0).
    #[serde(rename = "feedbackEnable")]
    pub feedback_enable: i64,
    /// Tracking feedback gain.
    #[serde(rename = "feedbackGain")]
    pub feedback_gain: i64,
    /// LMS filter gain.
    #[serde(rename = "lmsGain")]
    pub lms_gain: i64,
    /// Tracking feedback polarity.
    #[serde(rename = "feedbackPolarity")]
    pub feedback_polarity: i64,
    /// Synthesis filter scale.
    #[serde(rename = "synthesisScale")]
    pub synthesis_scale: i64,
    /// Data-out mux slots routed to user data for this band.
    pub data_out_mux: Vec<u32>,
    /// Up-converter attenuation.
    pub att_uc: i64,
    /// Down-converter attenuation.
    pub att_dc: i64,
    /// Overrides `init.dspEnable` for this band.
    #[serde(rename = "dspEnable", default)]
    pub dsp_enable: Option<i64>,
}

/// `init` section: declared bands, global DSP enable and the `band_<n>` blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitConfig {
    /// Bands to bring up, in order.
    pub bands: Vec<u32>,
    /// DSP enable applied to every band without its own override.
    #[serde(rename = "dspEnable")]
    pub dsp_enable: i64,
    /// Every other key under `init`, including the `band_<n>` blocks.
    #[serde(flatten)]
    pub blocks: Map<String, Value>,
}

impl InitConfig {
    /// Typed defaults for `band`. Missing or malformed blocks are configuration errors.
    pub fn band(&self, band: u32) -> AppResult<BandInit> {
        let key = format!("band_{band}");
        let block = self.blocks.get(&key).ok_or_else(|| {
            SmurfError::config(format!("init declares band {band} but has no '{key}' block"))
        })?;
        serde_json::from_value(block.clone())
            .map_err(|e| SmurfError::config(format!("init.{key}: {e}")))
    }

    /// DSP enable for `band`, falling back to the global value.
    pub fn dsp_enable_for(&self, band: &BandInit) -> i64 {
        band.dsp_enable.unwrap_or(self.dsp_enable)
    }

    /// Typed blocks for every declared band, in declaration order.
    pub fn all_bands(&self) -> AppResult<Vec<(u32, BandInit)>> {
        self.bands
            .iter()
            .map(|&b| self.band(b).map(|init| (b, init)))
            .collect()
    }
}
