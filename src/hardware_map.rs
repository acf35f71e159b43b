//! Static lookup tables describing how the instrument is wired.
//!
//! Each table is built from one configuration section by a pure function, so every
//! builder can be tested against a literal JSON fixture. Rules shared by all builders:
//!
//! - the section must be present and be a non-empty mapping
//! - rows follow the key order of the section as written in the file, never numeric
//!   order; consumers must not assume sorting
//! - indices parsed from keys or values must be non-negative integers, anything else is
//!   a [`SmurfError::Configuration`] and no partial table is returned
//!
//! [`HardwareMaps::build`] runs every builder; [`Constants::from_config`] collects the
//! scalar calibration values. Both happen once per controller and are read-only
//! afterwards.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{
    kind_of, AmplifierConfig, ConfigView, ConstantConfig, FluxRampConfig, SmurfToMceConfig,
};
use crate::error::{AppResult, SmurfError};

/// LMS tracking frequency every band starts with.
pub const DEFAULT_LMS_FREQ_HZ: u32 = 4000;

/// Flux-ramp amplitude as a fraction of the DAC range.
pub const DEFAULT_FRACTION_FULL_SCALE: f64 = 0.5;

// =============================================================================
// Tables
// =============================================================================

/// One attenuator wired to one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttenuatorBand {
    /// Attenuator number, from the key's final digit.
    pub attenuator: u32,
    /// Band the attenuator serves.
    pub band: u32,
}

/// Attenuator number ↔ band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttenuatorBandMap {
    rows: Vec<AttenuatorBand>,
}

impl AttenuatorBandMap {
    /// Keys are attenuator names whose last character is the attenuator number
    /// (`"att1"` → 1); values are band indices.
    pub fn from_section(section: &Map<String, Value>) -> AppResult<Self> {
        let mut seen = HashSet::new();
        let mut rows = Vec::with_capacity(section.len());
        for (key, value) in section {
            let attenuator = trailing_digit(key).ok_or_else(|| {
                SmurfError::config(format!("attenuator key '{key}' does not end in a digit"))
            })?;
            if !seen.insert(attenuator) {
                return Err(SmurfError::config(format!(
                    "attenuator {attenuator} is declared more than once (key '{key}')"
                )));
            }
            let band = index_value(value, &format!("attenuator.{key}"))?;
            rows.push(AttenuatorBand { attenuator, band });
        }
        Ok(Self { rows })
    }

    /// Rows in configuration key order.
    pub fn rows(&self) -> &[AttenuatorBand] {
        &self.rows
    }

    /// Number of attenuators.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no attenuator is wired.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Attenuator wired to `band`, first match in row order.
    pub fn attenuator_for_band(&self, band: u32) -> Option<u32> {
        self.rows
            .iter()
            .find(|r| r.band == band)
            .map(|r| r.attenuator)
    }

    /// Reverse lookup of [`attenuator_for_band`](Self::attenuator_for_band).
    pub fn band_for_attenuator(&self, attenuator: u32) -> Option<u32> {
        self.rows
            .iter()
            .find(|r| r.attenuator == attenuator)
            .map(|r| r.band)
    }
}

/// Frequency span covered by one chip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChipFrequency {
    /// Chip number.
    pub chip: u32,
    /// Lower edge, GHz.
    pub freq_low_ghz: f64,
    /// Upper edge, GHz.
    pub freq_high_ghz: f64,
}

/// Chip → frequency range covered, in GHz.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChipFrequencyMap {
    rows: Vec<ChipFrequency>,
}

impl ChipFrequencyMap {
    /// Each value must be a `[low, high]` pair.
    pub fn from_section(section: &Map<String, Value>) -> AppResult<Self> {
        let rows = section
            .iter()
            .map(|(key, value)| {
                let ctx = format!("chip_to_freq.{key}");
                let chip = index_key(key, &ctx)?;
                let [freq_low_ghz, freq_high_ghz] = number_pair(value, &ctx)?;
                if freq_low_ghz > freq_high_ghz {
                    return Err(SmurfError::config(format!(
                        "{ctx}: low edge {freq_low_ghz} GHz is above high edge {freq_high_ghz} GHz"
                    )));
                }
                Ok(ChipFrequency {
                    chip,
                    freq_low_ghz,
                    freq_high_ghz,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { rows })
    }

    /// Rows in configuration key order.
    pub fn rows(&self) -> &[ChipFrequency] {
        &self.rows
    }

    /// First chip whose range contains `freq_ghz`.
    pub fn chip_for_freq(&self, freq_ghz: f64) -> Option<u32> {
        self.rows
            .iter()
            .find(|r| r.freq_low_ghz <= freq_ghz && freq_ghz <= r.freq_high_ghz)
            .map(|r| r.chip)
    }
}

/// One `band_to_chip` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandChips {
    /// Position of the row in the section, not the band number.
    pub index: usize,
    /// Chip entries as listed.
    pub chips: Vec<f64>,
}

/// Band → chip assignment rows, one per configured band, in key order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandChipMap {
    rows: Vec<BandChips>,
}

impl BandChipMap {
    /// Every row must be a non-empty list of numbers, and all rows the same length.
    pub fn from_section(section: &Map<String, Value>) -> AppResult<Self> {
        let mut width = None;
        let mut rows = Vec::with_capacity(section.len());
        for (index, (key, value)) in section.iter().enumerate() {
            let ctx = format!("band_to_chip.{key}");
            let chips = number_list(value, &ctx)?;
            if chips.is_empty() {
                return Err(SmurfError::config(format!("{ctx}: empty chip assignment")));
            }
            match width {
                None => width = Some(chips.len()),
                Some(w) if w != chips.len() => {
                    return Err(SmurfError::config(format!(
                        "{ctx}: has {} entries, earlier rows have {w}",
                        chips.len()
                    )))
                }
                Some(_) => {}
            }
            rows.push(BandChips { index, chips });
        }
        Ok(Self { rows })
    }

    /// Rows in configuration key order.
    pub fn rows(&self) -> &[BandChips] {
        &self.rows
    }
}

/// One bias group and its DAC pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BiasGroupPair {
    /// Bias group number.
    pub bias_group: u32,
    /// The two DACs driving it.
    pub pair: [i64; 2],
}

/// Bias group → DAC pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BiasGroupPairMap {
    rows: Vec<BiasGroupPair>,
}

impl BiasGroupPairMap {
    /// Each value must be a list of exactly two integers.
    pub fn from_section(section: &Map<String, Value>) -> AppResult<Self> {
        let rows = section
            .iter()
            .map(|(key, value)| {
                let ctx = format!("bias_group_to_pair.{key}");
                let bias_group = index_key(key, &ctx)?;
                let pair = integer_pair(value, &ctx)?;
                Ok(BiasGroupPair { bias_group, pair })
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { rows })
    }

    /// Rows in configuration key order.
    pub fn rows(&self) -> &[BiasGroupPair] {
        &self.rows
    }

    /// Rows flattened to `(bias_group, first, second)`.
    pub fn as_tuples(&self) -> Vec<(u32, i64, i64)> {
        self.rows
            .iter()
            .map(|r| (r.bias_group, r.pair[0], r.pair[1]))
            .collect()
    }

    /// DAC pair driving `bias_group`.
    pub fn pair_for(&self, bias_group: u32) -> Option<[i64; 2]> {
        self.rows
            .iter()
            .find(|r| r.bias_group == bias_group)
            .map(|r| r.pair)
    }
}

/// One PIC and the bias group it drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PicBiasGroup {
    /// PIC number.
    pub pic: u32,
    /// Bias group number.
    pub bias_group: u32,
}

/// Peripheral interface controller → bias group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PicBiasGroupMap {
    rows: Vec<PicBiasGroup>,
}

impl PicBiasGroupMap {
    /// Keys and values must both be non-negative integers.
    pub fn from_section(section: &Map<String, Value>) -> AppResult<Self> {
        let rows = section
            .iter()
            .map(|(key, value)| {
                let ctx = format!("pic_to_bias_group.{key}");
                Ok(PicBiasGroup {
                    pic: index_key(key, &ctx)?,
                    bias_group: index_value(value, &ctx)?,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { rows })
    }

    /// Rows in configuration key order.
    pub fn rows(&self) -> &[PicBiasGroup] {
        &self.rows
    }
}

/// Closed frequency interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrequencyInterval {
    /// Lower edge.
    pub freq_low: f64,
    /// Upper edge.
    pub freq_high: f64,
}

/// Frequency intervals excluded from resonator search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadResonatorMask {
    rows: Vec<FrequencyInterval>,
}

impl BadResonatorMask {
    /// Each value must be a `[low, high]` pair.
    pub fn from_section(section: &Map<String, Value>) -> AppResult<Self> {
        let rows = section
            .iter()
            .map(|(key, value)| {
                let [freq_low, freq_high] = number_pair(value, &format!("bad_mask.{key}"))?;
                Ok(FrequencyInterval {
                    freq_low,
                    freq_high,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { rows })
    }

    /// Intervals in configuration key order.
    pub fn rows(&self) -> &[FrequencyInterval] {
        &self.rows
    }

    /// True when `freq` falls inside any interval, edges included.
    pub fn is_masked(&self, freq: f64) -> bool {
        self.rows
            .iter()
            .any(|r| r.freq_low <= freq && freq <= r.freq_high)
    }
}

/// Every lookup table, built together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareMaps {
    /// From the `attenuator` section.
    pub att_to_band: AttenuatorBandMap,
    /// From the `chip_to_freq` section.
    pub chip_to_freq: ChipFrequencyMap,
    /// From the `band_to_chip` section.
    pub band_to_chip: BandChipMap,
    /// From the `bias_group_to_pair` section.
    pub bias_group_to_pair: BiasGroupPairMap,
    /// From the `pic_to_bias_group` section.
    pub pic_to_bias_group: PicBiasGroupMap,
    /// From the `bad_mask` section.
    pub bad_mask: BadResonatorMask,
}

impl HardwareMaps {
    /// Build every table. The first malformed section aborts the build.
    pub fn build(config: &ConfigView) -> AppResult<Self> {
        Ok(Self {
            att_to_band: AttenuatorBandMap::from_section(config.section("attenuator")?)?,
            chip_to_freq: ChipFrequencyMap::from_section(config.section("chip_to_freq")?)?,
            band_to_chip: BandChipMap::from_section(config.section("band_to_chip")?)?,
            bias_group_to_pair: BiasGroupPairMap::from_section(
                config.section("bias_group_to_pair")?,
            )?,
            pic_to_bias_group: PicBiasGroupMap::from_section(
                config.section("pic_to_bias_group")?,
            )?,
            bad_mask: BadResonatorMask::from_section(config.section("bad_mask")?)?,
        })
    }
}

// =============================================================================
// Constants and per-band state
// =============================================================================

/// Scalar calibration and hardware constants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constants {
    /// Flux-quantum calibration, pA per Φ0.
    pub pa_per_phi0: f64,
    /// Bias line resistance, ohms.
    pub bias_line_resistance: f64,
    /// TES shunt resistance.
    pub r_sh: f64,
    /// Current ratio of high-current to low-current bias mode.
    pub high_low_current_ratio: f64,
    /// Width of the flux-ramp reset counter.
    pub num_flux_ramp_counter_bits: u32,
    /// Fraction of full scale used when re-arming the flux ramp.
    pub fraction_full_scale: f64,
    /// Every bias group on the cryostat.
    pub all_bias_groups: Vec<u32>,
    /// Configured amplifier gate voltages.
    pub amplifier: AmplifierConfig,
    /// MCE streamer settings.
    pub smurf_to_mce: SmurfToMceConfig,
}

impl Constants {
    /// Collect the constants from their scattered top-level keys.
    pub fn from_config(config: &ConfigView) -> AppResult<Self> {
        let constant: ConstantConfig = config.typed("constant")?;
        let flux_ramp: FluxRampConfig = config.typed("flux_ramp")?;
        let all_bias_groups = match config.require("all_bias_groups")? {
            Value::Array(items) => items
                .iter()
                .map(|v| index_value(v, "all_bias_groups"))
                .collect::<AppResult<Vec<_>>>()?,
            other => {
                return Err(SmurfError::config(format!(
                    "'all_bias_groups' must be a list, found {}",
                    kind_of(other)
                )))
            }
        };
        Ok(Self {
            pa_per_phi0: constant.pa_per_phi0,
            bias_line_resistance: config.number("bias_line_resistance")?,
            r_sh: config.number("R_sh")?,
            high_low_current_ratio: config.number("high_low_current_ratio")?,
            num_flux_ramp_counter_bits: flux_ramp.num_flux_ramp_counter_bits,
            fraction_full_scale: DEFAULT_FRACTION_FULL_SCALE,
            all_bias_groups,
            amplifier: config.typed("amplifier")?,
            smurf_to_mce: config.typed("smurf_to_mce")?,
        })
    }
}

/// Mutable tracking state kept for each configured band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerBandState {
    /// Channel → locked flag, filled in by tracking analysis.
    pub lock_status: BTreeMap<u32, bool>,
    /// LMS tracking frequency, Hz.
    pub lms_freq_hz: u32,
}

impl Default for PerBandState {
    fn default() -> Self {
        Self {
            lock_status: BTreeMap::new(),
            lms_freq_hz: DEFAULT_LMS_FREQ_HZ,
        }
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

fn trailing_digit(key: &str) -> Option<u32> {
    key.chars().last().and_then(|c| c.to_digit(10))
}

fn index_key(key: &str, ctx: &str) -> AppResult<u32> {
    key.trim().parse::<u32>().map_err(|_| {
        SmurfError::config(format!("{ctx}: key '{key}' is not a non-negative integer"))
    })
}

fn index_value(value: &Value, ctx: &str) -> AppResult<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            SmurfError::config(format!("{ctx}: expected a non-negative integer, found {value}"))
        })
}

fn number_list(value: &Value, ctx: &str) -> AppResult<Vec<f64>> {
    let items = value.as_array().ok_or_else(|| {
        SmurfError::config(format!("{ctx}: expected a list, found {}", kind_of(value)))
    })?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| SmurfError::config(format!("{ctx}: '{v}' is not a number")))
        })
        .collect()
}

fn number_pair(value: &Value, ctx: &str) -> AppResult<[f64; 2]> {
    match number_list(value, ctx)?.as_slice() {
        [a, b] => Ok([*a, *b]),
        other => Err(SmurfError::config(format!(
            "{ctx}: expected two numbers, found {}",
            other.len()
        ))),
    }
}

fn integer_pair(value: &Value, ctx: &str) -> AppResult<[i64; 2]> {
    let items = value.as_array().ok_or_else(|| {
        SmurfError::config(format!("{ctx}: expected a list, found {}", kind_of(value)))
    })?;
    let ints = items
        .iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| SmurfError::config(format!("{ctx}: '{v}' is not an integer")))
        })
        .collect::<AppResult<Vec<_>>>()?;
    match ints.as_slice() {
        [a, b] => Ok([*a, *b]),
        other => Err(SmurfError::config(format!(
            "{ctx}: expected a pair, found {} values",
            other.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn section(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("fixture must be a mapping"),
        }
    }

    #[test]
    fn test_attenuator_rows_follow_key_order() {
        let map = AttenuatorBandMap::from_section(&section(json!({
            "att3": 2, "att1": 0, "att4": 3, "att2": 1
        })))
        .unwrap();

        assert_eq!(map.len(), 4);
        let atts: Vec<_> = map.rows().iter().map(|r| r.attenuator).collect();
        assert_eq!(atts, [3, 1, 4, 2]);
        assert_eq!(map.attenuator_for_band(3), Some(4));
        assert_eq!(map.band_for_attenuator(1), Some(0));
        assert_eq!(map.attenuator_for_band(7), None);
    }

    #[test]
    fn test_attenuator_index_is_last_character_only() {
        let map = AttenuatorBandMap::from_section(&section(json!({"att10": 5}))).unwrap();
        assert_eq!(map.rows()[0].attenuator, 0);
    }

    #[test]
    fn test_attenuator_non_numeric_suffix() {
        let err = AttenuatorBandMap::from_section(&section(json!({
            "att1": 0, "att_x": 1
        })))
        .unwrap_err();
        assert!(matches!(err, SmurfError::Configuration(ref m) if m.contains("att_x")));
    }

    #[test]
    fn test_attenuator_duplicates_and_negative_band() {
        assert!(AttenuatorBandMap::from_section(&section(json!({"a1": 0, "b1": 1}))).is_err());
        assert!(AttenuatorBandMap::from_section(&section(json!({"att1": -1}))).is_err());
        assert!(AttenuatorBandMap::from_section(&section(json!({"att1": 1.5}))).is_err());
    }

    #[test]
    fn test_bias_group_pairs_in_key_order() {
        let map = BiasGroupPairMap::from_section(&section(json!({
            "0": [1, 2], "3": [4, 5]
        })))
        .unwrap();
        assert_eq!(map.as_tuples(), vec![(0, 1, 2), (3, 4, 5)]);
        assert_eq!(map.pair_for(3), Some([4, 5]));
    }

    #[test]
    fn test_bias_group_key_must_be_integer() {
        assert!(BiasGroupPairMap::from_section(&section(json!({"bg0": [1, 2]}))).is_err());
        assert!(BiasGroupPairMap::from_section(&section(json!({"0": [1, 2, 3]}))).is_err());
        assert!(BiasGroupPairMap::from_section(&section(json!({"0": [1.5, 2]}))).is_err());
    }

    #[test]
    fn test_chip_to_freq() {
        let map = ChipFrequencyMap::from_section(&section(json!({
            "1": [4.0, 4.5], "0": [4.5, 5.0]
        })))
        .unwrap();
        assert_eq!(map.rows()[0].chip, 1);
        assert_eq!(map.chip_for_freq(4.75), Some(0));
        assert_eq!(map.chip_for_freq(6.0), None);
    }

    #[test]
    fn test_chip_to_freq_rejects_inverted_interval() {
        let err = ChipFrequencyMap::from_section(&section(json!({"0": [5.0, 4.0]}))).unwrap_err();
        assert!(err.to_string().contains("above high edge"), "{err}");
    }

    #[test]
    fn test_band_to_chip_enumerates_rows() {
        let map = BandChipMap::from_section(&section(json!({
            "band_2": [1, 0, 2, 3],
            "band_0": [0, 1, 2, 3]
        })))
        .unwrap();
        assert_eq!(map.rows()[0].index, 0);
        assert_eq!(map.rows()[0].chips, vec![1.0, 0.0, 2.0, 3.0]);
        assert_eq!(map.rows()[1].index, 1);
    }

    #[test]
    fn test_band_to_chip_ragged_rows() {
        assert!(BandChipMap::from_section(&section(json!({
            "a": [0, 1, 2, 3], "b": [0, 1]
        })))
        .is_err());
    }

    #[test]
    fn test_pic_and_bad_mask() {
        let pics =
            PicBiasGroupMap::from_section(&section(json!({"5": 0, "2": 1}))).unwrap();
        assert_eq!(
            pics.rows(),
            &[
                PicBiasGroup { pic: 5, bias_group: 0 },
                PicBiasGroup { pic: 2, bias_group: 1 }
            ]
        );

        let mask = BadResonatorMask::from_section(&section(json!({
            "0": [5000.0, 5100.0], "1": [5500.0, 5510.0]
        })))
        .unwrap();
        assert!(mask.is_masked(5050.0));
        assert!(!mask.is_masked(5200.0));
    }

    #[test]
    fn test_per_band_state_default() {
        let state = PerBandState::default();
        assert!(state.lock_status.is_empty());
        assert_eq!(state.lms_freq_hz, 4000);
    }
}
