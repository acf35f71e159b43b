//! Bring-up controller for SMuRF microwave-resonator readout systems.
//!
//! The crate turns an instrument configuration file describing how one readout
//! system is wired into:
//!
//! - validated, read-only lookup tables ([`hardware_map`])
//! - a run session with its directory tree and logfile ([`session`])
//! - an ordered sequence of register writes that takes the carrier from power-on
//!   defaults to streaming-ready ([`sequencer`])
//!
//! Hardware access goes through the [`device::DeviceCommandPort`] trait. The register
//! transport itself lives outside this crate; [`device::MockDevicePort`] simulates it
//! for offline runs and tests. [`controller::SmurfController`] ties everything together.

pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod hardware_map;
pub mod logging;
pub mod sequencer;
pub mod session;

pub use controller::SmurfController;
pub use error::{AppResult, SmurfError};
