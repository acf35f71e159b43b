//! In-memory device port.
//!
//! `MockDevicePort` simulates the register file of a readout carrier. It backs the
//! controller's offline mode and is the test double for the sequencer:
//!
//! - every write and read is appended to a call log, timestamped with
//!   [`tokio::time::Instant`] so paused-clock tests can check delays
//! - writes update a register map, so the final state of two runs can be compared
//! - reads of never-written registers return the power-on value `Int(0)`
//! - a single register can be armed to fail, to exercise abort paths
//!
//! # Example
//!
//! ```rust,ignore
//! let port = MockDevicePort::new("smurf_server_s5");
//! port.set_stream_enable(0, 1, true).await?;
//! assert_eq!(port.calls().await.len(), 1);
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    DeviceCommandPort, Register, RegisterAddress, RegisterValue, RegisterWrite, SmurfToMceParams,
};
use crate::error::{DeviceError, DeviceResult};

/// Direction of a recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// A register write.
    Write,
    /// A register read.
    Read,
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Read or write.
    pub kind: CallKind,
    /// Register and index touched.
    pub address: RegisterAddress,
    /// Value written, or value returned by a read.
    pub value: RegisterValue,
    /// When the call arrived, on the tokio clock.
    pub at: Instant,
}

/// Simulated register file with a call log.
pub struct MockDevicePort {
    epics_root: String,
    registers: RwLock<BTreeMap<RegisterAddress, RegisterValue>>,
    calls: RwLock<Vec<RecordedCall>>,
    fail_on: RwLock<Option<Register>>,
    assigned_receiver_ip: RwLock<Option<String>>,
}

impl MockDevicePort {
    /// Create a port whose registers are all at their power-on value.
    pub fn new(epics_root: impl Into<String>) -> Self {
        Self {
            epics_root: epics_root.into(),
            registers: RwLock::new(BTreeMap::new()),
            calls: RwLock::new(Vec::new()),
            fail_on: RwLock::new(None),
            assigned_receiver_ip: RwLock::new(None),
        }
    }

    /// PV prefix used when logging writes.
    pub fn epics_root(&self) -> &str {
        &self.epics_root
    }

    /// Make every subsequent access to `register` fail, or clear with `None`.
    pub async fn fail_on(&self, register: Option<Register>) {
        *self.fail_on.write().await = register;
    }

    /// Emulate the converter picking its own receiver address: read-backs of the
    /// converter configuration report `ip` regardless of what was written.
    pub async fn assign_receiver_ip(&self, ip: impl Into<String>) {
        *self.assigned_receiver_ip.write().await = Some(ip.into());
    }

    /// Snapshot of the call log.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Only the writes, in issue order.
    pub async fn writes(&self) -> Vec<RecordedCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.kind == CallKind::Write)
            .cloned()
            .collect()
    }

    /// Snapshot of the register file.
    pub async fn registers(&self) -> BTreeMap<RegisterAddress, RegisterValue> {
        self.registers.read().await.clone()
    }

    /// Current value held for `address`.
    pub async fn value(&self, address: RegisterAddress) -> Option<RegisterValue> {
        self.registers.read().await.get(&address).cloned()
    }

    /// Forget recorded calls, keeping register contents.
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    async fn check_armed_failure(
        &self,
        address: RegisterAddress,
        kind: CallKind,
    ) -> DeviceResult<()> {
        if *self.fail_on.read().await == Some(address.register) {
            let message = "simulated bus fault".to_string();
            return Err(match kind {
                CallKind::Write => DeviceError::Write {
                    register: address.register,
                    message,
                },
                CallKind::Read => DeviceError::Read {
                    register: address.register,
                    message,
                },
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceCommandPort for MockDevicePort {
    async fn write(&self, write: RegisterWrite) -> DeviceResult<()> {
        write.address.check_scope()?;
        self.check_armed_failure(write.address, CallKind::Write).await?;

        let pv = write.address.pv_name(&self.epics_root);
        if write.write_log {
            info!(pv = %pv, value = %write.value, "caput");
        } else {
            debug!(pv = %pv, value = %write.value, "caput");
        }

        self.registers
            .write()
            .await
            .insert(write.address, write.value.clone());
        self.calls.write().await.push(RecordedCall {
            kind: CallKind::Write,
            address: write.address,
            value: write.value,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn read(&self, address: RegisterAddress) -> DeviceResult<RegisterValue> {
        address.check_scope()?;
        self.check_armed_failure(address, CallKind::Read).await?;

        let stored = self
            .registers
            .read()
            .await
            .get(&address)
            .cloned()
            .unwrap_or(RegisterValue::Int(0));

        let value = match (stored, self.assigned_receiver_ip.read().await.as_ref()) {
            (RegisterValue::SmurfToMce(params), Some(ip)) => {
                RegisterValue::SmurfToMce(SmurfToMceParams {
                    receiver_ip: ip.clone(),
                    ..params
                })
            }
            (other, _) => other,
        };

        debug!(pv = %address.pv_name(&self.epics_root), value = %value, "caget");
        self.calls.write().await.push(RecordedCall {
            kind: CallKind::Read,
            address,
            value: value.clone(),
            at: Instant::now(),
        });
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_write_then_read() {
        let port = MockDevicePort::new("test_epics");
        port.set_tone_scale(2, 5, false).await.unwrap();

        let value = port
            .read(RegisterAddress::indexed(Register::ToneScale, 2))
            .await
            .unwrap();
        assert_eq!(value, RegisterValue::Int(5));

        let calls = port.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].kind, CallKind::Write);
        assert_eq!(calls[1].kind, CallKind::Read);
    }

    #[tokio::test]
    async fn test_unwritten_register_reads_power_on_value() {
        let port = MockDevicePort::new("test_epics");
        let value = port.get_hemt_gate_voltage().await.unwrap();
        assert_eq!(value, RegisterValue::Int(0));
    }

    #[tokio::test]
    async fn test_armed_failure() {
        let port = MockDevicePort::new("test_epics");
        port.fail_on(Some(Register::CpldReset)).await;

        let err = port.set_cpld_reset(0, true).await.unwrap_err();
        assert_eq!(err.register(), Register::CpldReset);
        assert!(port.calls().await.is_empty());

        port.fail_on(None).await;
        port.set_cpld_reset(0, true).await.unwrap();
        assert_eq!(port.writes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_assigned_receiver_ip_overrides_readback() {
        let port = MockDevicePort::new("test_epics");
        let params = SmurfToMceParams {
            config_file: PathBuf::from("/data/smurf2mce.cfg"),
            receiver_ip: "0.0.0.0".into(),
            port: 3334,
            mask_file: PathBuf::from("/data/mask.txt"),
        };
        port.make_smurf_to_mce_config(&params, true).await.unwrap();
        port.assign_receiver_ip("192.168.3.34").await;

        match port.read_smurf_to_mce_config().await.unwrap() {
            RegisterValue::SmurfToMce(read) => {
                assert_eq!(read.receiver_ip, "192.168.3.34");
                assert_eq!(read.port, 3334);
            }
            other => panic!("unexpected readback {other:?}"),
        }
        // the written value itself is untouched
        assert_eq!(
            port.value(RegisterAddress::global(Register::SmurfToMceConfig))
                .await,
            Some(RegisterValue::SmurfToMce(params))
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_logged_write_names_the_pv() {
        let port = MockDevicePort::new("test_epics");
        port.set_stream_enable(3, 1, true).await.unwrap();
        assert!(logs_contain("caput"));
        assert!(logs_contain("test_epics:AMCc:FpgaTopLevel:AppTop:AppCore:SysgenCryo:Base[3]"));
    }

    #[tokio::test]
    async fn test_misindexed_access_is_rejected() {
        let port = MockDevicePort::new("test_epics");

        let err = port
            .write(RegisterWrite::global(Register::ToneScale, 2i64, false))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Rejected { register: Register::ToneScale, .. }));

        let err = port
            .read(RegisterAddress::indexed(Register::SetDefaults, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Rejected { .. }));
        assert!(port.calls().await.is_empty());
    }
}
