//! End-to-end bring-up against the recording device port.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use smurf_control::config::{ConfigView, ControllerOptions};
use smurf_control::device::{
    DeviceCommandPort, MockDevicePort, Register, RegisterAddress, RegisterValue,
};
use smurf_control::hardware_map::{Constants, HardwareMaps};
use smurf_control::logging::LogSink;
use smurf_control::sequencer::SequencerState;
use smurf_control::session::SessionMode;
use smurf_control::{SmurfController, SmurfError};

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/experiment.cfg")
}

fn options(data_dir: &Path) -> ControllerOptions {
    ControllerOptions {
        cfg_file: fixture(),
        data_dir: Some(data_dir.to_path_buf()),
        name: Some("cooldown_7".into()),
        ..ControllerOptions::default()
    }
}

async fn controller_with_port(
    options: ControllerOptions,
) -> (SmurfController, Arc<MockDevicePort>) {
    let port = Arc::new(MockDevicePort::new("smurf_server_s5"));
    let live: Arc<dyn DeviceCommandPort> = port.clone();
    let controller = SmurfController::new(options, Some(live), LogSink::new())
        .await
        .unwrap();
    (controller, port)
}

#[test]
fn test_fixture_tables() {
    let config = ConfigView::load(fixture()).unwrap();
    let maps = HardwareMaps::build(&config).unwrap();

    assert_eq!(maps.att_to_band.len(), 4);
    assert_eq!(maps.att_to_band.attenuator_for_band(2), Some(3));
    assert_eq!(
        maps.bias_group_to_pair.as_tuples(),
        vec![(0, 1, 2), (3, 4, 5)]
    );
    assert_eq!(maps.chip_to_freq.chip_for_freq(4.2), Some(2));
    assert_eq!(maps.band_to_chip.rows().len(), 4);
    assert_eq!(maps.pic_to_bias_group.rows()[1].bias_group, 3);
    assert!(maps.bad_mask.is_masked(5.001));
    assert!(!maps.bad_mask.is_masked(5.1));

    let constants = Constants::from_config(&config).unwrap();
    assert_eq!(constants.num_flux_ramp_counter_bits, 32);
    assert_eq!(constants.fraction_full_scale, 0.5);
    assert_eq!(constants.all_bias_groups.len(), 8);
    assert_eq!(constants.smurf_to_mce.port_number, 3334);
}

#[tokio::test(start_paused = true)]
async fn test_named_run_bring_up() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, port) = controller_with_port(options(dir.path())).await;

    assert_eq!(controller.state(), SequencerState::Ready);
    assert_eq!(controller.epics_root(), "smurf_server_s5");

    let session = controller.session();
    assert_eq!(session.mode, SessionMode::NamedRun);
    let date = session.date.clone().unwrap();
    let run_dir = dir.path().join(&date).join("cooldown_7");
    assert_eq!(session.output_dir(), Some(run_dir.join("outputs").as_path()));
    assert!(run_dir.join("outputs/tune").is_dir());
    assert!(run_dir.join("plots").is_dir());
    let logfile = session.logfile().unwrap();
    assert_eq!(logfile, run_dir.join("outputs/cooldown_7.log"));
    assert!(logfile.exists());

    // attenuators follow the wiring table, not the band number
    assert_eq!(
        port.value(RegisterAddress::indexed(Register::AttUc, 3)).await,
        Some(RegisterValue::Int(10))
    );
    assert_eq!(
        port.value(RegisterAddress::indexed(Register::DspEnable, 2)).await,
        Some(RegisterValue::Int(0))
    );
    assert_eq!(
        port.value(RegisterAddress::indexed(Register::DspEnable, 0)).await,
        Some(RegisterValue::Int(1))
    );
    assert_eq!(
        port.value(RegisterAddress::global(Register::FluxRampSetup)).await,
        Some(RegisterValue::FluxRamp {
            reset_rate_khz: 4.0,
            fraction_full_scale: 0.5,
        })
    );

    let enables = port
        .writes()
        .await
        .into_iter()
        .filter(|c| c.address.register == Register::StreamEnable)
        .count();
    assert_eq!(enables, 4);

    let report = controller.last_report().unwrap();
    assert_eq!(report.receiver_ip.as_deref(), Some("192.168.3.1"));
    assert_eq!(report.amplifier_bias.hemt_vg, 0.578);
    assert_eq!(report.amplifier_bias.lna_vg, 0.65);
}

#[tokio::test(start_paused = true)]
async fn test_setup_again_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, port) = controller_with_port(options(dir.path())).await;
    let after_first = port.registers().await;

    controller.setup().await.unwrap();
    assert_eq!(port.registers().await, after_first);
    assert_eq!(controller.state(), SequencerState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_failed_bring_up_surfaces_phase() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ControllerOptions {
        setup: false,
        ..options(dir.path())
    };
    let (mut controller, port) = controller_with_port(opts).await;
    assert_eq!(controller.state(), SequencerState::Unconfigured);
    assert!(port.calls().await.is_empty());

    port.fail_on(Some(Register::SmurfToMceClear)).await;
    let err = controller.setup().await.unwrap_err();
    assert!(err.to_string().contains("clear pulse"), "{err}");
    assert!(matches!(
        controller.state(),
        SequencerState::Failed(_)
    ));

    port.fail_on(None).await;
    controller.setup().await.unwrap();
    assert_eq!(controller.state(), SequencerState::Ready);
}

#[tokio::test]
async fn test_no_dir_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ControllerOptions {
        no_dir: true,
        setup: false,
        offline: true,
        ..options(dir.path())
    };
    let controller = SmurfController::new(opts, None, LogSink::new())
        .await
        .unwrap();

    let session = controller.session();
    assert_eq!(session.mode, SessionMode::NoDir);
    assert!(session.logfile().is_none());
    assert!(session.output_dir().is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_default_name_is_start_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ControllerOptions {
        name: None,
        setup: false,
        offline: true,
        make_logfile: false,
        ..options(dir.path())
    };
    let controller = SmurfController::new(opts, None, LogSink::new())
        .await
        .unwrap();

    let session = controller.session();
    assert_eq!(session.name.trim(), session.start_time.to_string());
    assert!(session.logfile().is_none());
    let expected = dir
        .path()
        .join(session.date.as_deref().unwrap())
        .join(&session.name)
        .join("outputs");
    assert_eq!(session.output_dir(), Some(expected.as_path()));
}

#[tokio::test]
async fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let opts = ControllerOptions {
        cfg_file: dir.path().join("absent.cfg"),
        offline: true,
        ..ControllerOptions::default()
    };
    let result = SmurfController::new(opts, None, LogSink::new()).await;
    assert!(matches!(result, Err(SmurfError::Filesystem { .. })));
}
