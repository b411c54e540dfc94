//! Ready polling, device faults and teardown after a failed scan
//!
//! Run with: cargo test -p scanlink-tests --test start_failure_test

use pretty_assertions::assert_eq;
use rstest::rstest;
use scanlink_backend::command::CommandKind;
use scanlink_backend::config::{SimulatedConfig, SimulatedFault};
use scanlink_backend::SessionState;
use scanlink_core::{ScanDevice, ScanError};
use scanlink_tests::{fast_scan_config, open_on, read_to_eof, Bench};
use tokio_test::assert_ok;

async fn small_bench(config: SimulatedConfig) -> Bench {
    let mut bench = Bench::open(config).await.unwrap();
    bench.set_resolution(100).unwrap();
    bench.set_area(0.0, 0.0, 10.0, 10.0).unwrap();
    bench
}

fn assert_torn_down(bench: &Bench) {
    assert_eq!(bench.session.state(), SessionState::Idle);
    assert!(!bench.scanner.is_reserved());
    assert_eq!(bench.scanner.open_handles(), 0);
}

#[tokio::test]
async fn test_busy_then_ready() {
    let config = SimulatedConfig {
        busy_polls: 3,
        ..SimulatedConfig::default()
    };
    let mut bench = small_bench(config).await;
    assert_ok!(bench.scan_frame().await);
    assert_eq!(bench.scanner.command_count(CommandKind::TestUnitReady), 4);
}

#[tokio::test]
async fn test_permanent_busy_times_out() {
    let config = SimulatedConfig {
        busy_polls: 1000,
        ..SimulatedConfig::default()
    };
    let mut bench = small_bench(config).await;

    let err = bench.session.start().await.unwrap_err();
    assert_eq!(err, ScanError::Timeout);
    assert_eq!(
        bench.scanner.command_count(CommandKind::TestUnitReady),
        fast_scan_config().ready_poll.attempts as usize
    );
    assert_torn_down(&bench);
}

#[tokio::test]
async fn test_non_busy_fault_aborts_polling() {
    let config = SimulatedConfig {
        busy_polls: 3,
        fault: Some(SimulatedFault::CoverOpen),
        ..SimulatedConfig::default()
    };
    let mut bench = small_bench(config).await;

    let err = bench.session.start().await.unwrap_err();
    assert_eq!(err, ScanError::CoverOpen);
    assert!(err.is_feeder_fault());
    assert_eq!(bench.scanner.command_count(CommandKind::TestUnitReady), 1);
    assert_torn_down(&bench);
}

#[rstest]
#[case(SimulatedFault::NoMedia, ScanError::NoMedia)]
#[case(SimulatedFault::Jammed, ScanError::Jammed)]
#[case(SimulatedFault::CoverOpen, ScanError::CoverOpen)]
#[tokio::test]
async fn test_feeder_faults(#[case] fault: SimulatedFault, #[case] expected: ScanError) {
    let mut bench = small_bench(SimulatedConfig::default()).await;
    bench.scanner.set_fault(Some(fault));

    let err = bench.session.start().await.unwrap_err();
    assert_eq!(err, expected);
    assert_eq!(bench.scanner.scans_started(), 0);
    assert_torn_down(&bench);

    // The session survives a feeder fault
    bench.scanner.set_fault(None);
    assert_ok!(bench.scan_frame().await);
}

#[tokio::test]
async fn test_hardware_fault_is_io() {
    let config = SimulatedConfig {
        fault: Some(SimulatedFault::HardwareError),
        ..SimulatedConfig::default()
    };
    let mut bench = small_bench(config).await;

    let err = bench.session.start().await.unwrap_err();
    assert!(matches!(err, ScanError::Io(_)), "got {:?}", err);
    assert!(!err.is_retryable());
    assert_torn_down(&bench);
}

#[tokio::test]
async fn test_bulk_read_failure_surfaces_on_read() {
    let config = SimulatedConfig {
        fail_after_reads: Some(1),
        max_transfer: 256,
        ..SimulatedConfig::default()
    };
    let mut bench = small_bench(config).await;
    bench.session.start().await.unwrap();

    let err = read_to_eof(&mut bench.session, 4096).await.unwrap_err();
    assert!(matches!(err, ScanError::Io(_)), "got {:?}", err);
    assert_torn_down(&bench);

    // Later reads report the idle session
    let mut buf = [0u8; 16];
    assert_eq!(
        bench.session.read(&mut buf).await.unwrap_err(),
        ScanError::Cancelled
    );
}

#[tokio::test]
async fn test_busy_reads_are_retried() {
    let config = SimulatedConfig {
        busy_reads: 3,
        ..SimulatedConfig::default()
    };
    let mut bench = small_bench(config).await;
    let shape = bench.session.resolve_parameters().unwrap();
    let data = bench.scan_frame().await.unwrap();
    assert_eq!(data.len(), shape.total_bytes());
}

#[tokio::test]
async fn test_second_session_is_busy_while_first_scans() {
    let config = SimulatedConfig {
        read_delay_ms: 10,
        ..SimulatedConfig::default()
    };
    let mut first = small_bench(config).await;
    first.session.start().await.unwrap();

    let mut second = open_on(&first.scanner, fast_scan_config()).await.unwrap();
    assert_eq!(second.start().await.unwrap_err(), ScanError::Busy);
    assert_eq!(second.state(), SessionState::Idle);

    first.session.cancel().await;
    assert_ok!(second.start().await);
    second.cancel().await;
    assert!(!first.scanner.is_reserved());
}
