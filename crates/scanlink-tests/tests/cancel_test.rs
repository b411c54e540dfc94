//! Cancellation, close and drop while a scan is streaming
//!
//! Run with: cargo test -p scanlink-tests --test cancel_test

use std::time::Duration;

use pretty_assertions::assert_eq;
use scanlink_backend::command::CommandKind;
use scanlink_backend::config::SimulatedConfig;
use scanlink_backend::{ScanConfig, SessionState};
use scanlink_core::{ScanDevice, ScanError};
use scanlink_tests::{fast_scan_config, read_exact, trilinear, Bench};
use tokio::time::Instant;

/// A slow tri-linear frame: 300 lines of 900 bytes
async fn streaming_bench() -> Bench {
    let config = SimulatedConfig {
        read_delay_ms: 5,
        ..trilinear(8)
    };
    let scan = ScanConfig {
        stripe_lines: 8,
        channel_depth: 2,
        ..fast_scan_config()
    };
    let mut bench = Bench::with_scan_config(config, scan).await.unwrap();
    bench.set_mode("Color").unwrap();
    bench.set_resolution(300).unwrap();
    bench.set_area(0.0, 0.0, 25.4, 25.4).unwrap();
    bench
}

#[tokio::test]
async fn test_cancel_after_ten_lines() {
    let mut bench = streaming_bench().await;
    bench.session.start().await.unwrap();

    let head = read_exact(&mut bench.session, 10 * 900).await.unwrap();
    assert_eq!(head.len(), 10 * 900);

    tokio::time::timeout(Duration::from_secs(3), bench.session.cancel())
        .await
        .unwrap();
    assert_eq!(bench.session.state(), SessionState::Idle);

    let mut buf = [0u8; 900];
    let err = bench.session.read(&mut buf).await.unwrap_err();
    assert_eq!(err, ScanError::Cancelled);

    assert!(!bench.scanner.is_reserved());
    assert_eq!(bench.scanner.open_handles(), 0);
    assert!(bench.scanner.image_bytes_read() < 316 * 900);
}

#[tokio::test]
async fn test_cancel_twice_then_close() {
    let mut bench = streaming_bench().await;
    bench.session.start().await.unwrap();
    read_exact(&mut bench.session, 900).await.unwrap();

    bench.session.cancel().await;
    bench.session.cancel().await;
    bench.session.close().await;
    bench.session.close().await;

    assert_eq!(bench.scanner.command_count(CommandKind::ObjectPosition), 1);
    assert_eq!(bench.scanner.command_count(CommandKind::ReleaseUnit), 1);
    assert_eq!(bench.scanner.open_handles(), 0);
}

#[tokio::test]
async fn test_close_while_scanning() {
    let mut bench = streaming_bench().await;
    bench.session.start().await.unwrap();

    bench.session.close().await;
    assert_eq!(bench.session.state(), SessionState::Idle);
    assert!(!bench.scanner.is_reserved());
    assert_eq!(bench.scanner.open_handles(), 0);
}

#[tokio::test]
async fn test_drop_while_scanning_releases_transport() {
    let mut bench = streaming_bench().await;
    bench.session.start().await.unwrap();
    read_exact(&mut bench.session, 900).await.unwrap();

    let Bench { scanner, session } = bench;
    drop(session);

    let deadline = Instant::now() + Duration::from_secs(2);
    while scanner.open_handles() > 0 {
        assert!(Instant::now() < deadline, "reader kept its handle");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(!scanner.is_reserved());
}

#[tokio::test]
async fn test_restart_after_cancel() {
    let mut bench = streaming_bench().await;
    bench.session.start().await.unwrap();
    read_exact(&mut bench.session, 900).await.unwrap();
    bench.session.cancel().await;

    let data = bench.scan_frame().await.unwrap();
    assert_eq!(data.len(), 300 * 900);
    assert_eq!(bench.scanner.scans_started(), 2);
}

#[tokio::test]
async fn test_cancel_when_idle_is_a_no_op() {
    let mut bench = Bench::open(SimulatedConfig::default()).await.unwrap();
    bench.session.cancel().await;
    assert_eq!(bench.session.state(), SessionState::Idle);
    assert_eq!(bench.scanner.command_count(CommandKind::ObjectPosition), 0);
}

#[tokio::test]
async fn test_cancel_during_stuck_read_waits_out_join_timeout() {
    let config = SimulatedConfig {
        read_delay_ms: 5000,
        ..SimulatedConfig::default()
    };
    let scan = ScanConfig {
        join_timeout_ms: 200,
        ..fast_scan_config()
    };
    let mut bench = Bench::with_scan_config(config, scan).await.unwrap();
    bench.set_resolution(100).unwrap();
    bench.set_area(0.0, 0.0, 10.0, 10.0).unwrap();
    bench.session.start().await.unwrap();

    // Let the reader enter its first READ
    tokio::time::sleep(Duration::from_millis(20)).await;

    let began = Instant::now();
    bench.session.cancel().await;
    let took = began.elapsed();
    assert!(took >= Duration::from_millis(200), "cancel took {:?}", took);
    assert!(took < Duration::from_secs(2), "cancel took {:?}", took);

    // Device is free the moment cancel returns
    assert_eq!(bench.session.state(), SessionState::Idle);
    assert_eq!(bench.scanner.open_handles(), 0);
    assert!(!bench.scanner.is_reserved());

    bench.session.start().await.unwrap();
    assert_eq!(bench.session.state(), SessionState::Scanning);
    bench.session.close().await;
    assert_eq!(bench.scanner.open_handles(), 0);
}
