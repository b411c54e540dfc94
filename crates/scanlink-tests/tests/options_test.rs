//! Option constraints and device registry
//!
//! Run with: cargo test -p scanlink-tests --test options_test

use std::io::Write;

use pretty_assertions::assert_eq;
use rstest::rstest;
use scanlink_backend::config::SimulatedConfig;
use scanlink_backend::{BackendConfig, DeviceRegistry, ScanConfig, SessionState};
use scanlink_core::{Constraint, OptionId, OptionValue, ScanDevice, ScanError};
use scanlink_tests::{fast_scan_config, Bench};

#[tokio::test]
async fn test_descriptors_follow_capabilities() {
    let config = SimulatedConfig {
        adf: true,
        transparency: true,
        ..SimulatedConfig::default()
    };
    let bench = Bench::open(config).await.unwrap();
    let descriptors = bench.session.option_descriptors();
    assert_eq!(descriptors.len(), OptionId::ALL.len());

    let source = descriptors
        .iter()
        .find(|d| d.id == OptionId::Source)
        .unwrap();
    assert_eq!(
        source.constraint,
        Constraint::StringList(vec![
            "Flatbed".to_string(),
            "ADF".to_string(),
            "Transparency".to_string()
        ])
    );
}

#[rstest]
#[case(OptionId::Resolution, OptionValue::Int(25))]
#[case(OptionId::Resolution, OptionValue::Int(2400))]
#[case(OptionId::BrX, OptionValue::Fixed(300.0))]
#[case(OptionId::TlY, OptionValue::Fixed(f64::NAN))]
#[case(OptionId::Mode, OptionValue::Str("Infrared".to_string()))]
#[case(OptionId::BitDepth, OptionValue::Int(16))]
#[case(OptionId::Preview, OptionValue::Int(1))]
#[tokio::test]
async fn test_invalid_values_are_rejected(#[case] id: OptionId, #[case] value: OptionValue) {
    let mut bench = Bench::open(SimulatedConfig::default()).await.unwrap();
    let before = bench.session.get_option(id).unwrap();

    let err = bench.session.set_option(id, value).unwrap_err();
    assert!(matches!(err, ScanError::InvalidRequest(_)), "got {:?}", err);
    assert_eq!(bench.session.get_option(id).unwrap(), before);
    assert_eq!(bench.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_quantized_resolution_is_inexact() {
    let scan = ScanConfig {
        resolution_quant: 50,
        ..fast_scan_config()
    };
    let mut bench = Bench::with_scan_config(SimulatedConfig::default(), scan)
        .await
        .unwrap();

    let hints = bench
        .session
        .set_option(OptionId::Resolution, OptionValue::Int(290))
        .unwrap();
    assert!(hints.inexact);
    assert!(hints.reload_params);
    assert_eq!(
        bench.session.get_option(OptionId::Resolution).unwrap(),
        OptionValue::Int(300)
    );
}

#[tokio::test]
async fn test_bilevel_width_rounds_down_to_whole_bytes() {
    let mut bench = Bench::open(SimulatedConfig::default()).await.unwrap();
    bench.set_mode("Halftone").unwrap();
    bench.set_resolution(300).unwrap();
    bench.set_area(0.0, 0.0, 3.0, 3.0).unwrap();

    let shape = bench.session.resolve_parameters().unwrap();
    assert_eq!(shape.pixels_per_line % 8, 0);
    assert_eq!(shape.bytes_per_line, shape.pixels_per_line / 8);
}

#[tokio::test]
async fn test_mode_change_reloads_options() {
    let mut bench = Bench::open(SimulatedConfig::default()).await.unwrap();
    let hints = bench
        .session
        .set_option(OptionId::Mode, OptionValue::Str("lineart".to_string()))
        .unwrap();
    assert!(hints.reload_options);
    assert_eq!(
        bench.session.get_option(OptionId::Mode).unwrap(),
        OptionValue::Str("Lineart".to_string())
    );
}

#[tokio::test]
async fn test_registry_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[devices]]
name = "sim:flatbed"

[[devices]]
name = "sim:feeder"
[devices.transport]
type = "simulated"
model = "Feeder Scanner"
adf = true
[devices.scan]
stripe_lines = 16
"#
    )
    .unwrap();

    let config = BackendConfig::load(file.path()).unwrap();
    let registry = DeviceRegistry::from_config(&config).await.unwrap();

    let names: Vec<String> = registry.enumerate().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["sim:feeder".to_string(), "sim:flatbed".to_string()]);

    let mut session = registry.open("sim:feeder").await.unwrap();
    assert_eq!(session.descriptor().model, "Feeder Scanner");
    assert_eq!(
        session.descriptor().device_type,
        "flatbed scanner with document feeder"
    );
    session.close().await;

    let err = registry.open("sim:missing").await.unwrap_err();
    assert_eq!(err, ScanError::DeviceNotFound("sim:missing".to_string()));
}
