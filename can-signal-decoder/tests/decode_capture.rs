//! End-to-end checks through the public decoder API

use can_signal_decoder::{Decoder, DecoderError};
use std::io::Write;
use tempfile::{Builder, NamedTempFile};

const CHASSIS_DBC: &str = r#"
VERSION ""

BU_: VCU EPS

BO_ 100 EngineData: 8 VCU
 SG_ Rpm : 7|8@0+ (1,0) [0|255] "" EPS
 SG_ Mode : 7|4@0- (1,0) [-8|7] "" EPS

BO_ 1280 Steering: 8 EPS
 SG_ SteeringAngle : 0|16@1- (0.1,0) [-780|780] "deg" VCU
 SG_ SteeringRate : 16|16@1+ (1,0) [0|1000] "deg/s" VCU

CM_ BO_ 1280 "Steering wheel state";
"#;

fn dbc_file() -> NamedTempFile {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut file = Builder::new().suffix(".dbc").tempfile().unwrap();
    file.write_all(CHASSIS_DBC.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn big_endian_examples_decode_from_file() {
    let dbc = dbc_file();
    let decoder = Decoder::from_dbc(dbc.path()).unwrap();

    let signals = decoder
        .decode_frame(100, &[0xFF, 0, 0, 0, 0, 0, 0, 0])
        .unwrap();
    assert_eq!(signals["Rpm"], 255.0);

    let signals = decoder
        .decode_frame(100, &[0x80, 0, 0, 0, 0, 0, 0, 0])
        .unwrap();
    assert_eq!(signals["Mode"], -8.0);
}

#[test]
fn unknown_id_and_short_payload_are_rejected() {
    let dbc = dbc_file();
    let decoder = Decoder::from_dbc(dbc.path()).unwrap();

    assert!(matches!(
        decoder.decode_frame(0x7FF, &[0; 8]),
        Err(DecoderError::UnknownMessage(0x7FF))
    ));
    assert!(matches!(
        decoder.decode_frame(100, &[0; 4]),
        Err(DecoderError::PayloadTooShort { expected: 8, actual: 4, .. })
    ));
}

#[test]
fn scan_builds_ordered_table() {
    let dbc = dbc_file();
    let decoder = Decoder::from_dbc(dbc.path()).unwrap();

    // 350 * 0.1 = 35 deg at t=20, 100 * 0.1 = 10 deg at t=10
    let mut log = NamedTempFile::new().unwrap();
    writeln!(log, "(20) can0 500#5E01000000000000").unwrap();
    writeln!(log, "(10) can0 500#6400000000000000").unwrap();
    writeln!(log, "(15) can0 064#FF00000000000000").unwrap();
    log.flush().unwrap();

    let table = decoder.scan_log(log.path(), &["SteeringAngle"]).unwrap();
    assert_eq!(table.timestamps(), &[10, 20]);
    assert!((table.value(20, "SteeringAngle").unwrap() - 35.0).abs() < 1e-9);
    assert!((table.value(10, "SteeringAngle").unwrap() - 10.0).abs() < 1e-9);
}

#[test]
fn scan_error_returns_no_partial_table() {
    let dbc = dbc_file();
    let decoder = Decoder::from_dbc(dbc.path()).unwrap();

    let mut log = NamedTempFile::new().unwrap();
    writeln!(log, "(10) can0 500#6400000000000000").unwrap();
    writeln!(log, "(20) can0 500#6G00000000000000").unwrap();
    log.flush().unwrap();

    match decoder.scan_log(log.path(), &["SteeringAngle"]) {
        Err(DecoderError::ScanError { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected scan error, got {other:?}"),
    }
}

#[test]
fn dictionary_introspection() {
    let dbc = dbc_file();
    let decoder = Decoder::from_dbc(dbc.path()).unwrap();
    let db = decoder.database();

    assert_eq!(db.all_can_ids(), vec![100, 1280]);
    assert_eq!(db.find_signal("SteeringRate")[0].0, 1280);
    assert_eq!(decoder.stats().num_signals, 4);
}
