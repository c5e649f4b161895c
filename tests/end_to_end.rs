//! Full pipeline: configuration -> engine -> scripted modem and meter -> listeners.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use power_acquisition::{EngineStatus, MeasurementChange, MeterEngine};
use power_driver_skstack::mock_serial::{self, MockDeviceHarness};
use power_echonet::meter::{self, epc};
use power_echonet::{EData, Frame, Property};
use smart_power::config::AppConfig;
use smart_power::listeners::{EnergyCounter, LoggingListener};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const METER_IP: &str = "FE80:0000:0000:0000:021C:6400:030C:12A4";
const METER_MAC: &str = "001C6400030C12A4";

const CONFIG: &str = r#"
[device]
path = "/dev/null"
password = "0123456789AB"
route_b_id = "00000000000000000000000000000000"

[timing]
settle_ms = 10
command_timeout_ms = 1000
response_timeout_ms = 300

[power_source]
rated_current_amps = 30
wire_count = 3
"#;

fn load_config() -> AppConfig {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config = AppConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();
    config
}

async fn associate(modem: &mut MockDeviceHarness) {
    modem
        .expect_and_reply("SKVER", &["EVER 1.2.10", "OK"])
        .await;
    modem
        .expect_and_reply("SKSETPWD C 0123456789AB", &["OK"])
        .await;
    modem
        .expect_and_reply("SKSETRBID 00000000000000000000000000000000", &["OK"])
        .await;

    let addr = format!("  Addr:{METER_MAC}");
    let found = format!("EVENT 22 {METER_IP}");
    modem
        .expect_and_reply(
            "SKSCAN 2 FFFFFFFF 4",
            &[
                "OK",
                "EPANDESC",
                "  Channel:21",
                "  Channel Page:09",
                "  Pan ID:8888",
                addr.as_str(),
                "  LQI:E1",
                found.as_str(),
            ],
        )
        .await;
    modem.expect_and_reply("SKSREG S2 21", &["OK"]).await;
    modem.expect_and_reply("SKSREG S3 8888", &["OK"]).await;
    modem
        .expect_and_reply(&format!("SKLL64 {METER_MAC}"), &[METER_IP])
        .await;
    let joined = format!("EVENT 25 {METER_IP}");
    modem
        .expect_and_reply(&format!("SKJOIN {METER_IP}"), &["OK", joined.as_str()])
        .await;
}

fn request_bytes(tid: u16) -> Vec<u8> {
    let frame = meter::read_request(tid, &meter::POLL_PROPERTIES)
        .encode()
        .unwrap();
    let mut bytes = format!("SKSENDTO 1 {METER_IP} 0E1A 1 {:04X} ", frame.len()).into_bytes();
    bytes.extend_from_slice(&frame);
    bytes.extend_from_slice(b"\r\n");
    bytes
}

/// Answer poll `tid`: 1500 W, 12.3 A / 8.1 A, `raw_energy` x 0.1 kWh.
async fn answer(modem: &mut MockDeviceHarness, tid: u16, raw_energy: u32) {
    modem.expect_write(&request_bytes(tid)).await;

    let mut current = 123i16.to_be_bytes().to_vec();
    current.extend_from_slice(&81i16.to_be_bytes());
    let response = Frame {
        header1: meter::EHD1_ECHONET_LITE,
        header2: meter::EHD2_FORMAT_1,
        transaction_id: tid,
        edata: EData {
            source: meter::SMART_METER,
            destination: meter::CONTROLLER,
            service: meter::esv::GET_RES,
            properties: vec![
                Property::new(epc::INSTANTANEOUS_POWER, 1500i32.to_be_bytes().to_vec()),
                Property::new(epc::INSTANTANEOUS_CURRENT, current),
                Property::new(
                    epc::CUMULATIVE_ENERGY_FORWARD,
                    raw_energy.to_be_bytes().to_vec(),
                ),
                Property::new(epc::COEFFICIENT, 1u32.to_be_bytes().to_vec()),
                Property::new(epc::CUMULATIVE_ENERGY_UNIT, vec![0x01]),
            ],
        },
    };
    let payload = response.encode().unwrap();
    let rx = format!(
        "ERXUDP {METER_IP} {METER_IP} 0E1A 0E1A {METER_MAC} 1 {:04X} {}",
        payload.len(),
        hex::encode_upper(&payload)
    );
    modem.send_lines(&["OK", rx.as_str()]).unwrap();
}

#[tokio::test]
async fn test_meter_reading_pipeline() {
    let config = load_config();
    let (port, mut modem) = mock_serial::new();
    let engine = MeterEngine::new(Box::new(port), config.engine_settings());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.subscribe(move |change: &MeasurementChange| {
        sink.lock().unwrap().push(change.property_name());
        Ok(())
    });
    let energy = EnergyCounter::new();
    engine.subscribe_listener(LoggingListener::new(config.power_source().unwrap()));
    engine.subscribe_listener(energy.clone());

    engine.start().unwrap();
    associate(&mut modem).await;
    answer(&mut modem, 1, 500).await;
    // Second poll: only the cumulative register moved
    answer(&mut modem, 2, 505).await;
    modem.expect_write(&request_bytes(3)).await;

    assert_eq!(engine.status(), EngineStatus::Started);
    assert_eq!(engine.firmware_version().as_deref(), Some("1.2.10"));

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.instantaneous.power_watts, 1500);
    assert!((snapshot.instantaneous.current.r_phase - 12.3).abs() < 1e-9);
    assert!((snapshot.instantaneous.current.t_phase - 8.1).abs() < 1e-9);
    assert!((snapshot.cumulative.forward_energy_kwh - 50.5).abs() < 1e-9);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "instantaneousPower",
            "instantaneousCurrent",
            "instantaneous",
            "cumulative",
            "cumulative"
        ]
    );
    assert!((energy.total_kwh() - 0.5).abs() < 1e-9);

    engine.request_stop();
    tokio::time::timeout(Duration::from_secs(5), engine.await_stopped())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.status(), EngineStatus::Stopped);
}
