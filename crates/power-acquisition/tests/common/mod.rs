//! Scripted meter and modem shared by the engine tests.
#![allow(dead_code, clippy::unwrap_used)]

use power_acquisition::{EngineSettings, MeterEngine};
use power_driver_skstack::mock_serial::{self, MockDeviceHarness};
use power_driver_skstack::Credentials;
use power_echonet::meter::{self, epc};
use power_echonet::{EData, Frame, Property};
use std::time::Duration;

pub const METER_IP: &str = "FE80:0000:0000:0000:021C:6400:030C:12A4";
pub const METER_MAC: &str = "001C6400030C12A4";
pub const PASSWORD: &str = "0123456789AB";
pub const ROUTE_B_ID: &str = "00000000000000000000000000000000";

pub fn settings() -> EngineSettings {
    let mut settings = EngineSettings::new(Credentials::new(PASSWORD, ROUTE_B_ID));
    settings.settle = Duration::from_millis(10);
    settings.command_timeout = Some(Duration::from_secs(1));
    settings.response_timeout = Duration::from_millis(300);
    settings
}

pub fn engine() -> (MeterEngine, MockDeviceHarness) {
    let (port, modem) = mock_serial::new();
    (MeterEngine::new(Box::new(port), settings()), modem)
}

/// Play the modem through a successful association.
pub async fn associate(modem: &mut MockDeviceHarness) {
    modem
        .expect_and_reply("SKVER", &["EVER 1.2.10", "OK"])
        .await;
    modem
        .expect_and_reply(&format!("SKSETPWD C {PASSWORD}"), &["OK"])
        .await;
    modem
        .expect_and_reply(&format!("SKSETRBID {ROUTE_B_ID}"), &["OK"])
        .await;

    let scan = [
        "OK".to_string(),
        "EPANDESC".to_string(),
        "  Channel:21".to_string(),
        "  Channel Page:09".to_string(),
        "  Pan ID:8888".to_string(),
        format!("  Addr:{METER_MAC}"),
        "  LQI:E1".to_string(),
        format!("EVENT 22 {METER_IP}"),
    ];
    let scan: Vec<&str> = scan.iter().map(String::as_str).collect();
    modem.expect_and_reply("SKSCAN 2 FFFFFFFF 4", &scan).await;

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

/// Bytes the engine writes for poll `tid`.
pub fn poll_request(tid: u16) -> Vec<u8> {
    let frame = meter::read_request(tid, &meter::POLL_PROPERTIES)
        .encode()
        .unwrap();
    let mut bytes = format!(
        "SKSENDTO 1 {METER_IP} 0E1A 1 {:04X} ",
        frame.len()
    )
    .into_bytes();
    bytes.extend_from_slice(&frame);
    bytes.extend_from_slice(b"\r\n");
    bytes
}

#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub power_watts: i32,
    pub r_deciamps: i16,
    pub t_deciamps: i16,
    pub raw_energy: u32,
    pub coefficient: u32,
    pub unit_code: u8,
}

pub const REFERENCE: Reading = Reading {
    power_watts: 1500,
    r_deciamps: 123,
    t_deciamps: 81,
    raw_energy: 500,
    coefficient: 1,
    unit_code: 0x01,
};

pub fn response_frame(tid: u16, reading: Reading) -> Frame {
    let mut current = reading.r_deciamps.to_be_bytes().to_vec();
    current.extend_from_slice(&reading.t_deciamps.to_be_bytes());
    Frame {
        header1: meter::EHD1_ECHONET_LITE,
        header2: meter::EHD2_FORMAT_1,
        transaction_id: tid,
        edata: EData {
            source: meter::SMART_METER,
            destination: meter::CONTROLLER,
            service: meter::esv::GET_RES,
            properties: vec![
                Property::new(epc::INSTANTANEOUS_POWER, reading.power_watts.to_be_bytes().to_vec()),
                Property::new(epc::INSTANTANEOUS_CURRENT, current),
                Property::new(
                    epc::CUMULATIVE_ENERGY_FORWARD,
                    reading.raw_energy.to_be_bytes().to_vec(),
                ),
                Property::new(epc::COEFFICIENT, reading.coefficient.to_be_bytes().to_vec()),
                Property::new(epc::CUMULATIVE_ENERGY_UNIT, vec![reading.unit_code]),
            ],
        },
    }
}

/// `ERXUDP` line carrying `payload` from the meter to the ECHONET Lite port.
pub fn rx_line(payload: &[u8]) -> String {
    format!(
        "ERXUDP {METER_IP} {METER_IP} 0E1A 0E1A {METER_MAC} 1 {:04X} {}",
        payload.len(),
        hex::encode_upper(payload)
    )
}

/// Expect poll `tid` and answer it with `reading`.
pub async fn answer_poll(modem: &mut MockDeviceHarness, tid: u16, reading: Reading) {
    modem.expect_write(&poll_request(tid)).await;
    let payload = response_frame(tid, reading).encode().unwrap();
    modem
        .send_lines(&["OK", format!("EVENT 21 {METER_IP} 00").as_str(), rx_line(&payload).as_str()])
        .unwrap();
}
