//! Low-Voltage Smart Electric Energy Meter Vocabulary
//!
//! Object, service and property codes used when talking to a smart meter
//! (class group 0x02, class 0x88) from a controller (0x05FF).

use crate::frame::{EData, Eoj, Frame, Property};

/// EHD1: ECHONET Lite protocol.
pub const EHD1_ECHONET_LITE: u8 = 0x10;

/// EHD2: specified message format (format 1).
pub const EHD2_FORMAT_1: u8 = 0x81;

/// UDP port the meter listens on and answers from.
pub const ECHONET_LITE_PORT: u16 = 0x0E1A;

/// Controller object, the requesting side.
pub const CONTROLLER: Eoj = Eoj::new(0x05, 0xFF, 0x01);

/// Low-voltage smart electric energy meter object.
pub const SMART_METER: Eoj = Eoj::new(0x02, 0x88, 0x01);

/// ECHONET Lite service codes (ESV).
pub mod esv {
    /// Property value read request (Get)
    pub const GET: u8 = 0x62;
    /// Property value read response (Get_Res)
    pub const GET_RES: u8 = 0x72;
    /// Property value read request not possible (Get_SNA)
    pub const GET_SNA: u8 = 0x52;
}

/// Property codes (EPC) of the smart meter class.
pub mod epc {
    /// Coefficient for cumulative energy, unsigned 32-bit
    pub const COEFFICIENT: u8 = 0xD3;
    /// Number of effective digits for cumulative energy, unsigned 8-bit
    pub const EFFECTIVE_DIGITS: u8 = 0xD7;
    /// Measured cumulative energy, normal direction, unsigned 32-bit
    pub const CUMULATIVE_ENERGY_FORWARD: u8 = 0xE0;
    /// Unit for cumulative energy, unsigned 8-bit code
    pub const CUMULATIVE_ENERGY_UNIT: u8 = 0xE1;
    /// Measured instantaneous power (W), signed 32-bit
    pub const INSTANTANEOUS_POWER: u8 = 0xE7;
    /// Measured instantaneous current R/T phase (0.1 A), two signed 16-bit
    pub const INSTANTANEOUS_CURRENT: u8 = 0xE8;
}

/// Properties requested on every poll, in request order.
pub const POLL_PROPERTIES: [u8; 5] = [
    epc::INSTANTANEOUS_POWER,
    epc::INSTANTANEOUS_CURRENT,
    epc::CUMULATIVE_ENERGY_FORWARD,
    epc::COEFFICIENT,
    epc::CUMULATIVE_ENERGY_UNIT,
];

/// Build a Get request from the controller to the smart meter.
pub fn read_request(transaction_id: u16, codes: &[u8]) -> Frame {
    Frame {
        header1: EHD1_ECHONET_LITE,
        header2: EHD2_FORMAT_1,
        transaction_id,
        edata: EData {
            source: CONTROLLER,
            destination: SMART_METER,
            service: esv::GET,
            properties: codes.iter().copied().map(Property::request).collect(),
        },
    }
}

/// Whether `frame` is the meter's answer to a read request.
pub fn is_read_response(frame: &Frame) -> bool {
    frame.edata.source == SMART_METER && frame.edata.service == esv::GET_RES
}
