//! Modem events and their line grammar.
//!
//! ```text
//! EVENT <code> <sender> [<param> ...]
//! EPANDESC                            followed by indented "Key:Value" lines
//! ERXUDP <sender> <dest> <rport> <lport> <sender-lla> <secured> <len> <data>
//! OK
//! FAIL <code>
//! ```
//!
//! Numbers are hex. Anything with another leading token is reported as
//! [`Event::Unknown`] so callers can skip it.

use crate::addr::{Ipv6Address, LinkAddress};
use crate::error::{SkError, SkResult};

/// Numbered notifications reported with `EVENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    NeighborSolicitation,
    NeighborAdvertisement,
    EchoRequest,
    EnergyDetectScanCompleted,
    BeaconReceived,
    UdpSendCompleted,
    ActiveScanCompleted,
    PanaConnectionError,
    PanaConnectionCompleted,
    SessionTerminationRequested,
    SessionTerminated,
    SessionTerminationTimedOut,
    SessionLifetimeExpired,
    TransmitLimitReached,
    TransmitLimitReleased,
    Other(u8),
}

impl EventCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::NeighborSolicitation,
            0x02 => Self::NeighborAdvertisement,
            0x05 => Self::EchoRequest,
            0x1F => Self::EnergyDetectScanCompleted,
            0x20 => Self::BeaconReceived,
            0x21 => Self::UdpSendCompleted,
            0x22 => Self::ActiveScanCompleted,
            0x24 => Self::PanaConnectionError,
            0x25 => Self::PanaConnectionCompleted,
            0x26 => Self::SessionTerminationRequested,
            0x27 => Self::SessionTerminated,
            0x28 => Self::SessionTerminationTimedOut,
            0x29 => Self::SessionLifetimeExpired,
            0x32 => Self::TransmitLimitReached,
            0x33 => Self::TransmitLimitReleased,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::NeighborSolicitation => 0x01,
            Self::NeighborAdvertisement => 0x02,
            Self::EchoRequest => 0x05,
            Self::EnergyDetectScanCompleted => 0x1F,
            Self::BeaconReceived => 0x20,
            Self::UdpSendCompleted => 0x21,
            Self::ActiveScanCompleted => 0x22,
            Self::PanaConnectionError => 0x24,
            Self::PanaConnectionCompleted => 0x25,
            Self::SessionTerminationRequested => 0x26,
            Self::SessionTerminated => 0x27,
            Self::SessionTerminationTimedOut => 0x28,
            Self::SessionLifetimeExpired => 0x29,
            Self::TransmitLimitReached => 0x32,
            Self::TransmitLimitReleased => 0x33,
            Self::Other(code) => *code,
        }
    }
}

/// A network found by an active scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanDescriptor {
    pub channel: u8,
    pub channel_page: u8,
    pub pan_id: u16,
    pub address: LinkAddress,
    pub lqi: u8,
    pub pair_id: Option<String>,
}

/// A UDP datagram received by the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxData {
    pub sender: Ipv6Address,
    pub destination: Ipv6Address,
    pub remote_port: u16,
    pub local_port: u16,
    pub sender_link_address: LinkAddress,
    pub secured: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Event {
        code: EventCode,
        sender: Ipv6Address,
        param: Option<u8>,
    },
    PanDescriptor(PanDescriptor),
    RxData(RxData),
    Ok,
    Fail {
        code: String,
    },
    Unknown {
        fields: Vec<String>,
    },
}

impl Event {
    /// Whether this is a numbered `EVENT` with the given code.
    pub fn is_event(&self, expected: EventCode) -> bool {
        matches!(self, Event::Event { code, .. } if *code == expected)
    }
}

// =============================================================================
// Line Parsing
// =============================================================================

pub(crate) const EVENT_TOKEN: &str = "EVENT";
pub(crate) const PAN_DESCRIPTOR_TOKEN: &str = "EPANDESC";
pub(crate) const RX_UDP_TOKEN: &str = "ERXUDP";
pub(crate) const OK_TOKEN: &str = "OK";
pub(crate) const FAIL_TOKEN: &str = "FAIL";

/// Parse a complete single-line event.
///
/// `EPANDESC` spans several lines and is assembled by the transport with
/// [`parse_pan_descriptor`].
pub(crate) fn parse_line(line: &str) -> SkResult<Event> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.first().copied() {
        Some(EVENT_TOKEN) => parse_numbered_event(line, &fields),
        Some(RX_UDP_TOKEN) => parse_rx_udp(line, &fields).map(Event::RxData),
        Some(OK_TOKEN) => Ok(Event::Ok),
        Some(FAIL_TOKEN) => match fields.get(1) {
            Some(code) => Ok(Event::Fail {
                code: (*code).to_string(),
            }),
            None => Err(SkError::illegal("FAIL without error code", line)),
        },
        _ => Ok(Event::Unknown {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }),
    }
}

fn parse_numbered_event(line: &str, fields: &[&str]) -> SkResult<Event> {
    if fields.len() < 3 {
        return Err(SkError::illegal("EVENT needs a code and a sender", line));
    }
    let code = parse_hex_u8(fields[1], "event code", line)?;
    let sender = parse_ipv6(fields[2], line)?;
    let param = fields
        .get(3)
        .map(|p| parse_hex_u8(p, "event parameter", line))
        .transpose()?;

    Ok(Event::Event {
        code: EventCode::from_code(code),
        sender,
        param,
    })
}

fn parse_rx_udp(line: &str, fields: &[&str]) -> SkResult<RxData> {
    if fields.len() != 9 {
        return Err(SkError::illegal(
            format!("ERXUDP needs 9 fields, got {}", fields.len()),
            line,
        ));
    }

    let data_len = parse_hex_u16(fields[7], "data length", line)?;
    let data =
        hex::decode(fields[8]).map_err(|e| SkError::illegal(format!("data: {e}"), line))?;
    if data.len() != usize::from(data_len) {
        return Err(SkError::illegal(
            format!("declared {} data bytes, got {}", data_len, data.len()),
            line,
        ));
    }

    Ok(RxData {
        sender: parse_ipv6(fields[1], line)?,
        destination: parse_ipv6(fields[2], line)?,
        remote_port: parse_hex_u16(fields[3], "remote port", line)?,
        local_port: parse_hex_u16(fields[4], "local port", line)?,
        sender_link_address: fields[5]
            .parse::<LinkAddress>()
            .map_err(|e| SkError::illegal(format!("sender address: {e}"), line))?,
        secured: parse_hex_u8(fields[6], "secured flag", line)? != 0,
        data,
    })
}

/// Build a descriptor from the indented `Key:Value` lines that follow
/// `EPANDESC`.
pub(crate) fn parse_pan_descriptor(lines: &[String]) -> SkResult<PanDescriptor> {
    let block = lines.join(" | ");
    let lookup = |key: &str| {
        lines.iter().find_map(|line| {
            let (k, v) = line.trim().split_once(':')?;
            (k.trim() == key).then(|| v.trim())
        })
    };
    let require = |key: &str| {
        lookup(key).ok_or_else(|| SkError::illegal(format!("EPANDESC missing {key}"), &block))
    };

    Ok(PanDescriptor {
        channel: parse_hex_u8(require("Channel")?, "Channel", &block)?,
        channel_page: parse_hex_u8(require("Channel Page")?, "Channel Page", &block)?,
        pan_id: parse_hex_u16(require("Pan ID")?, "Pan ID", &block)?,
        address: require("Addr")?
            .parse::<LinkAddress>()
            .map_err(|e| SkError::illegal(format!("Addr: {e}"), &block))?,
        lqi: parse_hex_u8(require("LQI")?, "LQI", &block)?,
        pair_id: lookup("PairID").map(str::to_string),
    })
}

fn parse_hex_u8(value: &str, what: &str, line: &str) -> SkResult<u8> {
    u8::from_str_radix(value, 16).map_err(|_| SkError::illegal(format!("bad {what} '{value}'"), line))
}

fn parse_hex_u16(value: &str, what: &str, line: &str) -> SkResult<u16> {
    u16::from_str_radix(value, 16)
        .map_err(|_| SkError::illegal(format!("bad {what} '{value}'"), line))
}

fn parse_ipv6(value: &str, line: &str) -> SkResult<Ipv6Address> {
    value
        .parse::<Ipv6Address>()
        .map_err(|e| SkError::illegal(e.to_string(), line))
}

#[cfg(test)]
mod tests {
    use super::*;

    const METER_IP: &str = "FE80:0000:0000:0000:021C:6400:030C:12A4";

    #[test]
    fn test_parse_numbered_event() {
        let line = format!("EVENT 25 {METER_IP}");
        match parse_line(&line).unwrap() {
            Event::Event {
                code,
                sender,
                param,
            } => {
                assert_eq!(code, EventCode::PanaConnectionCompleted);
                assert_eq!(sender.to_string(), METER_IP);
                assert_eq!(param, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let event = parse_line(&format!("EVENT 21 {METER_IP} 00")).unwrap();
        assert!(event.is_event(EventCode::UdpSendCompleted));
        assert!(matches!(event, Event::Event { param: Some(0), .. }));
    }

    #[test]
    fn test_unknown_event_code_is_kept() {
        let event = parse_line(&format!("EVENT 45 {METER_IP}")).unwrap();
        assert!(event.is_event(EventCode::Other(0x45)));
        assert_eq!(EventCode::Other(0x45).code(), 0x45);
        assert_eq!(EventCode::from_code(0x22).code(), 0x22);
    }

    #[test]
    fn test_parse_rx_udp() {
        let line = format!("ERXUDP {METER_IP} {METER_IP} 0E1A 0E1A 001C6400030C12A4 1 0003 1081AB");
        let Event::RxData(rx) = parse_line(&line).unwrap() else {
            panic!("expected RxData");
        };
        assert_eq!(rx.remote_port, 0x0E1A);
        assert_eq!(rx.local_port, 0x0E1A);
        assert!(rx.secured);
        assert_eq!(rx.data, vec![0x10, 0x81, 0xAB]);
        assert_eq!(rx.sender_link_address.to_string(), "001C6400030C12A4");
    }

    #[test]
    fn test_rx_udp_length_mismatch_is_illegal() {
        let line = format!("ERXUDP {METER_IP} {METER_IP} 0E1A 0E1A 001C6400030C12A4 1 0004 1081AB");
        assert!(matches!(
            parse_line(&line),
            Err(SkError::IllegalResponse { .. })
        ));
    }

    #[test]
    fn test_rx_udp_wrong_field_count_is_illegal() {
        let line = format!("ERXUDP {METER_IP} 0E1A");
        assert!(matches!(
            parse_line(&line),
            Err(SkError::IllegalResponse { .. })
        ));
    }

    #[test]
    fn test_ok_fail_unknown() {
        assert_eq!(parse_line("OK").unwrap(), Event::Ok);
        assert_eq!(
            parse_line("FAIL ER04").unwrap(),
            Event::Fail {
                code: "ER04".into()
            }
        );
        assert!(matches!(
            parse_line("FAIL"),
            Err(SkError::IllegalResponse { .. })
        ));
        assert_eq!(
            parse_line("EVER 1.2.10").unwrap(),
            Event::Unknown {
                fields: vec!["EVER".into(), "1.2.10".into()]
            }
        );
    }

    #[test]
    fn test_malformed_event_is_illegal() {
        assert!(matches!(
            parse_line("EVENT ZZ FE80:0000:0000:0000:021C:6400:030C:12A4"),
            Err(SkError::IllegalResponse { .. })
        ));
        assert!(matches!(
            parse_line("EVENT 22"),
            Err(SkError::IllegalResponse { .. })
        ));
    }

    #[test]
    fn test_parse_pan_descriptor() {
        let lines: Vec<String> = [
            "  Channel:21",
            "  Channel Page:09",
            "  Pan ID:8888",
            "  Addr:001C6400030C12A4",
            "  LQI:E1",
            "  PairID:00112233",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let pan = parse_pan_descriptor(&lines).unwrap();
        assert_eq!(pan.channel, 0x21);
        assert_eq!(pan.channel_page, 0x09);
        assert_eq!(pan.pan_id, 0x8888);
        assert_eq!(pan.lqi, 0xE1);
        assert_eq!(pan.pair_id.as_deref(), Some("00112233"));

        let err = parse_pan_descriptor(&lines[..2]).unwrap_err();
        assert!(matches!(err, SkError::IllegalResponse { .. }));
    }
}
