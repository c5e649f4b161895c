//! Command vocabulary and argument formatting.
//!
//! Numeric arguments are uppercase hex. Byte-sized values are written
//! without padding, ports and lengths as four digits.

/// `SKSCAN` mode argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    EdScan = 0,
    ActiveWithIe = 2,
    ActiveWithoutIe = 3,
}

/// `SKSENDTO` security argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendSecurity {
    Plain = 0,
    Encrypt = 1,
    EncryptOrPlain = 2,
}

/// Longest scan duration the modem accepts.
pub const MAX_SCAN_DURATION: u8 = 14;

/// Session handle used for UDP sends.
pub const DEFAULT_HANDLE: u8 = 1;

pub(crate) fn version() -> String {
    "SKVER".to_string()
}

pub(crate) fn set_password(password: &str) -> String {
    format!("SKSETPWD {:X} {}", password.len(), password)
}

pub(crate) fn set_route_b_id(id: &str) -> String {
    format!("SKSETRBID {id}")
}

pub(crate) fn scan(mode: ScanMode, channel_mask: u32, duration: u8) -> String {
    format!("SKSCAN {:X} {:08X} {:X}", mode as u8, channel_mask, duration)
}

/// Register values go out exactly as given.
pub(crate) fn set_register(name: &str, value: &str) -> String {
    format!("SKSREG {name} {value}")
}

pub(crate) fn link_local_address(mac: &crate::LinkAddress) -> String {
    format!("SKLL64 {mac}")
}

pub(crate) fn join(address: &crate::Ipv6Address) -> String {
    format!("SKJOIN {address}")
}

/// Header of a binary send. The payload and CRLF follow immediately.
pub(crate) fn send_to_header(
    handle: u8,
    destination: &crate::Ipv6Address,
    port: u16,
    security: SendSecurity,
    len: u16,
) -> String {
    format!(
        "SKSENDTO {:X} {} {:04X} {:X} {:04X} ",
        handle, destination, port, security as u8, len
    )
}
