//! ECHONET Lite Frame Codec
//!
//! Frames are immutable values: built fresh for every request, decoded fresh
//! from every response, and dropped afterwards.
//!
//! Size invariants:
//!
//! ```text
//! len(Frame)    = 4 + len(EData)
//! len(EData)    = 3 + 3 + 2 + Σ len(Property)
//! len(Property) = 2 + len(payload)
//! ```
//!
//! Decoding is strictly sequential and consumes exactly one frame. A field
//! that claims more bytes than remain fails with [`FrameError::Truncated`];
//! bytes left over after the last property fail with
//! [`FrameError::TrailingBytes`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Maximum payload length of one property (PDC is a single byte).
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Maximum number of properties in one frame (OPC is a single byte).
pub const MAX_PROPERTIES: usize = u8::MAX as usize;

/// Errors produced by the codec.
///
/// Any decoding error means the frame is malformed and should be discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated frame: {field} needs {needed} bytes but only {remaining} remain")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("{count} trailing bytes after the last property")]
    TrailingBytes { count: usize },

    #[error("property 0x{code:02X} payload is {len} bytes (max 255)")]
    PayloadTooLong { code: u8, len: usize },

    #[error("frame has {count} properties (max 255)")]
    TooManyProperties { count: usize },
}

// =============================================================================
// Value Types
// =============================================================================

/// ECHONET object specifier: class group, class and instance code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eoj {
    pub class_group: u8,
    pub class_code: u8,
    pub instance: u8,
}

impl Eoj {
    pub const fn new(class_group: u8, class_code: u8, instance: u8) -> Self {
        Self {
            class_group,
            class_code,
            instance,
        }
    }
}

impl fmt::Display for Eoj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}{:02X}{:02X}",
            self.class_group, self.class_code, self.instance
        )
    }
}

/// One `(EPC, EDT)` pair. PDC is derived from the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub code: u8,
    pub payload: Bytes,
}

impl Property {
    pub fn new(code: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// A property without payload, as used in read requests.
    pub fn request(code: u8) -> Self {
        Self {
            code,
            payload: Bytes::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + self.payload.len()
    }
}

/// The data area of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EData {
    pub source: Eoj,
    pub destination: Eoj,
    /// ECHONET Lite service code (ESV)
    pub service: u8,
    pub properties: Vec<Property>,
}

impl EData {
    pub fn encoded_len(&self) -> usize {
        3 + 3 + 2 + self.properties.iter().map(Property::encoded_len).sum::<usize>()
    }

    /// First property with the given code.
    pub fn property(&self, code: u8) -> Option<&Property> {
        self.properties.iter().find(|p| p.code == code)
    }
}

/// A complete ECHONET Lite frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header1: u8,
    pub header2: u8,
    pub transaction_id: u16,
    pub edata: EData,
}

// =============================================================================
// Encoding
// =============================================================================

impl Frame {
    pub fn encoded_len(&self) -> usize {
        4 + self.edata.encoded_len()
    }

    /// Encode into the wire format.
    ///
    /// # Errors
    /// Fails only if a length does not fit its one-byte field.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let count = self.edata.properties.len();
        if count > MAX_PROPERTIES {
            return Err(FrameError::TooManyProperties { count });
        }
        if let Some(p) = self
            .edata
            .properties
            .iter()
            .find(|p| p.payload.len() > MAX_PAYLOAD_LEN)
        {
            return Err(FrameError::PayloadTooLong {
                code: p.code,
                len: p.payload.len(),
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.header1);
        buf.put_u8(self.header2);
        buf.put_u16(self.transaction_id);
        put_eoj(&mut buf, &self.edata.source);
        put_eoj(&mut buf, &self.edata.destination);
        buf.put_u8(self.edata.service);
        buf.put_u8(count as u8);
        for property in &self.edata.properties {
            buf.put_u8(property.code);
            buf.put_u8(property.payload.len() as u8);
            buf.put_slice(&property.payload);
        }
        Ok(buf.freeze())
    }

    /// Decode exactly one frame from `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut buf = bytes;

        let header1 = take_u8(&mut buf, "EHD1")?;
        let header2 = take_u8(&mut buf, "EHD2")?;
        ensure_remaining(&buf, "TID", 2)?;
        let transaction_id = buf.get_u16();

        let source = take_eoj(&mut buf, "SEOJ")?;
        let destination = take_eoj(&mut buf, "DEOJ")?;
        let service = take_u8(&mut buf, "ESV")?;
        let count = take_u8(&mut buf, "OPC")?;

        let mut properties = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let code = take_u8(&mut buf, "EPC")?;
            let len = usize::from(take_u8(&mut buf, "PDC")?);
            ensure_remaining(&buf, "EDT", len)?;
            let payload = buf.copy_to_bytes(len);
            properties.push(Property { code, payload });
        }

        if buf.has_remaining() {
            return Err(FrameError::TrailingBytes {
                count: buf.remaining(),
            });
        }

        Ok(Frame {
            header1,
            header2,
            transaction_id,
            edata: EData {
                source,
                destination,
                service,
                properties,
            },
        })
    }
}

fn put_eoj(buf: &mut BytesMut, eoj: &Eoj) {
    buf.put_u8(eoj.class_group);
    buf.put_u8(eoj.class_code);
    buf.put_u8(eoj.instance);
}

fn ensure_remaining(buf: &&[u8], field: &'static str, needed: usize) -> Result<(), FrameError> {
    if buf.remaining() < needed {
        return Err(FrameError::Truncated {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn take_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, FrameError> {
    ensure_remaining(buf, field, 1)?;
    Ok(buf.get_u8())
}

fn take_eoj(buf: &mut &[u8], field: &'static str) -> Result<Eoj, FrameError> {
    ensure_remaining(buf, field, 3)?;
    Ok(Eoj::new(buf.get_u8(), buf.get_u8(), buf.get_u8()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame {
            header1: 0x10,
            header2: 0x81,
            transaction_id: 0x1234,
            edata: EData {
                source: Eoj::new(0x02, 0x88, 0x01),
                destination: Eoj::new(0x05, 0xFF, 0x01),
                service: 0x72,
                properties: vec![
                    Property::new(0xE7, vec![0x00, 0x00, 0x05, 0xDC]),
                    Property::new(0xE1, vec![0x01]),
                ],
            },
        }
    }

    #[test]
    fn test_encode_layout() {
        let bytes = sample_frame().encode().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[
                0x10, 0x81, 0x12, 0x34, // EHD1 EHD2 TID
                0x02, 0x88, 0x01, // SEOJ
                0x05, 0xFF, 0x01, // DEOJ
                0x72, 0x02, // ESV OPC
                0xE7, 0x04, 0x00, 0x00, 0x05, 0xDC, // power
                0xE1, 0x01, 0x01, // unit
            ][..]
        );
    }

    #[test]
    fn test_roundtrip() {
        let frame = sample_frame();
        let bytes = frame.encode().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_empty_property_list() {
        let mut frame = sample_frame();
        frame.edata.properties.clear();
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = sample_frame().encode().unwrap();
        let err = Frame::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                field: "EDT",
                needed: 1,
                remaining: 0
            }
        );
    }

    #[test]
    fn test_truncated_header() {
        let err = Frame::decode(&[0x10, 0x81, 0x00]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                field: "TID",
                needed: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample_frame().encode().unwrap().to_vec();
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(
            Frame::decode(&bytes).unwrap_err(),
            FrameError::TrailingBytes { count: 2 }
        );
    }

    #[test]
    fn test_payload_too_long() {
        let mut frame = sample_frame();
        frame.edata.properties.push(Property::new(0xE0, vec![0u8; 256]));
        assert_eq!(
            frame.encode().unwrap_err(),
            FrameError::PayloadTooLong {
                code: 0xE0,
                len: 256
            }
        );
    }

    #[test]
    fn test_error_is_a_plain_value() {
        fn assert_value<T: Clone + Eq + Send + Sync + 'static>() {}
        assert_value::<FrameError>();

        let err = Frame::decode(&[0x10]).unwrap_err();
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn test_eoj_display() {
        assert_eq!(Eoj::new(0x02, 0x88, 0x01).to_string(), "028801");
    }
}
