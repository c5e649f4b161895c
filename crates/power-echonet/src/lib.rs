//! `power-echonet`
//!
//! Pure encode/decode of ECHONET Lite frames, the property-based
//! request/response format spoken by Japanese low-voltage smart meters over
//! the B-route. No I/O happens here.
//!
//! ## Wire Layout
//!
//! ```text
//! EHD1 EHD2 TID(2, BE) | SEOJ(3) DEOJ(3) ESV OPC | { EPC PDC EDT[PDC] } × OPC
//! ```
//!
//! - [`frame`]: the [`Frame`] value types and the codec
//! - [`meter`]: object, service and property codes of the smart meter class
//!
//! Property payloads are opaque bytes to the codec. Interpreting them
//! (signed power, phase currents, energy registers) is the caller's job.
//!
//! ## Example
//!
//! ```rust
//! use power_echonet::{meter, Frame};
//!
//! let request = meter::read_request(1, &[meter::epc::INSTANTANEOUS_POWER]);
//! let bytes = request.encode().unwrap();
//! assert_eq!(bytes.len(), request.encoded_len());
//! assert_eq!(Frame::decode(&bytes).unwrap(), request);
//! ```

pub mod frame;
pub mod meter;

pub use frame::{EData, Eoj, Frame, FrameError, Property};
