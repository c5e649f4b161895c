//! SKSTACK IP driver for Wi-SUN B-route modems.
//!
//! Modems in the BP35A1 family speak a line-oriented ASCII protocol over a
//! 115200 baud serial port. This crate covers the parts a smart-meter
//! reader needs:
//!
//! - [`transport`]: line framing, echo filtering, event parsing, binary UDP
//!   sends ([`SkTransport`])
//! - [`association`]: scan, credentials and PANA join ([`Associator`])
//! - [`event`]: the asynchronous events the modem prints ([`Event`])
//! - [`mock_serial`]: a scriptable modem for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use power_driver_skstack::{Associator, Credentials, ScanPolicy, SkTransport};
//! use std::time::Duration;
//!
//! let port = power_core::serial::open_serial_async("/dev/ttyUSB0", 115_200, "BP35A1").await?;
//! let mut transport = SkTransport::open(Box::new(port), Duration::from_secs(1)).await?;
//!
//! let credentials = Credentials::new("PASSWORD", "ROUTE-B-ID");
//! let association = Associator::new(&mut transport)
//!     .associate(&credentials, &ScanPolicy::default())
//!     .await?;
//! println!("meter at {}", association.meter_address);
//! ```

pub mod addr;
pub mod association;
pub mod command;
pub mod error;
pub mod event;
pub mod mock_serial;
pub mod transport;

pub use addr::{Ipv6Address, LinkAddress};
pub use association::{
    Association, Associator, Credentials, ScanPolicy, DEFAULT_EVENT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT,
};
pub use command::{ScanMode, SendSecurity};
pub use error::{SkError, SkResult};
pub use event::{Event, EventCode, PanDescriptor, RxData};
pub use transport::SkTransport;
