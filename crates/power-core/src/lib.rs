//! `power-core`
//!
//! Shared building blocks for the smart-power workspace.
//!
//! This crate holds everything the driver and acquisition crates agree on
//! without depending on each other:
//!
//! - [`model`]: measurement value types ([`Instantaneous`], [`Current`],
//!   [`Cumulative`], [`Snapshot`]) and the [`PowerSource`] description
//! - [`energy`]: conversion of the meter's raw cumulative-energy register into kWh
//! - [`observable`]: atomically published values and the copy-on-write
//!   listener registry used for change notification
//! - [`serial`]: async serial port aliases and the port opener (feature `serial`)
//!
//! ## Example
//!
//! ```rust
//! use power_core::energy::forward_energy_kwh;
//!
//! // 500 raw units, coefficient 1, unit code 0x01 (0.1 kWh per unit)
//! assert_eq!(forward_energy_kwh(500, 1, 0x01), 50.0);
//! ```

pub mod energy;
pub mod model;
pub mod observable;
pub mod serial;

pub use energy::{forward_energy_kwh, EnergyUnit};
pub use model::{Cumulative, Current, Instantaneous, PowerSource, PowerSourceError, Snapshot};
pub use observable::{Listener, ListenerId, ListenerRegistry, Published};
