//! `smart_power`
//!
//! Application layer of the smart-power workspace: configuration loading,
//! tracing setup and the listeners the `smart-power` binary registers with
//! the acquisition engine.
//!
//! The protocol and acquisition work lives in the member crates:
//!
//! - `power-core`: measurement model, energy conversion, observer primitives
//! - `power-echonet`: ECHONET Lite frame codec
//! - `power-driver-skstack`: SKSTACK IP modem transport and association
//! - `power-acquisition`: the polling engine

pub mod config;
pub mod listeners;
pub mod telemetry;

pub use config::AppConfig;
pub use listeners::{EnergyCounter, LoggingListener};
