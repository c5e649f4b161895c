//! `power-acquisition`
//!
//! The acquisition engine: a single worker that owns the Wi-SUN modem,
//! associates with the smart meter and then polls it, publishing each
//! reading as an atomically replaced [`Snapshot`] and notifying listeners of
//! every property that changed.
//!
//! ```rust,ignore
//! use power_acquisition::{EngineSettings, MeterEngine};
//! use power_driver_skstack::Credentials;
//!
//! let engine = MeterEngine::new(port, EngineSettings::new(Credentials::new(pwd, id)));
//! engine.subscribe(|change| {
//!     println!("{} changed: {change}", change.property_name());
//!     Ok(())
//! });
//! engine.start()?;
//! // ...
//! engine.request_stop();
//! engine.await_stopped().await?;
//! ```
//!
//! [`Snapshot`]: power_core::Snapshot

pub mod engine;
pub mod error;
pub mod readings;
pub mod status;

pub use engine::{EngineSettings, MeterEngine};
pub use error::{EngineError, EngineResult};
pub use readings::{MeasurementChange, MeterReading};
pub use status::EngineStatus;
