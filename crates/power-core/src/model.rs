//! Measurement Model
//!
//! Immutable value types describing what the meter reports. The acquisition
//! engine builds a fresh [`Snapshot`] for every successful poll and publishes
//! it as a whole, so consumers never see power from one poll paired with
//! current from another.
//!
//! All types derive `PartialEq`: change notification is suppressed when a new
//! value compares equal to the previous one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Instantaneous Values
// =============================================================================

/// Instantaneous current per phase, in amperes.
///
/// The meter reports deciamperes; the value is already scaled by 0.1 here.
/// Single-phase two-wire installations report the T phase as zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Current {
    /// R phase (A)
    pub r_phase: f64,
    /// T phase (A)
    pub t_phase: f64,
}

impl Current {
    /// No current on either phase.
    pub const ZERO: Current = Current {
        r_phase: 0.0,
        t_phase: 0.0,
    };

    pub fn new(r_phase: f64, t_phase: f64) -> Self {
        Self { r_phase, t_phase }
    }

    /// Build from the raw signed deciampere readings of the meter.
    pub fn from_deciamps(r_phase: i16, t_phase: i16) -> Self {
        Self {
            r_phase: f64::from(r_phase) * 0.1,
            t_phase: f64::from(t_phase) * 0.1,
        }
    }

    /// Total of both phases (A).
    pub fn sum(&self) -> f64 {
        self.r_phase + self.t_phase
    }
}

/// Instantaneous power and current read in a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Instantaneous {
    /// Instantaneous power (W). Negative while exporting.
    pub power_watts: i32,
    /// Instantaneous current per phase
    pub current: Current,
}

impl Instantaneous {
    pub const ZERO: Instantaneous = Instantaneous {
        power_watts: 0,
        current: Current::ZERO,
    };
}

// =============================================================================
// Cumulative Values
// =============================================================================

/// Cumulative energy, already converted to kWh.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cumulative {
    /// Forward (purchased) cumulative energy (kWh)
    pub forward_energy_kwh: f64,
}

impl Cumulative {
    pub const ZERO: Cumulative = Cumulative {
        forward_energy_kwh: 0.0,
    };
}

/// The latest published measurement state.
///
/// Defaults to all zeros until the first successful read.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub instantaneous: Instantaneous,
    pub cumulative: Cumulative,
}

// =============================================================================
// Power Source
// =============================================================================

/// Rated current accepted by the contract breaker.
pub const RATED_CURRENT_RANGE: std::ops::RangeInclusive<u8> = 10..=60;

/// Errors from [`PowerSource`] validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowerSourceError {
    #[error("rated current must be between 10 and 60 A, got {0} A")]
    RatedCurrentOutOfRange(u32),

    #[error("wire count must be 2 or 3, got {0}")]
    InvalidWireCount(u32),
}

/// Description of the installation the meter sits on.
///
/// Not read from the meter; supplied by configuration and exposed unchanged
/// to query-style consumers. Deserialization runs the same validation as
/// [`PowerSource::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPowerSource", into = "RawPowerSource")]
pub struct PowerSource {
    rated_current_amps: u8,
    wire_count: u8,
}

#[derive(Serialize, Deserialize)]
struct RawPowerSource {
    rated_current_amps: u32,
    wire_count: u32,
}

impl TryFrom<RawPowerSource> for PowerSource {
    type Error = PowerSourceError;

    fn try_from(raw: RawPowerSource) -> Result<Self, Self::Error> {
        PowerSource::new(raw.rated_current_amps, raw.wire_count)
    }
}

impl From<PowerSource> for RawPowerSource {
    fn from(source: PowerSource) -> Self {
        Self {
            rated_current_amps: u32::from(source.rated_current_amps),
            wire_count: u32::from(source.wire_count),
        }
    }
}

impl PowerSource {
    /// Validate and build a power source description.
    ///
    /// # Errors
    /// - rated current outside 10..=60 A
    /// - wire count other than 2 or 3
    pub fn new(rated_current_amps: u32, wire_count: u32) -> Result<Self, PowerSourceError> {
        let rated = u8::try_from(rated_current_amps)
            .ok()
            .filter(|amps| RATED_CURRENT_RANGE.contains(amps))
            .ok_or(PowerSourceError::RatedCurrentOutOfRange(rated_current_amps))?;
        if wire_count != 2 && wire_count != 3 {
            return Err(PowerSourceError::InvalidWireCount(wire_count));
        }
        Ok(Self {
            rated_current_amps: rated,
            wire_count: wire_count as u8,
        })
    }

    pub fn rated_current_amps(&self) -> u8 {
        self.rated_current_amps
    }

    pub fn wire_count(&self) -> u8 {
        self.wire_count
    }

    /// Per-phase load ratio against the rated current (1.0 = at the limit).
    ///
    /// Two-wire sources only carry the R phase, so the T ratio is always 0.
    pub fn utilization(&self, current: &Current) -> (f64, f64) {
        let rated = f64::from(self.rated_current_amps);
        let t_phase = if self.wire_count == 3 {
            current.t_phase / rated
        } else {
            0.0
        };
        (current.r_phase / rated, t_phase)
    }
}
