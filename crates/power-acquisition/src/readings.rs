//! Interpretation of read responses and change detection.
//!
//! The codec hands back opaque property payloads; this module gives them
//! meaning (signed watts, phase currents, the energy register and its
//! scaling), folds them into the previous [`Snapshot`] and works out which
//! observable properties changed.

use power_core::energy::forward_energy_kwh;
use power_core::{Cumulative, Current, Instantaneous, Snapshot};
use power_echonet::meter::epc;
use power_echonet::Frame;
use std::fmt;
use tracing::warn;

/// Coefficient assumed when a response does not carry one.
pub const DEFAULT_COEFFICIENT: u32 = 1;

/// Unit code assumed when a response does not carry one (1 kWh).
pub const DEFAULT_UNIT_CODE: u8 = 0x00;

/// Property values found in one read response. Absent or unreadable
/// properties are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterReading {
    pub power_watts: Option<i32>,
    pub current: Option<Current>,
    pub cumulative_raw: Option<u32>,
    pub coefficient: Option<u32>,
    pub unit_code: Option<u8>,
}

impl MeterReading {
    /// Collect the known properties of `frame`. Unknown codes are ignored.
    pub fn from_frame(frame: &Frame) -> Self {
        let mut reading = Self::default();
        for property in &frame.edata.properties {
            let payload = property.payload.as_ref();
            let parsed = match property.code {
                epc::INSTANTANEOUS_POWER => {
                    array::<4>(payload).map(|b| reading.power_watts = Some(i32::from_be_bytes(b)))
                }
                epc::INSTANTANEOUS_CURRENT => array::<4>(payload).map(|b| {
                    let r = i16::from_be_bytes([b[0], b[1]]);
                    let t = i16::from_be_bytes([b[2], b[3]]);
                    reading.current = Some(Current::from_deciamps(r, t));
                }),
                epc::CUMULATIVE_ENERGY_FORWARD => {
                    array::<4>(payload).map(|b| reading.cumulative_raw = Some(u32::from_be_bytes(b)))
                }
                epc::COEFFICIENT => {
                    array::<4>(payload).map(|b| reading.coefficient = Some(u32::from_be_bytes(b)))
                }
                epc::CUMULATIVE_ENERGY_UNIT => {
                    array::<1>(payload).map(|b| reading.unit_code = Some(b[0]))
                }
                _ => Some(()),
            };
            if parsed.is_none() {
                warn!(
                    epc = %format!("{:02X}", property.code),
                    len = payload.len(),
                    "Ignoring property with unexpected payload length"
                );
            }
        }
        reading
    }

    /// The snapshot after applying this reading on top of `previous`.
    ///
    /// Missing instantaneous values keep their previous value. Without the
    /// raw energy register the previous cumulative value is kept; a missing
    /// coefficient or unit falls back to the defaults.
    pub fn apply(&self, previous: &Snapshot) -> Snapshot {
        let instantaneous = Instantaneous {
            power_watts: self
                .power_watts
                .unwrap_or(previous.instantaneous.power_watts),
            current: self.current.unwrap_or(previous.instantaneous.current),
        };
        let cumulative = match self.cumulative_raw {
            Some(raw) => Cumulative {
                forward_energy_kwh: forward_energy_kwh(
                    raw,
                    self.coefficient.unwrap_or(DEFAULT_COEFFICIENT),
                    self.unit_code.unwrap_or(DEFAULT_UNIT_CODE),
                ),
            },
            None => previous.cumulative,
        };
        Snapshot {
            instantaneous,
            cumulative,
        }
    }
}

fn array<const N: usize>(payload: &[u8]) -> Option<[u8; N]> {
    payload.try_into().ok()
}

// =============================================================================
// Change Notification
// =============================================================================

/// One changed observable property with its old and new value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementChange {
    InstantaneousPower { old: i32, new: i32 },
    InstantaneousCurrent { old: Current, new: Current },
    Instantaneous { old: Instantaneous, new: Instantaneous },
    Cumulative { old: Cumulative, new: Cumulative },
}

impl MeasurementChange {
    /// Property name as seen by subscribers.
    pub fn property_name(&self) -> &'static str {
        match self {
            Self::InstantaneousPower { .. } => "instantaneousPower",
            Self::InstantaneousCurrent { .. } => "instantaneousCurrent",
            Self::Instantaneous { .. } => "instantaneous",
            Self::Cumulative { .. } => "cumulative",
        }
    }
}

impl fmt::Display for MeasurementChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstantaneousPower { old, new } => write!(f, "power {old} W -> {new} W"),
            Self::InstantaneousCurrent { old, new } => write!(
                f,
                "current R/T {:.1}/{:.1} A -> {:.1}/{:.1} A",
                old.r_phase, old.t_phase, new.r_phase, new.t_phase
            ),
            Self::Instantaneous { new, .. } => write!(
                f,
                "instantaneous {} W, {:.1}/{:.1} A",
                new.power_watts, new.current.r_phase, new.current.t_phase
            ),
            Self::Cumulative { old, new } => write!(
                f,
                "cumulative {} kWh -> {} kWh",
                old.forward_energy_kwh, new.forward_energy_kwh
            ),
        }
    }
}

/// Changes between two snapshots in delivery order: power, current,
/// combined instantaneous, cumulative. Equal values produce nothing.
pub fn changes(old: &Snapshot, new: &Snapshot) -> Vec<MeasurementChange> {
    let mut changes = Vec::with_capacity(4);
    let (before, after) = (old.instantaneous, new.instantaneous);

    if before.power_watts != after.power_watts {
        changes.push(MeasurementChange::InstantaneousPower {
            old: before.power_watts,
            new: after.power_watts,
        });
    }
    if before.current != after.current {
        changes.push(MeasurementChange::InstantaneousCurrent {
            old: before.current,
            new: after.current,
        });
    }
    if before != after {
        changes.push(MeasurementChange::Instantaneous {
            old: before,
            new: after,
        });
    }
    if old.cumulative != new.cumulative {
        changes.push(MeasurementChange::Cumulative {
            old: old.cumulative,
            new: new.cumulative,
        });
    }
    changes
}
