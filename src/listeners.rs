//! Built-in change listeners registered by the binary.

use parking_lot::Mutex;
use power_acquisition::MeasurementChange;
use power_core::{Listener, PowerSource};
use std::sync::Arc;
use tracing::info;

/// Logs every change at `info`, with the load ratio for current changes.
#[derive(Debug, Clone, Copy)]
pub struct LoggingListener {
    power_source: PowerSource,
}

impl LoggingListener {
    pub fn new(power_source: PowerSource) -> Self {
        Self { power_source }
    }
}

impl Listener<MeasurementChange> for LoggingListener {
    fn on_event(&self, change: &MeasurementChange) -> anyhow::Result<()> {
        match change {
            MeasurementChange::InstantaneousCurrent { new, .. } => {
                let (r_load, t_load) = self.power_source.utilization(new);
                info!(
                    property = change.property_name(),
                    r_load = %format!("{:.0}%", r_load * 100.0),
                    t_load = %format!("{:.0}%", t_load * 100.0),
                    "{change}"
                );
            }
            _ => info!(property = change.property_name(), "{change}"),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CounterState {
    last_kwh: Option<f64>,
    total_kwh: f64,
}

/// Forward energy consumed since the counter started observing.
///
/// Accumulates the positive difference between consecutive cumulative
/// readings. The first reading only sets the baseline, and a register that
/// goes backwards (meter replaced or wrapped) contributes nothing.
///
/// Cloning shares the count, so one clone can be registered with the engine
/// while another is read.
#[derive(Debug, Clone, Default)]
pub struct EnergyCounter {
    state: Arc<Mutex<CounterState>>,
}

impl EnergyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, forward_energy_kwh: f64) {
        let mut state = self.state.lock();
        if let Some(last) = state.last_kwh {
            let delta = forward_energy_kwh - last;
            if delta > 0.0 {
                state.total_kwh += delta;
            }
        }
        state.last_kwh = Some(forward_energy_kwh);
    }

    pub fn total_kwh(&self) -> f64 {
        self.state.lock().total_kwh
    }
}

impl Listener<MeasurementChange> for EnergyCounter {
    fn on_event(&self, change: &MeasurementChange) -> anyhow::Result<()> {
        if let MeasurementChange::Cumulative { new, .. } = change {
            self.observe(new.forward_energy_kwh);
        }
        Ok(())
    }
}
