use super::setpoint::MaxCurrent;
use crate::registers;

/// Poll loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the MQTT session before the first cycle
    Starting,
    /// Cycling normally
    Running,
    /// Loop left, shutdown sequence in progress or done
    ShuttingDown,
}

/// Meter values from one successful read unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryReading {
    /// Instantaneous power in W
    pub power_w: u16,
    /// Energy meter total in kWh
    pub energy_total_kwh: f64,
}

impl TelemetryReading {
    pub fn from_registers(energy_high: u16, energy_low: u16, power: u16) -> Self {
        Self {
            power_w: power,
            energy_total_kwh: registers::energy_total_kwh(energy_high, energy_low),
        }
    }

    /// Payload of the energy total; always carries a decimal point
    pub fn energy_payload(&self) -> String {
        if self.energy_total_kwh.fract() == 0.0 {
            format!("{:.1}", self.energy_total_kwh)
        } else {
            format!("{}", self.energy_total_kwh)
        }
    }
}

/// Outcome of a single poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Setpoint sampled at the start of the cycle
    pub setpoint: MaxCurrent,
    pub watchdog_disabled: bool,
    pub setpoint_written: bool,
    pub setpoint_echoed: bool,
    /// Present when all three meter registers were read
    pub reading: Option<TelemetryReading>,
    pub telemetry_published: bool,
}

impl CycleReport {
    pub(crate) fn new(setpoint: MaxCurrent) -> Self {
        Self {
            setpoint,
            watchdog_disabled: false,
            setpoint_written: false,
            setpoint_echoed: false,
            reading: None,
            telemetry_published: false,
        }
    }
}
