use super::setpoint::MaxCurrent;
use super::types::{CycleReport, TelemetryReading};
use super::{RegisterBus, WallboxDriver};
use crate::error::{BridgeError, Result};
use crate::homie::{Property, TelemetrySink};
use crate::registers;
use rumqttc::QoS;

impl<R: RegisterBus, T: TelemetrySink> WallboxDriver<R, T> {
    /// Run one cycle. Only an unclassified meter read fault is returned as an error.
    pub async fn poll_cycle(&mut self) -> Result<CycleReport> {
        // Sampled once so a value arriving mid-cycle waits for the next one
        let setpoint = self.setpoint.current();
        let mut report = CycleReport::new(setpoint);

        report.watchdog_disabled = self.disable_watchdog().await;
        report.setpoint_written = self.push_setpoint(setpoint).await;
        report.setpoint_echoed = self.echo_setpoint(setpoint).await;

        report.reading = self.read_telemetry().await?;
        if let Some(reading) = report.reading {
            report.telemetry_published = self.publish_telemetry(reading).await;
        }

        Ok(report)
    }

    async fn disable_watchdog(&mut self) -> bool {
        match self
            .registers
            .write_register(registers::WATCHDOG_TIMEOUT, registers::WATCHDOG_DISABLED)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.logger
                    .info(&format!("Could not deactivate watchdog timeout: {}", e));
                false
            }
        }
    }

    async fn push_setpoint(&mut self, setpoint: MaxCurrent) -> bool {
        self.logger
            .info(&format!("Set max current to: {} A", setpoint));
        match self
            .registers
            .write_register(registers::MAX_CURRENT, setpoint.register_value())
            .await
        {
            Ok(()) => true,
            Err(e) if e.is_expected_transport_fault() => {
                self.logger.info(&format!(
                    "Writing max current to wallbox failed, probably standby: {}",
                    e
                ));
                false
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Writing max current to wallbox failed: {}", e));
                false
            }
        }
    }

    async fn echo_setpoint(&mut self, setpoint: MaxCurrent) -> bool {
        self.publish_property(Property::MaxCurrent, setpoint.to_string())
            .await
    }

    /// Read the meter as one unit; `None` when the wallbox did not answer
    async fn read_telemetry(&mut self) -> Result<Option<TelemetryReading>> {
        let energy_high = match self.registers.read_register(registers::ENERGY_HIGH).await {
            Ok(v) => v,
            Err(e) => return self.skip_or_fail(e),
        };
        let energy_low = match self.registers.read_register(registers::ENERGY_LOW).await {
            Ok(v) => v,
            Err(e) => return self.skip_or_fail(e),
        };
        let power = match self.registers.read_register(registers::POWER).await {
            Ok(v) => v,
            Err(e) => return self.skip_or_fail(e),
        };

        let reading = TelemetryReading::from_registers(energy_high, energy_low, power);
        self.logger.info(&format!(
            "Wallbox meter: energy_total={} kWh, power={} W",
            reading.energy_payload(), reading.power_w
        ));
        Ok(Some(reading))
    }

    fn skip_or_fail(&self, error: BridgeError) -> Result<Option<TelemetryReading>> {
        if error.is_expected_transport_fault() {
            self.logger
                .info(&format!("Reading wallbox failed, probably standby: {}", error));
            Ok(None)
        } else {
            self.logger
                .error(&format!("Unexpected failure reading wallbox: {}", error));
            Err(error)
        }
    }

    async fn publish_telemetry(&mut self, reading: TelemetryReading) -> bool {
        let power = self
            .publish_property(Property::Power, reading.power_w.to_string())
            .await;
        let energy = self
            .publish_property(Property::EnergyTotal, reading.energy_payload())
            .await;
        power && energy
    }

    async fn publish_property(&mut self, property: Property, payload: String) -> bool {
        let topic = property.topic();
        match self
            .telemetry
            .publish(&topic, payload, QoS::AtMostOnce, property.retained())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.logger
                    .info(&format!("Publishing {} failed: {}", property.id(), e));
                false
            }
        }
    }
}
