use super::types::LoopState;
use super::{POLL_INTERVAL, RegisterBus, STARTUP_GRACE, WallboxDriver};
use crate::error::Result;
use crate::homie::{DeviceState, TelemetrySink, state_topic};
use rumqttc::QoS;
use tokio::time::sleep;

impl<R: RegisterBus, T: TelemetrySink> WallboxDriver<R, T> {
    /// Run the loop until a shutdown signal or a fatal fault, then shut down.
    ///
    /// Consumes the driver, so the shutdown sequence cannot run twice.
    pub async fn run(mut self) -> Result<()> {
        self.logger
            .info("------------ Wallbox bridge started ------------");

        let outcome = self.run_cycles().await;
        if let Err(e) = &outcome {
            self.logger
                .error(&format!("Poll loop stopped after fatal error: {}", e));
        }

        self.state.send_replace(LoopState::ShuttingDown);
        self.shutdown().await;
        outcome
    }

    async fn run_cycles(&mut self) -> Result<()> {
        tokio::select! {
            _ = sleep(STARTUP_GRACE) => {}
            _ = self.shutdown_rx.recv() => {
                self.logger.info("Shutdown signal received during startup");
                return Ok(());
            }
        }

        self.state.send_replace(LoopState::Running);

        loop {
            let report = self.poll_cycle().await?;
            self.total_cycles = self.total_cycles.saturating_add(1);
            self.logger
                .debug(&format!("Cycle {} done: {:?}", self.total_cycles, report));

            tokio::select! {
                _ = sleep(POLL_INTERVAL) => {}
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    /// Mark the device disconnected and close the MQTT session, best effort
    async fn shutdown(&mut self) {
        self.logger.info("------------ Stopping client ------------");

        if let Err(e) = self
            .telemetry
            .publish(
                &state_topic(),
                DeviceState::Disconnected.as_str().to_string(),
                QoS::AtLeastOnce,
                true,
            )
            .await
        {
            self.logger
                .info(&format!("Could not publish disconnected state: {}", e));
        }

        if let Err(e) = self.telemetry.disconnect().await {
            self.logger
                .warn(&format!("Error closing MQTT session: {}", e));
        }
    }
}
