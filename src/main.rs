use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use wallbox_bridge::Config;
use wallbox_bridge::driver::{WallboxDriver, setpoint_channel};
use wallbox_bridge::homie::{HomiePublisher, Property};
use wallbox_bridge::logging::{init_logging, start_log_maintenance};
use wallbox_bridge::modbus::ModbusRtuClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging).context("Failed to initialize logging")?;
    let maintenance = start_log_maintenance(&config.logging);

    info!("Wallbox bridge {} starting up", env!("APP_VERSION"));

    // Without the serial line there is nothing to bridge
    let mut registers = ModbusRtuClient::new(&config.serial);
    if let Err(e) = registers.connect() {
        error!("Failed to open {}: {}", config.serial.device, e);
        return Err(anyhow::anyhow!("Serial port error: {}", e));
    }

    let (setpoint_writer, setpoint_reader) = setpoint_channel();

    let mut publisher = HomiePublisher::new();
    if let Some(set_topic) = Property::MaxCurrent.set_topic() {
        publisher
            .subscribe(&set_topic, setpoint_writer.into_handler())
            .context("Failed to register setpoint handler")?;
    }
    if let Err(e) = publisher.connect(&config.mqtt) {
        warn!("MQTT session not started, telemetry will be dropped: {}", e);
    }

    let driver = WallboxDriver::new(registers, publisher, setpoint_reader);
    let signal_task = tokio::spawn(forward_shutdown(driver.shutdown_sender()));

    let outcome = driver.run().await;
    signal_task.abort();
    if let Some(handle) = maintenance {
        handle.abort();
    }

    match outcome {
        Ok(()) => {
            info!("Wallbox bridge stopped");
            Ok(())
        }
        Err(e) => {
            error!("Wallbox bridge failed: {}", e);
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
    }
}

/// Turn Ctrl+C or SIGTERM into a driver shutdown request
async fn forward_shutdown(shutdown: mpsc::UnboundedSender<()>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
    let _ = shutdown.send(());
}
