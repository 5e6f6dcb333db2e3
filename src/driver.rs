//! Poll-and-bridge control loop
//!
//! The driver owns the serial line and the outbound side of the MQTT
//! session. After a short grace period it cycles forever: disable the
//! wallbox watchdog, push the current setpoint, echo it to MQTT, read the
//! meter and publish it, sleep. Expected transport faults only skip the
//! dependent step; an unclassified fault while reading the meter ends the
//! loop. The shutdown sequence runs exactly once, whatever ended the loop.

use crate::homie::TelemetrySink;
use crate::logging::{StructuredLogger, get_logger};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

mod cycle;
pub mod register_bus;
mod runtime;
pub mod setpoint;
pub mod types;


pub use register_bus::RegisterBus;
pub use setpoint::{MaxCurrent, SetpointReader, SetpointWriter, setpoint_channel};
pub use types::{CycleReport, LoopState, TelemetryReading};

/// Time given to the MQTT session before the first cycle
pub const STARTUP_GRACE: Duration = Duration::from_secs(5);

/// Pause between the end of one cycle and the start of the next
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Main driver of the bridge
pub struct WallboxDriver<R, T> {
    /// Serial register access, used by this loop only
    registers: R,

    /// Outbound telemetry
    telemetry: T,

    /// Latest setpoint from MQTT
    setpoint: SetpointReader,

    /// Current loop state
    state: watch::Sender<LoopState>,

    /// Shutdown signal
    shutdown_tx: mpsc::UnboundedSender<()>,

    /// Shutdown receiver
    shutdown_rx: mpsc::UnboundedReceiver<()>,

    /// Completed cycles
    total_cycles: u64,

    logger: StructuredLogger,
}

impl<R: RegisterBus, T: TelemetrySink> WallboxDriver<R, T> {
    /// Create a new driver
    pub fn new(registers: R, telemetry: T, setpoint: SetpointReader) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LoopState::Starting);
        Self {
            registers,
            telemetry,
            setpoint,
            state,
            shutdown_tx,
            shutdown_rx,
            total_cycles: 0,
            logger: get_logger("driver"),
        }
    }

    /// Handle that ends the loop at its next suspension point
    pub fn shutdown_sender(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    /// Observe loop state changes
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Number of cycles completed so far
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn telemetry_mut(&mut self) -> &mut T {
        &mut self.telemetry
    }
}
