//! Modbus RTU client for the wallbox
//!
//! One serial line, one peer, one register per transaction. The line
//! parameters match the wallbox's fixed RS485 settings (19200 baud, 8E1) and
//! every request is bounded by a 500 ms response timeout. Failures are
//! classified into [`BridgeError::Timeout`], [`BridgeError::Modbus`] and
//! [`BridgeError::Io`] so callers can decide what is worth escalating.

use crate::config::SerialConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{LogContext, get_logger_with_context};
use crate::registers::PEER_ID;
use std::io;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::rtu;
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

/// Serial line speed of the wallbox
pub const BAUD_RATE: u32 = 19_200;

/// Maximum time to wait for the peer's answer
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Modbus RTU client for wallbox communication
pub struct ModbusRtuClient {
    /// RTU context bound to the wallbox peer id
    context: Option<tokio_modbus::client::Context>,

    /// Serial device path
    device: String,

    /// Per-transaction response timeout
    response_timeout: Duration,

    /// Logger
    logger: crate::logging::StructuredLogger,
}

impl ModbusRtuClient {
    /// Create a new, not yet opened, client
    pub fn new(config: &SerialConfig) -> Self {
        let logger = get_logger_with_context(
            LogContext::new("modbus")
                .with_field("port", config.device.clone())
                .with_field("peer", PEER_ID.to_string()),
        );
        Self {
            context: None,
            device: config.device.clone(),
            response_timeout: RESPONSE_TIMEOUT,
            logger,
        }
    }

    /// Open the serial device and attach the RTU framing
    pub fn connect(&mut self) -> Result<()> {
        self.logger.info(&format!(
            "Opening serial line {} ({} baud, 8E1)",
            self.device, BAUD_RATE
        ));

        let builder = tokio_serial::new(&self.device, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::Even)
            .stop_bits(StopBits::One);

        match SerialStream::open(&builder) {
            Ok(port) => {
                self.context = Some(rtu::attach_slave(port, Slave(PEER_ID)));
                self.logger.info("Serial line opened");
                Ok(())
            }
            Err(e) => {
                let err = BridgeError::from(e);
                self.logger.error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Check if the serial line is open
    pub fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    /// Read a single input register (function code 4)
    pub async fn read_input_register(&mut self, address: u16) -> Result<u16> {
        let timeout_duration = self.response_timeout;

        // Log before borrowing client
        self.logger
            .trace(&format!("Reading input register {}", address));

        let client = self.get_client()?;
        let request = client.read_input_registers(address, 1);

        let action = format!("Reading register {}", address);
        match timeout(timeout_duration, request).await {
            Ok(Ok(Ok(words))) => words.first().copied().ok_or_else(|| {
                BridgeError::modbus(format!("{}: empty response", action))
            }),
            Ok(Ok(Err(exception))) => Err(BridgeError::modbus(format!(
                "{}: peer answered with exception {:?}",
                action, exception
            ))),
            Ok(Err(e)) => Err(classify_transport_error(e, &action)),
            Err(_) => Err(BridgeError::timeout(format!("{}: no response", action))),
        }
    }

    /// Write a single holding register (function code 6)
    pub async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        let timeout_duration = self.response_timeout;

        // Log before borrowing client
        self.logger
            .trace(&format!("Writing value {} to register {}", value, address));

        let client = self.get_client()?;
        let request = client.write_single_register(address, value);

        let action = format!("Writing register {}", address);
        match timeout(timeout_duration, request).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exception))) => Err(BridgeError::modbus(format!(
                "{}: peer answered with exception {:?}",
                action, exception
            ))),
            Ok(Err(e)) => Err(classify_transport_error(e, &action)),
            Err(_) => Err(BridgeError::timeout(format!("{}: no response", action))),
        }
    }

    /// Get client reference or error if the line is not open
    fn get_client(&mut self) -> Result<&mut tokio_modbus::client::Context> {
        self.context
            .as_mut()
            .ok_or_else(|| BridgeError::io("Serial line is not open"))
    }
}

/// Map a tokio-modbus failure onto the bridge's error kinds
pub fn classify_transport_error(error: tokio_modbus::Error, action: &str) -> BridgeError {
    match error {
        tokio_modbus::Error::Transport(io_error) => classify_io_error(&io_error, action),
        other => BridgeError::modbus(format!("{}: {}", action, other)),
    }
}

/// Map a serial I/O failure onto the bridge's error kinds.
///
/// Bad frames (CRC mismatch, truncated answers) surface as `InvalidData` or
/// `UnexpectedEof` and count as an unusable answer, not as a broken line.
pub fn classify_io_error(error: &io::Error, action: &str) -> BridgeError {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            BridgeError::timeout(format!("{}: {}", action, error))
        }
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            BridgeError::modbus(format!("{}: invalid response: {}", action, error))
        }
        _ => BridgeError::io(format!("{}: {}", action, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modbus_client_creation() {
        let config = SerialConfig::default();
        let client = ModbusRtuClient::new(&config);
        assert!(!client.is_connected());
        assert_eq!(client.response_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_classify_io_error_kinds() {
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "no answer");
        assert!(matches!(
            classify_io_error(&timed_out, "read"),
            BridgeError::Timeout { .. }
        ));

        let bad_crc = io::Error::new(io::ErrorKind::InvalidData, "Invalid CRC");
        assert!(matches!(
            classify_io_error(&bad_crc, "read"),
            BridgeError::Modbus { .. }
        ));

        let gone = io::Error::new(io::ErrorKind::BrokenPipe, "device removed");
        assert!(matches!(
            classify_io_error(&gone, "read"),
            BridgeError::Io { .. }
        ));
    }

    #[test]
    fn test_classify_transport_error_wraps_io() {
        let err = tokio_modbus::Error::Transport(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let classified = classify_transport_error(err, "Reading register 14");
        assert!(!classified.is_expected_transport_fault());
        assert!(classified.to_string().contains("Reading register 14"));
    }
}
