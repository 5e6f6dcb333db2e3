//! Maximum charge current setpoint
//!
//! A single-slot cell: the MQTT task holds the only [`SetpointWriter`], the
//! poll loop holds the [`SetpointReader`] and samples it once per cycle.
//! Values are never persisted; every process starts at 0 A.

use crate::error::{BridgeError, Result};
use crate::homie::MessageHandler;
use crate::logging::{StructuredLogger, get_logger};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

/// Largest setpoint whose tenth-ampere encoding fits one register
pub const MAX_SETPOINT_AMPS: u16 = u16::MAX / 10;

/// Setpoint in whole amperes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct MaxCurrent(u16);

impl MaxCurrent {
    pub fn new(amps: u16) -> Result<Self> {
        if amps > MAX_SETPOINT_AMPS {
            return Err(BridgeError::validation(
                "max_current".to_string(),
                format!("{} A exceeds {} A", amps, MAX_SETPOINT_AMPS),
            ));
        }
        Ok(Self(amps))
    }

    pub fn amps(self) -> u16 {
        self.0
    }

    /// Register encoding in tenths of an ampere
    pub fn register_value(self) -> u16 {
        self.0 * 10
    }
}

impl fmt::Display for MaxCurrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MaxCurrent {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let amps: u16 = trimmed.parse().map_err(|_| {
            BridgeError::validation(
                "max_current".to_string(),
                format!("'{}' is not a whole number of amperes", trimmed),
            )
        })?;
        Self::new(amps)
    }
}

/// Decode an inbound MQTT payload
pub fn parse_setpoint_payload(payload: &[u8]) -> Result<MaxCurrent> {
    let text = std::str::from_utf8(payload).map_err(|_| {
        BridgeError::validation("max_current", "payload is not UTF-8")
    })?;
    text.parse()
}

/// Create the cell, initialised to 0 A
pub fn setpoint_channel() -> (SetpointWriter, SetpointReader) {
    let (tx, rx) = watch::channel(MaxCurrent::default());
    (
        SetpointWriter {
            tx,
            logger: get_logger("setpoint"),
        },
        SetpointReader { rx },
    )
}

/// Write-only handle, owned by the inbound message path
pub struct SetpointWriter {
    tx: watch::Sender<MaxCurrent>,
    logger: StructuredLogger,
}

impl SetpointWriter {
    /// Replace the setpoint, returning the previous value
    pub fn set(&self, value: MaxCurrent) -> MaxCurrent {
        self.tx.send_replace(value)
    }

    /// Parse a payload and store it; invalid payloads leave the value untouched
    pub fn apply_payload(&self, payload: &[u8]) -> Result<MaxCurrent> {
        match parse_setpoint_payload(payload) {
            Ok(value) => {
                self.set(value);
                self.logger
                    .info(&format!("New max current received: {} A", value));
                Ok(value)
            }
            Err(e) => {
                self.logger.warn(&format!(
                    "Ignoring max current payload {:?}: {}",
                    String::from_utf8_lossy(payload), e
                ));
                Err(e)
            }
        }
    }

    /// Turn the writer into the handler for the command topic
    pub fn into_handler(self) -> MessageHandler {
        Arc::new(move |_topic, payload| {
            let _ = self.apply_payload(payload);
        })
    }
}

/// Read handle, owned by the poll loop
#[derive(Clone)]
pub struct SetpointReader {
    rx: watch::Receiver<MaxCurrent>,
}

impl SetpointReader {
    /// Latest stored setpoint
    pub fn current(&self) -> MaxCurrent {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let (_writer, reader) = setpoint_channel();
        assert_eq!(reader.current().amps(), 0);
    }

    #[test]
    fn register_value_is_tenths() {
        for amps in 0..=32u16 {
            let value = MaxCurrent::new(amps).unwrap();
            assert_eq!(value.register_value(), amps * 10);
            assert_eq!(value.amps(), amps);
        }
        assert_eq!(
            MaxCurrent::new(MAX_SETPOINT_AMPS).unwrap().register_value(),
            65530
        );
        assert!(MaxCurrent::new(MAX_SETPOINT_AMPS + 1).is_err());
    }

    #[test]
    fn parses_payloads() {
        assert_eq!(parse_setpoint_payload(b"16").unwrap().amps(), 16);
        assert_eq!(parse_setpoint_payload(b" 6\n").unwrap().amps(), 6);
        assert!(parse_setpoint_payload(b"abc").is_err());
        assert!(parse_setpoint_payload(b"-1").is_err());
        assert!(parse_setpoint_payload(b"7000").is_err());
        assert!(parse_setpoint_payload(b"16.5").is_err());
        assert!(parse_setpoint_payload(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn invalid_payload_keeps_previous_value() {
        let (writer, reader) = setpoint_channel();
        writer.apply_payload(b"10").unwrap();
        assert!(writer.apply_payload(b"ten").is_err());
        assert_eq!(reader.current().amps(), 10);
    }

    #[test]
    fn handler_updates_reader() {
        let (writer, reader) = setpoint_channel();
        let handler = writer.into_handler();
        handler("homie/Heidelberg-Wallbox/wallbox/max_current/set", b"16");
        assert_eq!(reader.current().amps(), 16);
    }
}
