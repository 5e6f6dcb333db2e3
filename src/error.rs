//! Error types and handling for the wallbox bridge
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting. Register transport
//! failures are split into declared kinds so the poll loop can tell an
//! expected fault (peer asleep, line noise) from an unclassified one.

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The peer answered, but the exchange was unusable (exception, bad frame)
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// No response from the peer within the per-call timeout
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// MQTT client errors
    #[error("MQTT error: {message}")]
    Mqtt { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File and serial port I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },
}

impl BridgeError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        BridgeError::Modbus {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        BridgeError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new MQTT error
    pub fn mqtt<S: Into<String>>(message: S) -> Self {
        BridgeError::Mqtt {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        BridgeError::Io {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        BridgeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this is an expected register transport fault.
    ///
    /// Timeouts and unusable peer answers happen whenever the wallbox is in
    /// standby or the bus is noisy; the next cycle simply tries again.
    /// Everything else is unclassified.
    pub fn is_expected_transport_fault(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. } | BridgeError::Modbus { .. })
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for BridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        BridgeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<tokio_serial::Error> for BridgeError {
    fn from(err: tokio_serial::Error) -> Self {
        BridgeError::io(format!("Serial port error: {}", err))
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::mqtt(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BridgeError::config("test config error");
        assert!(matches!(err, BridgeError::Config { .. }));

        let err = BridgeError::modbus("test modbus error");
        assert!(matches!(err, BridgeError::Modbus { .. }));

        let err = BridgeError::validation("field", "test validation error");
        assert!(matches!(err, BridgeError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::config("test error");
        assert_eq!(format!("{}", err), "Configuration error: test error");

        let err = BridgeError::validation("test_field", "invalid value");
        assert_eq!(
            format!("{}", err),
            "Validation error: test_field - invalid value"
        );
    }

    #[test]
    fn test_transport_fault_classification() {
        assert!(BridgeError::timeout("no answer").is_expected_transport_fault());
        assert!(BridgeError::modbus("exception").is_expected_transport_fault());
        assert!(!BridgeError::io("port gone").is_expected_transport_fault());
        assert!(!BridgeError::mqtt("queue closed").is_expected_transport_fault());
        assert!(!BridgeError::config("bad").is_expected_transport_fault());
    }
}
