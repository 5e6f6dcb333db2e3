//! # Wallbox Bridge - Heidelberg charger to Homie/MQTT
//!
//! Polls a Heidelberg wallbox over Modbus RTU, publishes its meter readings
//! as a Homie device and forwards a max-current setpoint received over MQTT
//! back to the charger.
//!
//! ## Architecture
//!
//! - `config`: YAML configuration and validation
//! - `logging`: Structured logging, daily rotation and archive pruning
//! - `registers`: Wallbox register map
//! - `modbus`: Modbus RTU client for the serial line
//! - `homie`: Homie device description and the MQTT session
//! - `driver`: The poll-and-bridge loop and the setpoint cell

pub mod config;
pub mod driver;
pub mod error;
pub mod homie;
pub mod logging;
pub mod modbus;
pub mod registers;

// Re-export commonly used types
pub use config::Config;
pub use driver::WallboxDriver;
pub use error::{BridgeError, Result};
