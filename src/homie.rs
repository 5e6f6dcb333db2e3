//! Homie 3.0 telemetry over MQTT
//!
//! The wallbox is published as a single Homie device with one node and three
//! properties. Topic names are part of the wire contract with existing
//! consumers and never change.

use crate::error::Result;
use rumqttc::QoS;
use std::sync::Arc;

pub mod announcement;
pub mod publisher;

pub use announcement::{AnnouncementEntry, device_announcement};
pub use publisher::HomiePublisher;

/// Homie convention version announced in `$homie`
pub const HOMIE_VERSION: &str = "3.0.0";

/// Root of every topic the bridge publishes; the second level is the device id
pub const BASE_TOPIC: &str = "homie/Heidelberg-Wallbox";

/// The only node of the device
pub const NODE_ID: &str = "wallbox";

/// Handler invoked on the MQTT task with the topic and raw payload
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Properties of the wallbox node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    /// Instantaneous charging power
    Power,
    /// Energy meter total
    EnergyTotal,
    /// Maximum charge current setpoint
    MaxCurrent,
}

impl Property {
    pub const ALL: [Property; 3] = [Property::Power, Property::EnergyTotal, Property::MaxCurrent];

    /// Property id, the last topic level
    pub fn id(self) -> &'static str {
        match self {
            Property::Power => "akt_verbrauch",
            Property::EnergyTotal => "zaehlerstand",
            Property::MaxCurrent => "max_current",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Property::Power => "Aktueller Verbrauch",
            Property::EnergyTotal => "Zählerstand",
            Property::MaxCurrent => "Max Ladeleistung",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Property::Power => "Watt",
            Property::EnergyTotal => "kWh",
            Property::MaxCurrent => "A",
        }
    }

    pub fn datatype(self) -> &'static str {
        match self {
            Property::Power | Property::MaxCurrent => "integer",
            Property::EnergyTotal => "float",
        }
    }

    pub fn settable(self) -> bool {
        matches!(self, Property::MaxCurrent)
    }

    /// Whether values are published with the retain flag
    pub fn retained(self) -> bool {
        !matches!(self, Property::Power)
    }

    /// Topic carrying the property value
    pub fn topic(self) -> String {
        format!("{}/{}/{}", BASE_TOPIC, NODE_ID, self.id())
    }

    /// Command topic for settable properties
    pub fn set_topic(self) -> Option<String> {
        self.settable().then(|| format!("{}/set", self.topic()))
    }
}

/// Values of the device `$state` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Ready,
    Disconnected,
    Lost,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Ready => "ready",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Lost => "lost",
        }
    }
}

/// Topic of a device attribute such as `$state`
pub fn device_attribute_topic(attribute: &str) -> String {
    format!("{}/{}", BASE_TOPIC, attribute)
}

/// Topic of the device `$state` attribute
pub fn state_topic() -> String {
    device_attribute_topic("$state")
}

/// MQTT topic filter matching with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Outbound side of the telemetry bus as seen by the poll loop
#[async_trait::async_trait]
pub trait TelemetrySink: Send {
    /// Publish one value; failures are reported, never panicked on
    async fn publish(&mut self, topic: &str, payload: String, qos: QoS, retain: bool)
    -> Result<()>;

    /// Close the session and stop background work
    async fn disconnect(&mut self) -> Result<()>;
}
