//! Device announcement table
//!
//! Everything a Homie consumer needs to render the wallbox without prior
//! knowledge. The table is static apart from the bridge version and is
//! published retained, in this order, on every (re)connect.

use super::{BASE_TOPIC, DeviceState, HOMIE_VERSION, NODE_ID, Property};

/// One retained announcement message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementEntry {
    /// Topic below the device base topic, e.g. `$name` or `wallbox/$name`
    pub suffix: String,
    pub value: String,
}

impl AnnouncementEntry {
    fn new(suffix: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            value: value.into(),
        }
    }

    /// Full topic of this entry
    pub fn topic(&self) -> String {
        format!("{}/{}", BASE_TOPIC, self.suffix)
    }
}

/// Build the complete announcement in publish order
pub fn device_announcement() -> Vec<AnnouncementEntry> {
    let mut entries = vec![
        AnnouncementEntry::new("$homie", HOMIE_VERSION),
        AnnouncementEntry::new("$name", "Heidelberg Energy Control"),
        AnnouncementEntry::new("$state", DeviceState::Ready.as_str()),
        AnnouncementEntry::new("$extensions", ""),
        AnnouncementEntry::new(
            "$implementation",
            format!("wallbox-bridge {}", env!("APP_VERSION")),
        ),
        AnnouncementEntry::new("$nodes", NODE_ID),
        AnnouncementEntry::new(format!("{}/$name", NODE_ID), "Werte Wallbox"),
        AnnouncementEntry::new(
            format!("{}/$properties", NODE_ID),
            Property::ALL
                .iter()
                .map(|p| p.id())
                .collect::<Vec<_>>()
                .join(","),
        ),
    ];

    for property in Property::ALL {
        let prefix = format!("{}/{}", NODE_ID, property.id());
        entries.push(AnnouncementEntry::new(
            format!("{}/$name", prefix),
            property.name(),
        ));
        entries.push(AnnouncementEntry::new(
            format!("{}/$unit", prefix),
            property.unit(),
        ));
        entries.push(AnnouncementEntry::new(
            format!("{}/$datatype", prefix),
            property.datatype(),
        ));
        if property.settable() {
            entries.push(AnnouncementEntry::new(
                format!("{}/$settable", prefix),
                "true",
            ));
        }
    }

    entries
}
