//! Paired devices and host displays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::quality::Resolution;
use crate::model::session::ClientId;

/// One physically paired tablet.
///
/// `connected` is derived on read from the session registry; it is never
/// stored as authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub name: String,
    /// e.g. `"iPad Pro 12.9"`.
    #[serde(default)]
    pub device_model: String,
    /// e.g. `"iOS 17.2"`.
    #[serde(default)]
    pub os_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub refresh_rate: u32,
    pub connected: bool,
    pub last_seen: DateTime<Utc>,
}

impl ClientInfo {
    /// A freshly paired client with only identity known.
    pub fn paired(id: ClientId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            device_model: String::new(),
            os_version: String::new(),
            resolution: None,
            refresh_rate: 0,
            connected: false,
            last_seen: now,
        }
    }
}

/// A host display that can be mirrored or extended to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub index: u32,
    pub name: String,
    pub resolution: Resolution,
    pub refresh_rate: u32,
    pub is_primary: bool,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl DisplayInfo {
    /// Whether the point `(x, y)` in desktop coordinates lies on this display.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        (x as i64) >= self.x as i64
            && (x as i64) < right
            && (y as i64) >= self.y as i64
            && (y as i64) < bottom
    }
}
