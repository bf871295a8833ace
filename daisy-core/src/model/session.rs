//! Session identity, lifecycle state and link type.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DaisyError;
use crate::model::quality::{SessionStats, StreamQuality};

// ── Identifiers ──────────────────────────────────────────────────

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random identifier (`sess-<uuid>`).
    pub fn generate() -> Self {
        Self(format!("sess-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a paired device (its `device_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── ConnectionType ───────────────────────────────────────────────

/// Physical link between host and client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Usb,
    Ethernet,
    WiFi6,
    WiFi5,
    WiFi4,
    Unknown,
}

impl ConnectionType {
    pub const ALL: [ConnectionType; 6] = [
        ConnectionType::Usb,
        ConnectionType::Ethernet,
        ConnectionType::WiFi6,
        ConnectionType::WiFi5,
        ConnectionType::WiFi4,
        ConnectionType::Unknown,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Ethernet => "ethernet",
            Self::WiFi6 => "wifi6",
            Self::WiFi5 => "wifi5",
            Self::WiFi4 => "wifi4",
            Self::Unknown => "unknown",
        }
    }

    /// USB and Ethernet links.
    pub const fn is_wired(self) -> bool {
        matches!(self, Self::Usb | Self::Ethernet)
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = DaisyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DaisyError::Other(format!("unknown connection type: {s}")))
    }
}

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle state of a streaming session.
///
/// ```text
///  Connecting ──► Connected ──► Streaming ──► Disconnecting ──► Disconnected
///       │             │            │  ▲ │           │                ▲
///       ▼             ▼            ▼  └─┘           ▼                │
///       └──────────────────────► Error ─────────────────────────────┘
///       ▲                          │
///       └────── reconnect ─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Connected,
    Streaming,
    Disconnecting,
    Disconnected,
    Error,
}

impl SessionState {
    pub const ALL: [SessionState; 6] = [
        SessionState::Connecting,
        SessionState::Connected,
        SessionState::Streaming,
        SessionState::Disconnecting,
        SessionState::Disconnected,
        SessionState::Error,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Streaming => "streaming",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// `Disconnected` is the only terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Every state except `Disconnected` counts as active.
    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Session ──────────────────────────────────────────────────────

/// Point-in-time view of one client's streaming session.
///
/// The registry holds the authoritative copy; callers always receive
/// clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub client_id: ClientId,
    pub state: SessionState,
    pub connection_type: ConnectionType,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// When the most recent transport handshake completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// Number of times the session entered `error`.
    #[serde(default)]
    pub retries: u32,
    /// Present from the first `streaming` entry onward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<StreamQuality>,
    /// Present from the first `streaming` entry onward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SessionStats>,
}

impl Session {
    pub fn new(
        id: SessionId,
        client_id: ClientId,
        connection_type: ConnectionType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            client_id,
            state: SessionState::Connecting,
            connection_type,
            created_at: now,
            last_active: now,
            connected_at: None,
            retries: 0,
            quality: None,
            stats: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_differ() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sess-"));
    }

    #[test]
    fn connection_type_wire_names() {
        assert_eq!(serde_json::to_string(&ConnectionType::WiFi6).unwrap(), "\"wifi6\"");
        assert_eq!(serde_json::to_string(&ConnectionType::Usb).unwrap(), "\"usb\"");
        let t: ConnectionType = serde_json::from_str("\"ethernet\"").unwrap();
        assert_eq!(t, ConnectionType::Ethernet);
        assert!(serde_json::from_str::<ConnectionType>("\"bluetooth\"").is_err());
    }

    #[test]
    fn connection_type_parse() {
        assert_eq!("WiFi5".parse::<ConnectionType>().unwrap(), ConnectionType::WiFi5);
        assert!("carrier-pigeon".parse::<ConnectionType>().is_err());
        assert!(ConnectionType::Usb.is_wired());
        assert!(!ConnectionType::WiFi4.is_wired());
    }

    #[test]
    fn only_disconnected_is_terminal() {
        for state in SessionState::ALL {
            assert_eq!(state.is_terminal(), state == SessionState::Disconnected);
        }
    }

    #[test]
    fn new_session_omits_optional_fields() {
        let session = Session::new(
            SessionId::from("sess-1"),
            ClientId::from("ipad-1"),
            ConnectionType::WiFi6,
            Utc::now(),
        );
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["state"], "connecting");
        assert_eq!(json["client_id"], "ipad-1");
        assert_eq!(json["connection_type"], "wifi6");
        assert!(json.get("quality").is_none());
        assert!(json.get("stats").is_none());
        assert!(json.get("connected_at").is_none());
    }
}
