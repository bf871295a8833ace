//! Network link telemetry.

use serde::{Deserialize, Serialize};

use crate::model::session::ConnectionType;

/// One normalized telemetry sample for a connection.
///
/// Transient: consumed by the quality adapter and then folded into
/// rolling statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub interface_name: String,
    pub ip_address: String,
    pub latency_ms: f64,
    pub bandwidth_bps: u64,
    pub packet_loss_percent: f64,
}

impl ConnectionInfo {
    /// A sample carrying only the measured values, with no interface details.
    pub fn measured(
        connection_type: ConnectionType,
        latency_ms: f64,
        bandwidth_bps: u64,
        packet_loss_percent: f64,
    ) -> Self {
        Self {
            connection_type,
            interface_name: String::new(),
            ip_address: String::new(),
            latency_ms,
            bandwidth_bps,
            packet_loss_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_field_is_renamed() {
        let info = ConnectionInfo::measured(ConnectionType::WiFi5, 12.0, 1_000_000, 0.5);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "wifi5");
        assert_eq!(json["packet_loss_percent"], 0.5);
    }
}
