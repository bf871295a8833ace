//! Pairing request / response pair.

use serde::{Deserialize, Serialize};

/// A device asking to pair with the host using a displayed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequest {
    pub code: String,
    pub device_id: String,
    pub device_name: String,
}

impl PairingRequest {
    pub fn new(
        code: impl Into<String>,
        device_id: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            device_id: device_id.into(),
            device_name: device_name.into(),
        }
    }
}

/// Result of a pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PairingResponse {
    pub fn granted(token: String) -> Self {
        Self {
            success: true,
            token: Some(token),
            message: None,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            success: false,
            token: None,
            message: Some(message.into()),
        }
    }
}
