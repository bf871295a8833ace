//! Stream quality snapshot and per-session statistics.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DaisyError;

// ── Resolution ───────────────────────────────────────────────────

/// Frame dimensions, serialized as `"WIDTHxHEIGHT"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn pixels(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = DaisyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DaisyError::InvalidResolution(s.to_string());
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = DaisyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Resolution> for String {
    fn from(r: Resolution) -> Self {
        r.to_string()
    }
}

// ── Codec ────────────────────────────────────────────────────────

/// Video codec negotiated with the media pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    Hevc,
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::H264 => write!(f, "h264"),
            Self::Hevc => write!(f, "hevc"),
        }
    }
}

// ── StreamQuality ────────────────────────────────────────────────

/// Encoding parameters applied to a streaming session.
///
/// Always replaced as a whole; never partially updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamQuality {
    pub resolution: Resolution,
    pub frame_rate: u32,
    /// Bits per second.
    pub bitrate: u32,
    pub codec: Codec,
}

// ── SessionStats ─────────────────────────────────────────────────

/// Counters and gauges for one session.
///
/// `frames_sent`, `bytes_sent` and `packets_lost` only ever grow for the
/// lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub packets_lost: u64,
    #[serde(rename = "average_latency_ms")]
    pub average_latency: f64,
    /// Measured throughput in bits per second.
    pub current_bitrate: u32,
    /// Bitrate the adapter is currently targeting.
    pub target_bitrate: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_parse_and_display() {
        let r: Resolution = "1920x1080".parse().unwrap();
        assert_eq!(r, Resolution::new(1920, 1080));
        assert_eq!(r.to_string(), "1920x1080");
        assert_eq!(r.pixels(), 1920 * 1080);
    }

    #[test]
    fn resolution_rejects_garbage() {
        assert!("1920".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
        assert!("0x1080".parse::<Resolution>().is_err());
    }

    #[test]
    fn quality_json_shape() {
        let q = StreamQuality {
            resolution: Resolution::new(2732, 2048),
            frame_rate: 120,
            bitrate: 40_000_000,
            codec: Codec::H264,
        };
        let json = serde_json::to_value(q).unwrap();
        assert_eq!(json["resolution"], "2732x2048");
        assert_eq!(json["frame_rate"], 120);
        assert_eq!(json["codec"], "h264");

        let back: StreamQuality = serde_json::from_value(json).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn stats_latency_field_name() {
        let stats = SessionStats {
            average_latency: 12.5,
            ..Default::default()
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["average_latency_ms"], 12.5);
    }
}
