//! Attach-time device configuration.
//!
//! Supplied by the platform when a sensor is attached. Can be loaded from
//! JSON; every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};

use crate::chip::transport::Encoding;
use crate::error::{ConfigError, TransportError};

/// Longest channel name the message bus accepts (16-byte field, NUL kept).
pub const MAX_CHANNEL_NAME: usize = 15;

/// Groups every device registers: driver control and fusion broadcast.
pub const REQUIRED_GROUPS: u8 = 2;

/// Upper bound for `broadcast_groups`.
pub const MAX_GROUPS: u8 = 32;

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    // --- Message bus ---
    /// Channel (family) name registered on the message bus
    pub channel_name: String,
    /// Number of broadcast groups the channel may carry
    pub broadcast_groups: u8,
    /// Outbound/inbound message buffer size in bytes
    pub message_buffer_size: usize,

    // --- Chip ---
    /// Wire encoding for normal chip access (1, 2 or 3)
    pub chip_access_method: u8,
    /// Transport frame buffer size in bytes
    pub frame_buffer_size: usize,

    // --- Companion ---
    /// Executable launched as the fusion companion
    pub companion_path: String,
    /// Configuration file handed to the companion
    pub companion_config: String,

    // --- Firmware ---
    /// Image requested from the platform for legacy firmware download
    pub firmware_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            channel_name: "max1187x".into(),
            broadcast_groups: 8,
            message_buffer_size: 4096,

            chip_access_method: 1,
            frame_buffer_size: 4096,

            companion_path: "/system/bin/touch_fusion".into(),
            companion_config: "/etc/firmware/touch_fusion.cfg".into(),

            firmware_name: "maxim_fp35.bin".into(),
        }
    }
}

impl DeviceConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|_| ConfigError::Parse)
    }

    /// Check every field against the limits the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_name.is_empty() || self.channel_name.len() > MAX_CHANNEL_NAME {
            return Err(ConfigError::Invalid("channel_name"));
        }
        if self.broadcast_groups < REQUIRED_GROUPS || self.broadcast_groups > MAX_GROUPS {
            return Err(ConfigError::Invalid("broadcast_groups"));
        }
        if self.message_buffer_size < 64 || self.message_buffer_size > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid("message_buffer_size"));
        }
        if self.frame_buffer_size < 512 || self.frame_buffer_size % 2 != 0 {
            return Err(ConfigError::Invalid("frame_buffer_size"));
        }
        if self.companion_path.is_empty() {
            return Err(ConfigError::Invalid("companion_path"));
        }
        self.encoding()
            .map_err(|_| ConfigError::Invalid("chip_access_method"))?;
        Ok(())
    }

    /// Wire encoding selected by `chip_access_method`.
    pub fn encoding(&self) -> Result<Encoding, TransportError> {
        Encoding::try_from(self.chip_access_method)
    }

    /// Argument vector for the companion process.
    pub fn companion_argv(&self) -> [&str; 4] {
        [
            self.companion_path.as_str(),
            "daemon",
            self.channel_name.as_str(),
            self.companion_config.as_str(),
        ]
    }
}
