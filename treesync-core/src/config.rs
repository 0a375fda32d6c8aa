//! Synchronization Configuration
//!
//! Tunables shared by the client message handler, the embedded component
//! tracker and the server endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::protocol::WireFormat;

fn default_suspend_timeout() -> u64 {
    5000
}

fn default_disconnect_heartbeats() -> u32 {
    3
}

/// Synchronization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// How long (milliseconds) messages received ahead of a missing sync id
    /// are held before giving up and requesting a resynchronization.
    #[serde(default = "default_suspend_timeout")]
    pub max_message_suspend_timeout: u64,

    /// Number of heartbeats a disconnected embedded component survives
    /// before its virtual child registration is removed.
    #[serde(default = "default_disconnect_heartbeats")]
    pub disconnect_heartbeats: u32,

    /// Encoding used for messages on the wire.
    pub wire_format: WireFormat,
}

impl SyncConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The suspend timeout as a [`Duration`].
    pub fn suspend_timeout(&self) -> Duration {
        Duration::from_millis(self.max_message_suspend_timeout)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_message_suspend_timeout: default_suspend_timeout(),
            disconnect_heartbeats: default_disconnect_heartbeats(),
            wire_format: WireFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = SyncConfig::from_json_str(r#"{ "disconnectHeartbeats": 5 }"#).unwrap();
        assert_eq!(config.disconnect_heartbeats, 5);
        assert_eq!(config.suspend_timeout(), Duration::from_millis(5000));
        assert_eq!(config.wire_format, WireFormat::Json);
    }

    #[test]
    fn wire_format_is_lowercase() {
        let config = SyncConfig::from_json_str(r#"{ "wireFormat": "msgpack" }"#).unwrap();
        assert_eq!(config.wire_format, WireFormat::MessagePack);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let error = SyncConfig::from_json_str("{ not json").unwrap_err();
        assert!(error.is_serialization_error());
    }
}
