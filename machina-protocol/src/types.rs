//! Protocol message types for driver plugin communication

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{MAX_MESSAGE_LEN, PROTOCOL_VERSION};

// ============================================================================
// Machine State
// ============================================================================

/// Observed state of a virtual machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    #[default]
    None,
    Running,
    Paused,
    Saved,
    Stopped,
    Stopping,
    Starting,
    Error,
    Timeout,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineState::None => "",
            MachineState::Running => "Running",
            MachineState::Paused => "Paused",
            MachineState::Saved => "Saved",
            MachineState::Stopped => "Stopped",
            MachineState::Stopping => "Stopping",
            MachineState::Starting => "Starting",
            MachineState::Error => "Error",
            MachineState::Timeout => "Timeout",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Driver Errors
// ============================================================================

/// Category of a driver failure, preserved across the RPC boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverErrorKind {
    InvalidConfig,
    NotSupported,
    InvalidState,
    Command,
    Io,
    Disconnected,
    Other,
}

/// Structured `data` attached to a driver error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverErrorData {
    pub kind: DriverErrorKind,
}

// ============================================================================
// Configuration
// ============================================================================

/// Parameters for `set_config_raw`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetConfigRawParams {
    #[serde(with = "base64_bytes")]
    pub raw: Vec<u8>,
}

impl SetConfigRawParams {
    /// Largest configuration whose base64 form still fits in one message,
    /// leaving room for the request envelope.
    pub const MAX_RAW_LEN: usize = (MAX_MESSAGE_LEN - ENVELOPE_RESERVE) / 4 * 3;
}

const ENVELOPE_RESERVE: usize = 1024;

/// Result for `heartbeat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResult {
    pub protocol_version: String,
}

impl HeartbeatResult {
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Result for `get_config_raw`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRawResult {
    #[serde(with = "base64_bytes")]
    pub raw: Vec<u8>,
}

// ============================================================================
// Simple Results
// ============================================================================

/// A single string result (names, addresses, URLs, paths)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringResult {
    pub value: String,
}

/// Result for `get_ssh_port`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortResult {
    pub port: u16,
}

/// Result for `get_state`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateResult {
    pub state: MachineState,
}

/// Acknowledgement for operations without a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// Serde module encoding byte vectors as standard base64 strings
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(val: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(val))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
