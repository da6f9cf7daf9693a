//! Wire types for lifecycle notifications sent to the perch daemon.
//!
//! This crate is shared by the daemon and anything that wants to emit
//! events to it. The protocol is one-way and unframed: a peer connects
//! to the socket, writes one UTF-8 JSON document, and closes. Decoding
//! tolerates unknown fields and unknown event kinds so newer hook
//! versions can talk to an older daemon.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Lifecycle notification kinds the tracker reacts to.
///
/// Any other `event` string decodes to `Other` and causes no state
/// change downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    SessionStart,
    PreToolUse,
    PostToolUse,
    SessionEnd,
    #[serde(other)]
    Other,
}

/// One decoded lifecycle notification.
///
/// `tool_input` keeps the sender's JSON shape losslessly
/// (`serde_json::Value` covers null/bool/number/string/array/object at
/// every level) so nested tool arguments can be rendered later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub session_id: String,
    pub cwd: String,
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

impl LifecycleEvent {
    /// Whether a completion event reports success. Only the literal
    /// status `"error"` marks a failed invocation; anything else,
    /// including an empty status, counts as success.
    pub fn is_success(&self) -> bool {
        self.status != "error"
    }
}

/// Decode failure, carrying the raw payload for diagnostic logging.
#[derive(Debug, Error)]
#[error("invalid lifecycle event: {source}")]
pub struct DecodeError {
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

/// Decodes one complete message as read from the socket.
///
/// `session_id`, `cwd`, `event`, and `status` are required; all other
/// fields are optional and unknown fields are ignored.
pub fn decode_event(raw: &[u8]) -> Result<LifecycleEvent, DecodeError> {
    serde_json::from_slice(raw).map_err(|source| DecodeError {
        raw: String::from_utf8_lossy(raw).into_owned(),
        source,
    })
}
