//! Stream channel wire protocol
//!
//! Discrete JSON frames, discriminated by `type`. Unknown payload fields
//! are ignored; an unknown `type` is a protocol error and is answered with
//! an `error` frame rather than dropped silently.
//!
//! Terminal `data` fields carry base64-encoded bytes: shell traffic is not
//! guaranteed to be valid UTF-8 and must round-trip byte-for-byte through
//! the JSON text frame.

use serde::{Deserialize, Serialize};

use crate::ssh::ConnectionStatus;
use crate::store::TerminalSession;

/// Terminal dimensions as reported by the client widget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Dimensions {
    pub cols: u16,
    pub rows: u16,
}

/// Client → gateway frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "ssh:connect", rename_all = "camelCase")]
    SshConnect {
        session_id: String,
        profile_id: String,
        #[serde(default)]
        title: Option<String>,
    },

    #[serde(rename = "ssh:disconnect", rename_all = "camelCase")]
    SshDisconnect { session_id: String },

    #[serde(rename = "terminal:input", rename_all = "camelCase")]
    TerminalInput {
        session_id: String,
        /// Base64-encoded bytes for the shell's stdin
        data: String,
    },

    #[serde(rename = "terminal:resize", rename_all = "camelCase")]
    TerminalResize {
        session_id: String,
        dimensions: Dimensions,
    },

    /// Advisory; the visual clear happens client-side
    #[serde(rename = "terminal:clear", rename_all = "camelCase")]
    TerminalClear { session_id: String },

    #[serde(rename = "ai:translate", rename_all = "camelCase")]
    AiTranslate {
        #[serde(default)]
        session_id: Option<String>,
        prompt: String,
        #[serde(default)]
        context: Option<String>,
    },

    #[serde(rename = "ai:explain", rename_all = "camelCase")]
    AiExplain {
        #[serde(default)]
        session_id: Option<String>,
        command: String,
    },

    #[serde(rename = "ai:query", rename_all = "camelCase")]
    AiQuery {
        #[serde(default)]
        session_id: Option<String>,
        prompt: String,
    },

    #[serde(rename = "session:list")]
    SessionList,
}

/// Gateway → client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "terminal:output", rename_all = "camelCase")]
    TerminalOutput {
        session_id: String,
        /// Base64-encoded shell output chunk, in emission order
        data: String,
    },

    #[serde(rename = "ssh:status", rename_all = "camelCase")]
    SshStatus {
        session_id: String,
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "ai:response", rename_all = "camelCase")]
    AiResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        commands: Vec<String>,
        explanation: String,
        warnings: Vec<String>,
        confidence: f32,
    },

    #[serde(rename = "session:list", rename_all = "camelCase")]
    SessionList { sessions: Vec<TerminalSession> },

    /// Protocol-level rejection (malformed frame, unknown type, unowned
    /// session)
    #[serde(rename = "error")]
    Error { message: String },
}
