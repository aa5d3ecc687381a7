//! The framed client/server message stream (§6).
//!
//! Frames are JSON objects tagged on `type`. One [`ClientMessage`] arrives
//! per inbound websocket text frame; the gateway answers with zero or more
//! [`ServerMessage`] frames, each serialized independently (no batching).

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Default geometry used whenever a `create_*` message omits cols/rows.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 30;

/// Frames larger than this are rejected with an `error` frame and discarded
/// rather than parsed, per §8 "Boundary behaviors".
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateTerminal {
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
        title: Option<String>,
        #[serde(rename = "kubeContext")]
        kube_context: Option<String>,
    },
    CreateSandbox {
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
        image: String,
        title: Option<String>,
    },
    CloneTerminal {
        #[serde(rename = "originalSessionId")]
        original_session_id: SessionId,
        #[serde(rename = "cloneType")]
        clone_type: CloneType,
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
    },
    Input {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        data: String,
    },
    Resize {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    CloseTerminal {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    CreateSsh {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        username: String,
        password: Option<String>,
        #[serde(rename = "privateKey")]
        private_key: Option<String>,
        passphrase: Option<String>,
        term: Option<String>,
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
    },
    DuplicateSsh {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    ReconnectSsh {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    SshInput {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        data: String,
    },
    SshResize {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    CloseSsh {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
}

fn default_ssh_port() -> u16 {
    22
}

/// The source only ever implements one behavior for all four clone types;
/// this mirrors that rather than invent finer semantics (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneType {
    Simple,
    Split,
    Window,
    Tab,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        timestamp: u64,
    },
    TerminalCreated {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cloned: Option<bool>,
        #[serde(rename = "isSandbox", skip_serializing_if = "Option::is_none")]
        is_sandbox: Option<bool>,
        #[serde(rename = "cloneType", skip_serializing_if = "Option::is_none")]
        clone_type: Option<CloneType>,
    },
    SshCreated {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        title: String,
        params: SafeSshParams,
        #[serde(skip_serializing_if = "Option::is_none")]
        cloned: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duplicated: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reconnected: Option<bool>,
    },
    Data {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        data: String,
    },
    SshData {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        data: String,
    },
    TerminalExit {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        code: Option<i32>,
    },
    TerminalClosed {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    SshClosed {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    Error {
        message: String,
    },
}

/// Credential-stripped echo of SSH connection parameters (`getSafeParams` in
/// the source). Never derive `Serialize` on the full params type with
/// credentials included — this type exists precisely so that can't happen
/// by accident.
#[derive(Debug, Clone, Serialize)]
pub struct SafeSshParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub term: String,
}
