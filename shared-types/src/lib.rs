//! Shared types between the terminal client, the host page and the backend
//!
//! These types are used by both:
//! - the `practice-terminal` client (native Rust)
//! - the host page (TypeScript, via the generated bindings)
//!
//! Serializable with serde for JSON over HTTP and the duplex WebSocket channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// HTTP bodies
// ============================================================================

/// Body of `POST /run_code`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
pub struct RunCodeRequest {
    pub code: String,
    pub stdin: String,
    pub language: String,
}

/// Response of `POST /run_code`
///
/// Every field is optional on the wire. Absent or malformed output fields are
/// treated as "no output", never as an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
pub struct RunCodeResponse {
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Set by the backend when the program looked like it was waiting for input
    #[serde(default)]
    pub requires_input: bool,
    /// Last line the program printed before it stalled on input
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Body of `POST /execute_command`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
pub struct ExecuteCommandRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Response of `POST /execute_command`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
pub struct ExecuteCommandResponse {
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub returncode: Option<i32>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Duplex channel
// ============================================================================

/// Frames sent by the client over the duplex channel
///
/// Encoded as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[ts(export)]
pub enum ClientEvent {
    /// Open a plain interactive shell
    TerminalInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
    },
    /// Raw keystrokes for the remote pseudo-terminal
    TerminalInput { input: String },
    TerminalResize { cols: u16, rows: u16 },
    TerminalKill {},
    RunPythonCode { code: String },
}

/// Frames sent by the server over the duplex channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[ts(export)]
pub enum ServerEvent {
    TerminalReady {},
    TerminalOutput { output: String },
    TerminalExit {
        #[serde(default)]
        exit_code: Option<i32>,
    },
    TerminalError { message: String },
}

// ============================================================================
// Display model
// ============================================================================

/// How a rendered line is styled by the host page
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum OutputKind {
    Welcome,
    System,
    CommandEcho,
    Stdout,
    Stderr,
    Error,
}

/// One rendered entry of the terminal output log. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
pub struct OutputLine {
    pub text: String,
    pub kind: OutputKind,
    pub at: DateTime<Utc>,
}

impl OutputLine {
    pub fn new(text: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            text: text.into(),
            kind,
            at: Utc::now(),
        }
    }
}
