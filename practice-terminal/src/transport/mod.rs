//! Transport Adapter - the one contract both terminal transports implement
//!
//! A transport is chosen at construction time:
//! - [`http::HttpTransport`]: request/response, `POST /run_code`, output arrives
//!   once the program has finished
//! - [`duplex::DuplexTransport`]: persistent WebSocket to a remote
//!   pseudo-terminal, output streams as it is produced
//!
//! Both report progress as [`TransportEvent`]s on the channel handed to them at
//! construction. Socket plumbing (connect, reconnect, disconnect) never leaks
//! past this module; the session only sees `Error` and `Exited`.

pub mod duplex;
pub mod http;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

/// Identity of one program run; events from any other run are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(Ulid);

impl RunId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

/// How the session routes keystrokes for this transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Keystrokes edit a local line; Enter submits the whole line
    LineBuffered,
    /// Every keystroke is forwarded as it is typed
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: RunId,
    pub code: String,
    pub language: String,
    pub stdin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// The remote process is up and accepting input
    Ready,
    Output { stream: OutputStream, chunk: String },
    /// The program stopped while apparently waiting for input
    InputRequested { prompt: String },
    Exited { exit_code: Option<i32> },
    /// Failure the backend reported for this run
    Error { message: String },
    /// The run never got an answer: network, timeout, undecodable body, lost socket
    RequestFailed { message: String },
}

impl TransportEventKind {
    /// Terminal event for a run that ended in `error`.
    pub fn failure(error: &TransportError) -> Self {
        let message = error.to_string();
        if error.is_request_failure() {
            TransportEventKind::RequestFailed { message }
        } else {
            TransportEventKind::Error { message }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub run_id: RunId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(run_id: RunId, kind: TransportEventKind) -> Self {
        Self { run_id, kind }
    }
}

/// Captured result of an allow-listed shell command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub returncode: Option<i32>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("HTTP error: {status} ({message})")]
    Status { status: u16, message: String },

    #[error("Execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    Decode(String),

    /// Failure reported by the backend in a successful response body
    #[error("{0}")]
    Remote(String),

    #[error("Connection to terminal server lost: {0}")]
    Disconnected(String),

    #[error("Unable to reach terminal server after {0} attempts")]
    Unreachable(u32),

    #[error("Unsupported language for live session: {0}")]
    UnsupportedLanguage(String),

    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),

    #[error("Transport channel closed")]
    ChannelClosed,
}

impl TransportError {
    /// True when no backend answer was received; `Status` and `Remote` carry one.
    pub fn is_request_failure(&self) -> bool {
        !matches!(
            self,
            TransportError::Status { .. } | TransportError::Remote(_)
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Begin a run. Completion and output are reported as events.
    async fn start(&self, request: RunRequest) -> Result<(), TransportError>;

    /// Open a plain interactive shell instead of running editor code.
    async fn start_shell(&self, run_id: RunId) -> Result<(), TransportError> {
        let _ = run_id;
        Err(TransportError::Unsupported("Interactive shell"))
    }

    async fn send_input(&self, chunk: &str) -> Result<(), TransportError>;

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), TransportError>;

    /// Abort the current run. No further events are emitted for it.
    async fn kill(&self) -> Result<(), TransportError>;
}

/// Runs allow-listed shell commands for the command lane.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute_command(&self, command: &str) -> Result<CommandOutput, TransportError>;
}

/// `http://host` -> `ws://host`, `https://host` -> `wss://host`.
pub fn http_to_ws_url(http_url: &str) -> String {
    if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if http_url.starts_with("ws://") || http_url.starts_with("wss://") {
        http_url.to_string()
    } else {
        format!("ws://{http_url}")
    }
}
