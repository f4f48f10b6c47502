//! Practice Terminal - interactive terminal session for the coding-practice app
//!
//! A line editor with history, an append-only output log, and a session
//! controller that drives program runs through either a request/response
//! backend or a live duplex channel to a remote pseudo-terminal.

pub mod actor;
pub mod code;
pub mod commands;
pub mod config;
pub mod line_editor;
pub mod output_log;
pub mod session;
pub mod transport;

pub use actor::{TerminalActor, TerminalArguments, TerminalMsg};
pub use output_log::{LogEvent, OutputLog};
pub use session::{CommandCompletion, Key, SessionState, TerminalSession, TerminalSnapshot};
pub use transport::{RunId, Transport, TransportError, TransportEvent, TransportEventKind};
