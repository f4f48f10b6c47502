//! Shared fakes for session and actor tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use practice_terminal::code::SharedCode;
use practice_terminal::commands::CommandPolicy;
use practice_terminal::output_log::{default_welcome, OutputLog};
use practice_terminal::session::{CommandCompletion, TerminalSession};
use practice_terminal::transport::{
    CommandExecutor, CommandOutput, RunId, RunRequest, Transport, TransportError, TransportMode,
};
use shared_types::{OutputKind, OutputLine};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(RunRequest),
    StartShell(RunId),
    SendInput(String),
    Resize(u16, u16),
    Kill,
}

/// Transport that records every call and never emits events on its own.
pub struct RecordingTransport {
    mode: TransportMode,
    calls: Mutex<Vec<Call>>,
    start_error: Mutex<Option<TransportError>>,
}

impl RecordingTransport {
    pub fn new(mode: TransportMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: Mutex::new(Vec::new()),
            start_error: Mutex::new(None),
        })
    }

    pub fn line_buffered() -> Arc<Self> {
        Self::new(TransportMode::LineBuffered)
    }

    pub fn streaming() -> Arc<Self> {
        Self::new(TransportMode::Streaming)
    }

    /// Make the next `start` fail with `error`.
    pub fn fail_next_start(&self, error: TransportError) {
        *self.start_error.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn started_runs(&self) -> Vec<RunId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Start(request) => Some(request.run_id),
                Call::StartShell(run_id) => Some(run_id),
                _ => None,
            })
            .collect()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SendInput(chunk) => Some(chunk),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn mode(&self) -> TransportMode {
        self.mode
    }

    async fn start(&self, request: RunRequest) -> Result<(), TransportError> {
        self.record(Call::Start(request));
        match self.start_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn start_shell(&self, run_id: RunId) -> Result<(), TransportError> {
        self.record(Call::StartShell(run_id));
        Ok(())
    }

    async fn send_input(&self, chunk: &str) -> Result<(), TransportError> {
        self.record(Call::SendInput(chunk.to_string()));
        Ok(())
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), TransportError> {
        self.record(Call::Resize(cols, rows));
        Ok(())
    }

    async fn kill(&self) -> Result<(), TransportError> {
        self.record(Call::Kill);
        Ok(())
    }
}

/// Command executor answering every command with a fixed result.
pub struct RecordingExecutor {
    commands: Mutex<Vec<String>>,
    result: Result<CommandOutput, TransportError>,
    delay: Duration,
}

impl RecordingExecutor {
    pub fn replying(output: CommandOutput) -> Arc<Self> {
        Self::slow(output, Duration::ZERO)
    }

    /// Answer with `output` only after `delay`.
    pub fn slow(output: CommandOutput, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            result: Ok(output),
            delay,
        })
    }

    pub fn failing(error: TransportError) -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            result: Err(error),
            delay: Duration::ZERO,
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute_command(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.commands.lock().unwrap().push(command.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

pub fn session(transport: Arc<RecordingTransport>, code: &str) -> TerminalSession {
    TerminalSession::new(
        transport,
        Arc::new(SharedCode::new(code, "python")),
        OutputLog::new(default_welcome(), 0),
    )
}

pub fn command_session(
    transport: Arc<RecordingTransport>,
    executor: Arc<RecordingExecutor>,
) -> TerminalSession {
    session(transport, "print('hi')").with_command_lane(CommandPolicy::default(), executor)
}

/// Wait for the dispatched command to answer and hand the answer back.
pub async fn settle_command(
    session: &mut TerminalSession,
    completions: &mut mpsc::UnboundedReceiver<CommandCompletion>,
) {
    let completion = timeout(Duration::from_secs(5), completions.recv())
        .await
        .expect("Timed out waiting for command answer")
        .expect("Completion channel closed");
    session.finish_command(completion);
}

pub fn texts(lines: &[OutputLine]) -> Vec<&str> {
    lines.iter().map(|line| line.text.as_str()).collect()
}

pub fn last_line(session: &TerminalSession) -> OutputLine {
    session
        .log()
        .lines()
        .last()
        .cloned()
        .expect("log is never empty")
}

pub fn kinds_after_welcome(session: &TerminalSession) -> Vec<(String, OutputKind)> {
    session
        .log()
        .lines()
        .skip(default_welcome().len())
        .map(|line| (line.text.clone(), line.kind))
        .collect()
}
