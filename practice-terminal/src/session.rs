//! Session Controller - the terminal's run/input state machine
//!
//! `Idle -> Running -> Idle`, with the lock as an independent gate over all
//! keyboard input. Every path out of `Running` (completion, stop, transport
//! error) goes through [`TerminalSession::end_run`], so a user-visible failure
//! never leaves the session running.
//!
//! Allow-listed commands run on their own task; the result comes back as a
//! [`CommandCompletion`] and the terminal ignores keys until it does.

use std::sync::Arc;

use shared_types::{OutputKind, OutputLine};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::code::CodeProvider;
use crate::commands::CommandPolicy;
use crate::line_editor::{CursorMove, LineEditor, Recall};
use crate::output_log::{LogEvent, OutputLog};
use crate::transport::{
    CommandExecutor, CommandOutput, OutputStream, RunId, RunRequest, Transport, TransportError,
    TransportEvent, TransportEventKind, TransportMode,
};

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

const ACCEPTING_INPUT_BANNER: &str = "Program is running. Terminal is now accepting input...";
const COMPLETED_BANNER: &str = "Program execution completed. Terminal is now read-only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// A keyboard event as the host reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    Left,
    Right,
    Up,
    Down,
    /// Ctrl-C
    Interrupt,
}

impl Key {
    /// Bytes a pseudo-terminal expects for this key.
    pub fn terminal_sequence(self) -> String {
        match self {
            Key::Char(c) => c.to_string(),
            Key::Enter => "\r".to_string(),
            Key::Backspace => "\x7f".to_string(),
            Key::Left => "\x1b[D".to_string(),
            Key::Right => "\x1b[C".to_string(),
            Key::Up => "\x1b[A".to_string(),
            Key::Down => "\x1b[B".to_string(),
            Key::Interrupt => "\x03".to_string(),
        }
    }
}

/// Allow-listed shell commands accepted while no program runs
#[derive(Clone)]
pub struct CommandLane {
    pub policy: CommandPolicy,
    pub executor: Arc<dyn CommandExecutor>,
}

/// Answer to a command dispatched by [`TerminalSession`]
#[derive(Debug)]
pub struct CommandCompletion {
    seq: u64,
    pub command: String,
    pub result: Result<CommandOutput, TransportError>,
}

/// Point-in-time view of a session for renderers and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSnapshot {
    pub state: SessionState,
    pub locked: bool,
    /// A shell command is out and its answer has not arrived
    pub command_pending: bool,
    pub accepts_input: bool,
    pub input: String,
    pub cursor: usize,
    pub history: Vec<String>,
    pub lines: Vec<OutputLine>,
}

pub struct TerminalSession {
    log: OutputLog,
    editor: LineEditor,
    state: SessionState,
    locked: bool,
    transport: Arc<dyn Transport>,
    code: Arc<dyn CodeProvider>,
    commands: Option<CommandLane>,
    completions_tx: mpsc::UnboundedSender<CommandCompletion>,
    completions_rx: Option<mpsc::UnboundedReceiver<CommandCompletion>>,
    pending_command: Option<(u64, JoinHandle<()>)>,
    command_seq: u64,
    current_run: Option<RunId>,
    /// Streaming runs take input only after the transport confirms start
    awaiting_ready: bool,
    saw_output: bool,
    cols: u16,
    rows: u16,
}

impl TerminalSession {
    pub fn new(transport: Arc<dyn Transport>, code: Arc<dyn CodeProvider>, log: OutputLog) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            log,
            editor: LineEditor::new(),
            state: SessionState::Idle,
            locked: false,
            transport,
            code,
            commands: None,
            completions_tx,
            completions_rx: Some(completions_rx),
            pending_command: None,
            command_seq: 0,
            current_run: None,
            awaiting_ready: false,
            saw_output: false,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }

    /// Accept allow-listed shell commands while idle.
    pub fn with_command_lane(
        mut self,
        policy: CommandPolicy,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        self.commands = Some(CommandLane { policy, executor });
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn current_run(&self) -> Option<RunId> {
        self.current_run
    }

    pub fn log(&self) -> &OutputLog {
        &self.log
    }

    pub fn editor(&self) -> &LineEditor {
        &self.editor
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<LogEvent> {
        self.log.subscribe()
    }

    /// Receiver for dispatched command results; the owner feeds each one back
    /// through [`TerminalSession::finish_command`]. Available once.
    pub fn take_command_completions(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<CommandCompletion>> {
        self.completions_rx.take()
    }

    pub fn command_pending(&self) -> bool {
        self.pending_command.is_some()
    }

    pub fn accepts_input(&self) -> bool {
        if self.locked {
            return false;
        }
        match self.state {
            SessionState::Running => !self.awaiting_ready,
            SessionState::Idle => {
                self.commands.is_some()
                    && self.pending_command.is_none()
                    && self.transport.mode() == TransportMode::LineBuffered
            }
        }
    }

    pub fn snapshot(&self) -> TerminalSnapshot {
        TerminalSnapshot {
            state: self.state,
            locked: self.locked,
            command_pending: self.command_pending(),
            accepts_input: self.accepts_input(),
            input: self.editor.buffer().to_string(),
            cursor: self.editor.cursor(),
            history: self.editor.history().iter().map(ToString::to_string).collect(),
            lines: self.log.snapshot(),
        }
    }

    // ------------------------------------------------------------------------
    // Keyboard
    // ------------------------------------------------------------------------

    pub async fn handle_key(&mut self, key: Key) {
        if !self.accepts_input() {
            tracing::trace!(?key, "Ignoring key, terminal not accepting input");
            return;
        }

        match self.transport.mode() {
            TransportMode::Streaming => {
                if let Err(e) = self.transport.send_input(&key.terminal_sequence()).await {
                    self.abandon_run(e.to_string());
                }
            }
            TransportMode::LineBuffered => match key {
                Key::Char(c) if !c.is_control() => self.editor.insert_char(c),
                Key::Char(_) => {}
                Key::Backspace => {
                    self.editor.backspace();
                }
                Key::Left => self.editor.move_cursor(CursorMove::Left),
                Key::Right => self.editor.move_cursor(CursorMove::Right),
                Key::Up => self.editor.recall(Recall::Older),
                Key::Down => self.editor.recall(Recall::Newer),
                Key::Interrupt => self.editor.discard(),
                Key::Enter => self.submit_line().await,
            },
        }
    }

    async fn submit_line(&mut self) {
        let Some(line) = self.editor.submit() else {
            return;
        };

        match self.state {
            SessionState::Running => {
                self.log.append(line.clone(), OutputKind::CommandEcho);
                if let Err(e) = self.transport.send_input(&format!("{line}\n")).await {
                    self.abandon_run(e.to_string());
                }
            }
            SessionState::Idle => self.run_command(line),
        }
    }

    fn run_command(&mut self, line: String) {
        let Some(lane) = self.commands.clone() else {
            return;
        };

        if line.trim().eq_ignore_ascii_case("clear") {
            self.clear();
            return;
        }

        self.log.append(format!("$ {line}"), OutputKind::CommandEcho);
        if let Err(rejected) = lane.policy.check(&line) {
            tracing::info!(command = %rejected.command, "Rejected command outside allow-list");
            self.log.append(rejected.to_string(), OutputKind::Error);
            self.log.append(
                format!("Allowed commands: {}", lane.policy.describe()),
                OutputKind::System,
            );
            return;
        }

        self.command_seq += 1;
        let seq = self.command_seq;
        let command = line.trim().to_string();
        let executor = lane.executor;
        let completions = self.completions_tx.clone();
        tracing::debug!(%command, "Dispatching command");
        let task = tokio::spawn(async move {
            let result = executor.execute_command(&command).await;
            let _ = completions.send(CommandCompletion {
                seq,
                command,
                result,
            });
        });
        self.pending_command = Some((seq, task));
    }

    /// Show the answer to the pending command and reopen the input gate.
    pub fn finish_command(&mut self, completion: CommandCompletion) {
        match self.pending_command.take() {
            Some((seq, _)) if seq == completion.seq => {}
            other => {
                self.pending_command = other;
                tracing::debug!(command = %completion.command, "Dropping answer to a cancelled command");
                return;
            }
        }

        match completion.result {
            Ok(output) => {
                if !output.stdout.trim().is_empty() {
                    self.log.append(output.stdout.trim_end(), OutputKind::Stdout);
                }
                if !output.stderr.trim().is_empty() {
                    self.log.append(output.stderr.trim_end(), OutputKind::Stderr);
                }
                if let Some(code) = output.returncode.filter(|code| *code != 0) {
                    self.log
                        .append(format!("Command exited with code {code}"), OutputKind::System);
                }
            }
            Err(e) => {
                tracing::warn!(command = %completion.command, error = %e, "Command execution failed");
                self.log.append(format!("Error: {e}"), OutputKind::Error);
            }
        }
    }

    /// Drop the pending command; its answer, if it still arrives, is ignored.
    pub fn cancel_command(&mut self) {
        if let Some((_, task)) = self.pending_command.take() {
            task.abort();
            tracing::info!("Cancelled pending command");
        }
    }

    // ------------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------------

    /// Run the code the host currently has in its editor.
    pub async fn start_run(&mut self) {
        let code = self.code.code();
        if code.trim().is_empty() {
            self.log.append("No code to run!", OutputKind::Error);
            return;
        }
        let language = self.code.language();

        let run_id = self.begin_run(format!("Running {language} code...")).await;
        let request = RunRequest {
            run_id,
            code,
            language,
            stdin: String::new(),
        };
        if let Err(e) = self.transport.start(request).await {
            self.abandon_run(e.to_string());
        }
    }

    /// Open an interactive shell on the remote side.
    pub async fn start_shell(&mut self) {
        let run_id = self.begin_run("Starting shell...".to_string()).await;
        if let Err(e) = self.transport.start_shell(run_id).await {
            self.abandon_run(e.to_string());
        }
    }

    /// User-initiated stop of the current run.
    pub async fn stop_run(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        if let Err(e) = self.transport.kill().await {
            tracing::warn!(error = %e, "Failed to kill run");
        }
        self.end_run("Program stopped. Terminal is now read-only.");
    }

    async fn begin_run(&mut self, banner: String) -> RunId {
        self.cancel_command();
        if self.state == SessionState::Running {
            // The old run must be gone before the next start reaches the transport.
            if let Err(e) = self.transport.kill().await {
                tracing::warn!(error = %e, "Failed to kill previous run");
            }
            if let Some(previous) = self.current_run.take() {
                tracing::info!(run_id = %previous, "Replaced running program");
            }
        }

        self.log.clear();
        self.log.append(banner, OutputKind::System);

        let run_id = RunId::new();
        self.current_run = Some(run_id);
        self.state = SessionState::Running;
        self.editor.discard();
        self.saw_output = false;
        self.awaiting_ready = self.transport.mode() == TransportMode::Streaming;
        if !self.awaiting_ready {
            self.log.append(ACCEPTING_INPUT_BANNER, OutputKind::System);
        }
        tracing::info!(%run_id, "Run started");
        run_id
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.current_run != Some(event.run_id) {
            tracing::debug!(run_id = %event.run_id, "Dropping event from a stale run");
            return;
        }

        match event.kind {
            TransportEventKind::Ready => {
                if !self.awaiting_ready {
                    return;
                }
                self.awaiting_ready = false;
                self.log.append(ACCEPTING_INPUT_BANNER, OutputKind::System);
                if let Err(e) = self.transport.resize(self.cols, self.rows).await {
                    tracing::warn!(error = %e, "Failed to send initial terminal size");
                }
            }
            TransportEventKind::Output { stream, chunk } => {
                if chunk.is_empty() {
                    return;
                }
                self.saw_output = true;
                let kind = match stream {
                    OutputStream::Stdout => OutputKind::Stdout,
                    OutputStream::Stderr => OutputKind::Stderr,
                };
                self.log.append(chunk, kind);
            }
            TransportEventKind::InputRequested { prompt } => {
                let prompt = if prompt.trim().is_empty() {
                    String::new()
                } else {
                    format!(" ({})", prompt.trim())
                };
                self.log.append(
                    format!("Program is waiting for input{prompt}. Type your input and run again."),
                    OutputKind::System,
                );
            }
            TransportEventKind::Exited { exit_code } => {
                if !self.saw_output && self.transport.mode() == TransportMode::LineBuffered {
                    self.log.append("(No output)", OutputKind::System);
                }
                match exit_code {
                    Some(code) if code != 0 => self.end_run(&format!(
                        "Program exited with code {code}. Terminal is now read-only."
                    )),
                    _ => self.end_run(COMPLETED_BANNER),
                }
            }
            TransportEventKind::Error { message } => self.fail_run(message),
            TransportEventKind::RequestFailed { message } => self.abandon_run(message),
        }
    }

    /// The backend answered with a failure.
    fn fail_run(&mut self, message: String) {
        tracing::warn!(run_id = ?self.current_run, %message, "Run failed");
        self.log.append(format!("Error: {message}"), OutputKind::Error);
        self.end_run(COMPLETED_BANNER);
    }

    /// The run never got an answer from the backend.
    fn abandon_run(&mut self, message: String) {
        tracing::warn!(run_id = ?self.current_run, %message, "Run request failed");
        self.log
            .append(format!("Error running code: {message}"), OutputKind::Error);
        self.end_run(COMPLETED_BANNER);
    }

    fn end_run(&mut self, banner: &str) {
        if let Some(run_id) = self.current_run.take() {
            tracing::info!(%run_id, "Run finished");
        }
        self.state = SessionState::Idle;
        self.awaiting_ready = false;
        self.editor.discard();
        self.log.append(banner, OutputKind::System);
    }

    // ------------------------------------------------------------------------
    // Controls
    // ------------------------------------------------------------------------

    pub fn toggle_lock(&mut self) {
        self.locked = !self.locked;
        let banner = if self.locked {
            "Terminal is now locked."
        } else {
            "Terminal is now unlocked."
        };
        self.log.append(banner, OutputKind::System);
    }

    pub fn set_lock(&mut self, locked: bool) {
        if self.locked != locked {
            self.toggle_lock();
        }
    }

    pub fn clear(&mut self) {
        self.log.clear();
    }

    pub async fn resize(&mut self, cols: u16, rows: u16) {
        // Transient 0x0 layouts from the host should not reach the remote PTY.
        self.cols = cols.max(2);
        self.rows = rows.max(2);

        if self.state == SessionState::Running
            && !self.awaiting_ready
            && self.transport.mode() == TransportMode::Streaming
        {
            if let Err(e) = self.transport.resize(self.cols, self.rows).await {
                tracing::warn!(error = %e, "Failed to resize remote terminal");
            }
        }
    }
}
