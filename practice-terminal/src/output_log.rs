//! Output Log - append-only display list of rendered terminal lines
//!
//! Renderers subscribe to [`LogEvent`]s; every append is one event, which the
//! renderer answers by drawing the line and scrolling to the newest entry.

use std::collections::VecDeque;

use shared_types::{OutputKind, OutputLine};
use tokio::sync::broadcast;

pub const DEFAULT_MAX_LINES: usize = 5000;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub fn default_welcome() -> Vec<String> {
    vec![
        "Welcome to Problem Generator Terminal".to_string(),
        "This terminal only accepts input when running a program.".to_string(),
        "The code editor will use this terminal for input/output.".to_string(),
        String::new(),
    ]
}

/// Change notification for renderers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Appended(OutputLine),
    /// The log was emptied; the welcome banner follows as `Appended` events
    Cleared,
}

pub struct OutputLog {
    lines: VecDeque<OutputLine>,
    max_lines: usize,
    welcome: Vec<String>,
    events: broadcast::Sender<LogEvent>,
}

impl OutputLog {
    /// Create a log showing the welcome banner. `max_lines` of zero means unbounded.
    pub fn new(welcome: Vec<String>, max_lines: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut log = Self {
            lines: VecDeque::new(),
            max_lines,
            welcome,
            events,
        };
        log.append_welcome();
        log
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    /// Append a line at the end, evicting the oldest line past the cap.
    pub fn append(&mut self, text: impl Into<String>, kind: OutputKind) -> &OutputLine {
        let line = OutputLine::new(text, kind);
        // No subscribers is fine, the log is still the source of truth.
        let _ = self.events.send(LogEvent::Appended(line.clone()));
        self.lines.push_back(line);
        if self.max_lines > 0 {
            while self.lines.len() > self.max_lines {
                self.lines.pop_front();
            }
        }
        // Just pushed, so back() is populated.
        &self.lines[self.lines.len() - 1]
    }

    /// Empty the log and re-append the welcome banner.
    pub fn clear(&mut self) {
        self.lines.clear();
        let _ = self.events.send(LogEvent::Cleared);
        self.append_welcome();
    }

    fn append_welcome(&mut self) {
        let welcome = self.welcome.clone();
        for text in welcome {
            self.append(text, OutputKind::Welcome);
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &OutputLine> {
        self.lines.iter()
    }

    pub fn snapshot(&self) -> Vec<OutputLine> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn count_kind(&self, kind: OutputKind) -> usize {
        self.lines.iter().filter(|line| line.kind == kind).count()
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new(default_welcome(), DEFAULT_MAX_LINES)
    }
}
