//! Line Buffer & History - the editable input line used in line-buffered modes
//!
//! The editor itself never checks whether input is acceptable; the session
//! gates every call before it reaches here.

use std::collections::VecDeque;

/// Maximum number of submitted lines kept for recall.
pub const HISTORY_CAPACITY: usize = 50;

/// Direction for cursor movement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMove {
    Left,
    Right,
}

/// Direction for history recall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recall {
    Older,
    Newer,
}

/// Previously submitted lines, most recent first.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend an entry, evicting the oldest one at capacity.
    pub fn push(&mut self, entry: String) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_front(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

/// Editable input line with a character cursor and history recall.
///
/// `cursor` counts characters, not bytes, and always lies in
/// `0..=buffer.chars().count()`.
#[derive(Debug, Clone, Default)]
pub struct LineEditor {
    buffer: String,
    cursor: usize,
    history: History,
    /// Index into `history` while navigating, `None` on the live line
    history_index: Option<usize>,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn is_navigating_history(&self) -> bool {
        self.history_index.is_some()
    }

    fn char_len(&self) -> usize {
        self.buffer.chars().count()
    }

    fn byte_offset(&self, char_index: usize) -> usize {
        self.buffer
            .char_indices()
            .nth(char_index)
            .map(|(offset, _)| offset)
            .unwrap_or(self.buffer.len())
    }

    pub fn insert_char(&mut self, c: char) {
        let offset = self.byte_offset(self.cursor);
        self.buffer.insert(offset, c);
        self.cursor += 1;
    }

    /// Remove the character before the cursor. Returns whether anything changed.
    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let offset = self.byte_offset(self.cursor - 1);
        self.buffer.remove(offset);
        self.cursor -= 1;
        true
    }

    pub fn move_cursor(&mut self, dir: CursorMove) {
        match dir {
            CursorMove::Left => self.cursor = self.cursor.saturating_sub(1),
            CursorMove::Right => self.cursor = (self.cursor + 1).min(self.char_len()),
        }
    }

    pub fn recall(&mut self, dir: Recall) {
        match dir {
            Recall::Older => {
                let next = self.history_index.map_or(0, |i| i + 1);
                if let Some(entry) = self.history.get(next) {
                    self.buffer = entry.to_string();
                    self.history_index = Some(next);
                }
            }
            Recall::Newer => match self.history_index {
                Some(0) => {
                    self.history_index = None;
                    self.buffer.clear();
                }
                Some(i) => {
                    self.history_index = Some(i - 1);
                    self.buffer = self.history.get(i - 1).unwrap_or_default().to_string();
                }
                None => {}
            },
        }
        self.cursor = self.char_len();
    }

    /// Take the current line, recording it in history.
    ///
    /// Returns `None` and leaves everything untouched when the line is empty or
    /// whitespace-only.
    pub fn submit(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.history.push(line.clone());
        self.cursor = 0;
        self.history_index = None;
        Some(line)
    }

    /// Drop the in-flight line without touching history.
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.history_index = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_str(editor: &mut LineEditor, text: &str) {
        for c in text.chars() {
            editor.insert_char(c);
        }
    }

    #[test]
    fn test_insert_at_cursor() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "helo");
        editor.move_cursor(CursorMove::Left);
        editor.insert_char('l');
        assert_eq!(editor.buffer(), "hello");
        assert_eq!(editor.cursor(), 4);
    }

    #[test]
    fn test_backspace_at_start_is_noop() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "ab");
        editor.move_cursor(CursorMove::Left);
        editor.move_cursor(CursorMove::Left);
        assert!(!editor.backspace());
        assert_eq!(editor.buffer(), "ab");

        editor.move_cursor(CursorMove::Right);
        assert!(editor.backspace());
        assert_eq!(editor.buffer(), "b");
        assert_eq!(editor.cursor(), 0);
    }

    #[test]
    fn test_multibyte_chars_keep_cursor_in_chars() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "héllo");
        assert_eq!(editor.cursor(), 5);
        editor.move_cursor(CursorMove::Left);
        editor.move_cursor(CursorMove::Left);
        editor.move_cursor(CursorMove::Left);
        editor.backspace();
        assert_eq!(editor.buffer(), "hllo");
        assert_eq!(editor.cursor(), 1);
    }

    #[test]
    fn test_cursor_stays_in_bounds_over_mixed_edits() {
        let mut editor = LineEditor::new();
        let ops = [
            'a', '<', '<', '<', 'b', '>', '>', '>', '>', '#', '#', '#', 'c', 'd', '<', '#', '>',
            '>', 'e', '#', '#', '#', '#', '<', 'f',
        ];
        for op in ops {
            match op {
                '<' => editor.move_cursor(CursorMove::Left),
                '>' => editor.move_cursor(CursorMove::Right),
                '#' => {
                    editor.backspace();
                }
                c => editor.insert_char(c),
            }
            assert!(editor.cursor() <= editor.buffer().chars().count());
        }
        assert_eq!(editor.buffer(), "f");
    }

    #[test]
    fn test_submit_records_history_most_recent_first() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "first");
        assert_eq!(editor.submit().as_deref(), Some("first"));
        type_str(&mut editor, "second");
        assert_eq!(editor.submit().as_deref(), Some("second"));

        let entries: Vec<&str> = editor.history().iter().collect();
        assert_eq!(entries, vec!["second", "first"]);
        assert_eq!(editor.buffer(), "");
        assert_eq!(editor.cursor(), 0);
    }

    #[test]
    fn test_whitespace_submit_is_rejected() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "   ");
        assert_eq!(editor.submit(), None);
        assert!(editor.history().is_empty());
        assert_eq!(editor.buffer(), "   ");
    }

    #[test]
    fn test_history_capacity_evicts_oldest() {
        let mut editor = LineEditor::new();
        for i in 0..=HISTORY_CAPACITY {
            type_str(&mut editor, &format!("cmd {i}"));
            editor.submit();
        }
        let history = editor.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.get(0), Some("cmd 50"));
        assert_eq!(history.get(HISTORY_CAPACITY - 1), Some("cmd 1"));
    }

    #[test]
    fn test_recall_older_stops_at_oldest() {
        let mut editor = LineEditor::new();
        for cmd in ["one", "two", "three"] {
            type_str(&mut editor, cmd);
            editor.submit();
        }
        for _ in 0..10 {
            editor.recall(Recall::Older);
        }
        assert_eq!(editor.buffer(), "one");
        assert_eq!(editor.cursor(), 3);
    }

    #[test]
    fn test_recall_newer_returns_to_empty_line() {
        let mut editor = LineEditor::new();
        for cmd in ["one", "two"] {
            type_str(&mut editor, cmd);
            editor.submit();
        }
        editor.recall(Recall::Older);
        editor.recall(Recall::Older);
        assert_eq!(editor.buffer(), "one");

        editor.recall(Recall::Newer);
        assert_eq!(editor.buffer(), "two");
        editor.recall(Recall::Newer);
        assert_eq!(editor.buffer(), "");
        assert!(!editor.is_navigating_history());

        editor.recall(Recall::Newer);
        assert_eq!(editor.buffer(), "");
        assert_eq!(editor.history().len(), 2);
    }

    #[test]
    fn test_recall_on_empty_history_is_noop() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "draft");
        editor.recall(Recall::Older);
        assert_eq!(editor.buffer(), "draft");
        assert!(!editor.is_navigating_history());
    }

    #[test]
    fn test_discard_keeps_history() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "kept");
        editor.submit();
        type_str(&mut editor, "dropped");
        editor.discard();
        assert_eq!(editor.buffer(), "");
        assert_eq!(editor.history().len(), 1);
    }
}
