//! Shell-style command history with a recall cursor.
//!
//! Entries are kept most-recent-first. The cursor is `None` while the user is
//! editing free text and `Some(i)` while viewing entry `i`; "older" moves the
//! cursor towards the end of the list, "newer" back towards the head.

/// Default number of entries retained.
pub const DEFAULT_HISTORY_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct HistoryNavigator {
    entries: Vec<String>,
    cursor: Option<usize>,
    cap: usize,
}

impl Default for HistoryNavigator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl HistoryNavigator {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            cap: cap.max(1),
        }
    }

    /// Restore a persisted history (already most-recent-first), applying the cap.
    pub fn from_entries(mut entries: Vec<String>, cap: usize) -> Self {
        let cap = cap.max(1);
        entries.truncate(cap);
        Self {
            entries,
            cursor: None,
            cap,
        }
    }

    /// Record a submitted command. A repeat of the current head is dropped.
    /// Returns whether the history changed.
    pub fn push(&mut self, command: &str) -> bool {
        if self.entries.first().is_some_and(|head| head == command) {
            return false;
        }
        self.entries.insert(0, command.to_string());
        self.entries.truncate(self.cap);
        true
    }

    /// Step to the next older entry. Stays put at the oldest entry.
    pub fn older(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let next = match self.cursor {
            None => 0,
            Some(i) if i + 1 < self.entries.len() => i + 1,
            Some(i) => i,
        };
        self.cursor = Some(next);
        self.entries.get(next).map(String::as_str)
    }

    /// Step to the next newer entry. From the newest entry this leaves
    /// navigation and yields an empty buffer; when not navigating it does
    /// nothing and returns `None`.
    pub fn newer(&mut self) -> Option<&str> {
        match self.cursor {
            None => None,
            Some(0) => {
                self.cursor = None;
                Some("")
            }
            Some(i) => {
                self.cursor = Some(i - 1);
                self.entries.get(i - 1).map(String::as_str)
            }
        }
    }

    pub fn reset(&mut self) {
        self.cursor = None;
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
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

    pub fn cap(&self) -> usize {
        self.cap
    }
}
