//! Fixed-capacity history of focus-call transitions.

use std::{collections::VecDeque, io};

use chrono::{DateTime, Local};

/// Marker recorded when the focus call is cleared after having been set.
pub(crate) const NO_FOCUS_CALL: &str = "<none>";

struct HistoryEntry {
    at: DateTime<Local>,
    line: String,
}

/// Ring of timestamped focus transitions. Oldest entries are evicted first.
pub(crate) struct FocusHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl FocusHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a transition to the named focus call (or [`NO_FOCUS_CALL`]).
    pub(crate) fn record(&mut self, line: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            at: Local::now(),
            line,
        });
    }

    /// Write the ring oldest-first, one `MM-dd HH:mm:ss.SSS - <id>` line each.
    pub(crate) fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        for entry in &self.entries {
            writeln!(w, "{} - {}", entry.at.format("%m-%d %H:%M:%S%.3f"), entry.line)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn lines(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.line.as_str()).collect()
    }
}
