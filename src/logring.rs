//! Newest-first ring buffer of timestamped gateway log lines.
//!
//! This is the browser-visible protocol trace (`TX:`/`RX:` lines and link
//! lifecycle events), separate from the `tracing` output. Entries are pushed
//! to the front so `GET /state` returns the most recent line first; the
//! oldest line falls off the back when the buffer is full.

use std::collections::VecDeque;

use chrono::Local;

/// Fixed-capacity log of `[HH:MM:SS] <line>` strings, newest first.
pub struct LogRing {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Timestamp and record a line, evicting the oldest at capacity.
    pub fn push(&mut self, line: &str) {
        let stamped = format!("[{}] {line}", Local::now().format("%H:%M:%S"));
        if self.lines.len() >= self.capacity {
            self.lines.pop_back();
        }
        self.lines.push_front(stamped);
    }

    /// All retained lines, newest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
