//! Per-round log with two tiers.
//!
//! A buffered log keeps its entries in memory until the round ends; they are then either
//! promoted to the global `tracing` subscriber or dropped. A direct log forwards every entry
//! as it is recorded.

use std::sync::Mutex;

use tracing::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Buffered,
    Direct,
}

#[derive(Debug, Clone)]
struct Entry {
    level: Level,
    text: String,
}

#[derive(Debug)]
pub struct RoundLog {
    name: String,
    prefix: String,
    mode: LogMode,
    entries: Mutex<Vec<Entry>>,
}

impl RoundLog {
    pub fn new(name: impl Into<String>, mode: LogMode) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            mode,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn buffered(name: impl Into<String>) -> Self {
        Self::new(name, LogMode::Buffered)
    }

    pub fn direct(name: impl Into<String>) -> Self {
        Self::new(name, LogMode::Direct)
    }

    /// Prefix prepended to every entry, e.g. `S2M/#7/BLS: `.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn trace(&self, text: impl AsRef<str>) {
        self.record(Level::TRACE, text.as_ref());
    }

    pub fn debug(&self, text: impl AsRef<str>) {
        self.record(Level::DEBUG, text.as_ref());
    }

    pub fn info(&self, text: impl AsRef<str>) {
        self.record(Level::INFO, text.as_ref());
    }

    pub fn warn(&self, text: impl AsRef<str>) {
        self.record(Level::WARN, text.as_ref());
    }

    pub fn error(&self, text: impl AsRef<str>) {
        self.record(Level::ERROR, text.as_ref());
    }

    fn record(&self, level: Level, text: &str) {
        let text = format!("{}{}", self.prefix, text);
        match self.mode {
            LogMode::Direct => emit(&self.name, level, &text),
            LogMode::Buffered => self
                .entries
                .lock()
                .expect("got lock")
                .push(Entry { level, text }),
        }
    }

    /// Number of entries still held in the buffer.
    pub fn pending(&self) -> usize {
        self.entries.lock().expect("got lock").len()
    }

    /// Replay buffered entries to the global subscriber and empty the buffer.
    pub fn promote(&self, success: bool) {
        let entries = std::mem::take(&mut *self.entries.lock().expect("got lock"));
        if entries.is_empty() {
            return;
        }
        if success {
            tracing::info!(round = %self.name, entries = entries.len(), "round details follow");
        } else {
            tracing::warn!(round = %self.name, entries = entries.len(), "failed round details follow");
        }
        for entry in entries {
            emit(&self.name, entry.level, &entry.text);
        }
    }

    /// End of round: failed rounds are always promoted, successful ones only when `expose`.
    pub fn finish(&self, success: bool, expose: bool) {
        if expose || !success {
            self.promote(success);
        } else {
            self.entries.lock().expect("got lock").clear();
        }
    }
}

fn emit(round: &str, level: Level, text: &str) {
    match level {
        Level::TRACE => tracing::trace!(round, "{}", text),
        Level::DEBUG => tracing::debug!(round, "{}", text),
        Level::INFO => tracing::info!(round, "{}", text),
        Level::WARN => tracing::warn!(round, "{}", text),
        _ => tracing::error!(round, "{}", text),
    }
}
