//! Bounded circular log of per-stream events.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::TargetKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub detail: Option<String>,
    pub key: TargetKey,
}

impl LogEntry {
    pub fn new(key: TargetKey, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            detail: None,
            key,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Fixed-capacity ring that overwrites its oldest entry when full.
#[derive(Debug)]
pub struct LogRingBuffer {
    slots: Vec<Option<LogEntry>>,
    head: usize,
    wrapped: bool,
}

impl LogRingBuffer {
    /// A ring holding `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            head: 0,
            wrapped: false,
        }
    }

    /// Insert an entry in O(1), evicting the oldest when full.
    pub fn add(&mut self, entry: LogEntry) {
        self.slots[self.head] = Some(entry);
        self.head = (self.head + 1) % self.slots.len();
        if self.head == 0 {
            self.wrapped = true;
        }
    }

    /// All entries, oldest first.
    pub fn all_entries(&self) -> Vec<LogEntry> {
        let (older, newer) = if self.wrapped {
            (&self.slots[self.head..], &self.slots[..self.head])
        } else {
            (&self.slots[..0], &self.slots[..self.head])
        };
        older.iter().chain(newer).flatten().cloned().collect()
    }

    /// Up to `n` entries, newest first. `n == 0` returns everything.
    pub fn recent_entries(&self, n: usize) -> Vec<LogEntry> {
        let mut entries = self.all_entries();
        entries.reverse();
        if n > 0 {
            entries.truncate(n);
        }
        entries
    }

    /// Entries owned by `key`, oldest first.
    pub fn entries_for_key(&self, key: &TargetKey) -> Vec<LogEntry> {
        self.all_entries().into_iter().filter(|e| &e.key == key).collect()
    }

    pub fn len(&self) -> usize {
        if self.wrapped {
            self.slots.len()
        } else {
            self.head
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Which entries a log query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogScope<'a> {
    Global,
    Key(&'a TargetKey),
}

/// The log ring shared between probe tasks and the render loop.
#[derive(Debug)]
pub struct SharedLog {
    ring: Mutex<LogRingBuffer>,
}

impl SharedLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(LogRingBuffer::new(capacity)),
        }
    }

    pub fn add(&self, entry: LogEntry) {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).add(entry);
    }

    /// Up to `n` newest entries in `scope`, newest first. `n == 0` means all.
    pub fn recent_logs(&self, scope: LogScope<'_>, n: usize) -> Vec<LogEntry> {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        match scope {
            LogScope::Global => ring.recent_entries(n),
            LogScope::Key(key) => {
                let mut entries = ring.entries_for_key(key);
                entries.reverse();
                if n > 0 {
                    entries.truncate(n);
                }
                entries
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
