use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Text { text: String },
    Result { result: Value },
    Error { context: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub seq: u64,
    #[serde(flatten)]
    pub entry: LogEntry,
}

#[derive(Debug)]
struct LogState {
    next_seq: u64,
    records: VecDeque<LogRecord>,
}

/// Append-only record of call results, event deliveries and failures.
///
/// Sequence numbers start at 1 and only grow. Once `capacity` records are
/// held the oldest is evicted on every append.
#[derive(Debug)]
pub struct InteractionLog {
    capacity: usize,
    state: Mutex<LogState>,
}

impl InteractionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(LogState {
                next_seq: 1,
                records: VecDeque::with_capacity(capacity.min(1024)),
            }),
        }
    }

    pub fn append(&self, entry: LogEntry) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = state.next_seq;
        state.next_seq += 1;

        if state.records.len() == self.capacity {
            state.records.pop_front();
        }
        state.records.push_back(LogRecord { seq, entry });
        seq
    }

    pub fn text(&self, text: impl Into<String>) -> u64 {
        self.append(LogEntry::Text { text: text.into() })
    }

    pub fn result(&self, result: Value) -> u64 {
        self.append(LogEntry::Result { result })
    }

    pub fn error(&self, context: impl Into<String>, error: impl Display) -> u64 {
        self.append(LogEntry::Error {
            context: context.into(),
            error: error.to_string(),
        })
    }

    /// The sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_seq
    }

    /// Retained records with `seq >= since`, oldest first.
    pub fn entries_since(&self, since: u64) -> Vec<LogRecord> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .records
            .iter()
            .filter(|record| record.seq >= since)
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> Vec<LogRecord> {
        self.entries_since(0)
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }
}
