//! Input history

use kernel_protocol::content::{HistoryEntry, HistoryRequest};
use parking_lot::RwLock;

/// Session number reported for entries from this process
const CURRENT_SESSION: i64 = 0;

#[derive(Debug, Default)]
pub struct HistoryStore {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, line: u64, input: &str) {
        self.entries
            .write()
            .push(HistoryEntry(CURRENT_SESSION, line, input.to_string()));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The last `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read();
        entries[entries.len().saturating_sub(n)..].to_vec()
    }

    /// Entries with `start <= line < stop`; no `stop` means up to the newest
    pub fn range(&self, start: u64, stop: Option<u64>) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .iter()
            .filter(|HistoryEntry(_, line, _)| {
                *line >= start && stop.is_none_or(|stop| *line < stop)
            })
            .cloned()
            .collect()
    }

    /// Answer a `history_request`. Access types other than `tail` and `range` yield nothing.
    pub fn query(&self, request: &HistoryRequest) -> Vec<HistoryEntry> {
        match request.hist_access_type.as_str() {
            "tail" => self.tail(request.n.unwrap_or(usize::MAX)),
            "range" => self.range(request.start.unwrap_or(0), request.stop),
            _ => Vec::new(),
        }
    }
}
