//! Shared conversation log rendered by the UI and fed by the network loops.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub sender: String,
    pub text: String,
    /// True when the line was produced on this side of the connection.
    pub local: bool,
}

impl ChatEntry {
    pub fn new(sender: impl Into<String>, text: impl Into<String>, local: bool) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            local,
        }
    }
}

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<ChatEntry>,
    epoch: u64,
}

/// Append-only chat history guarded by a single lock.
///
/// Appends, snapshots and clears are mutually exclusive, so a snapshot is
/// always the exact prefix of appends that completed before it and a clear
/// is strictly ordered against every append.
#[derive(Debug, Default)]
pub struct ConversationLog {
    state: Mutex<LogState>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, sender: impl Into<String>, text: impl Into<String>, local: bool) {
        let entry = ChatEntry::new(sender, text, local);
        self.lock().entries.push(entry);
    }

    pub fn snapshot(&self) -> Vec<ChatEntry> {
        self.lock().entries.clone()
    }

    /// Snapshot plus the number of clears seen so far, read under one lock.
    pub fn snapshot_with_epoch(&self) -> (u64, Vec<ChatEntry>) {
        let state = self.lock();
        (state.epoch, state.entries.clone())
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    // No critical section leaves the entries half-written; poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
