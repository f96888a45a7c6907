//! Concurrent map of task id to latest status.
//!
//! Written by the submission path and by every worker; read by status
//! queries. Each entry is replaced under the shard lock, so readers never
//! observe a half-updated record.

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::status::{StatusEntry, StatusUpdate, TaskState};
use crate::task::TaskId;

#[derive(Debug, Default)]
pub struct StatusLedger {
    entries: DashMap<TaskId, StatusEntry>,
}

impl StatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as QUEUED.
    ///
    /// Fails with the current state if the id is still queued or running.
    /// Ids in a terminal state are reset and may be processed again.
    pub fn register(&self, id: &TaskId) -> Result<(), TaskState> {
        match self.entries.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get().state;
                if !state.is_terminal() {
                    return Err(state);
                }
                occupied.insert(StatusEntry::queued(id.clone()));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StatusEntry::queued(id.clone()));
            }
        }
        Ok(())
    }

    /// Apply `update` to `id`. Last write wins.
    pub fn set(&self, id: &TaskId, update: StatusUpdate) {
        let mut entry = self
            .entries
            .entry(id.clone())
            .or_insert_with(|| StatusEntry::queued(id.clone()));
        entry.state = update.state;
        entry.message = update.message;
        entry.detail = update.detail;
        entry.updated_at = Utc::now();
        tracing::debug!(task_id = %id, state = %update.state, "Status updated");
    }

    /// Latest entry for `id`, or `None` if it was never registered.
    pub fn get(&self, id: &TaskId) -> Option<StatusEntry> {
        self.entries.get(id).map(|entry| entry.clone())
    }

    /// Remove an entry that never made it onto the queue.
    pub(crate) fn forget(&self, id: &TaskId) {
        self.entries.remove(id);
    }

    pub fn snapshot(&self) -> Vec<StatusEntry> {
        let mut all: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        all
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unknown_id_is_none() {
        let ledger = StatusLedger::new();
        assert!(ledger.get(&TaskId::new("never-submitted")).is_none());
    }

    #[test]
    fn register_then_progress() {
        let ledger = StatusLedger::new();
        let id = TaskId::new("a");
        ledger.register(&id).unwrap();
        assert_eq!(ledger.get(&id).unwrap().state, TaskState::Queued);

        ledger.set(&id, StatusUpdate::running());
        ledger.set(&id, StatusUpdate::failed("could not find file: x.zip"));

        let entry = ledger.get(&id).unwrap();
        assert_eq!(entry.state, TaskState::Failed);
        assert_eq!(entry.message.as_deref(), Some("could not find file: x.zip"));
        assert!(entry.updated_at >= entry.submitted_at);
    }

    #[test]
    fn register_rejects_active_and_resets_terminal() {
        let ledger = StatusLedger::new();
        let id = TaskId::new("a");
        ledger.register(&id).unwrap();
        assert_eq!(ledger.register(&id), Err(TaskState::Queued));

        ledger.set(&id, StatusUpdate::running());
        assert_eq!(ledger.register(&id), Err(TaskState::Running));

        ledger.set(&id, StatusUpdate::succeeded(serde_json::json!({})));
        ledger.register(&id).unwrap();
        let entry = ledger.get(&id).unwrap();
        assert_eq!(entry.state, TaskState::Queued);
        assert!(entry.detail.is_none());
    }

    #[test]
    fn counts_by_state() {
        let ledger = StatusLedger::new();
        for name in ["a", "b", "c"] {
            ledger.register(&TaskId::new(name)).unwrap();
        }
        ledger.set(&TaskId::new("b"), StatusUpdate::running());

        assert_eq!(ledger.count(TaskState::Queued), 2);
        assert_eq!(ledger.count(TaskState::Running), 1);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.snapshot().len(), 3);
    }

    #[test]
    fn concurrent_writers_leave_one_complete_entry() {
        let ledger = Arc::new(StatusLedger::new());
        let id = TaskId::new("shared");
        ledger.register(&id).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        ledger.set(&id, StatusUpdate::failed(format!("writer {i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entry = ledger.get(&id).unwrap();
        assert_eq!(entry.state, TaskState::Failed);
        assert!(entry.message.unwrap().starts_with("writer "));
    }
}
