use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use editlog_engine::{IndexError, SearchDocument, SearchIndex};
use editlog_storage::{ActivityDescriptor, ActivityLog, SqliteActivityLog, StorageError, UnitOfWork};

/// Keeps every upserted document in call order.
#[derive(Debug, Default)]
pub struct RecordingSearchIndex {
    documents: Mutex<Vec<SearchDocument>>,
}

impl RecordingSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<SearchDocument> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn upsert_count(&self) -> usize {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl SearchIndex for RecordingSearchIndex {
    fn upsert(&self, document: &SearchDocument) -> Result<(), IndexError> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(document.clone());
        Ok(())
    }
}

/// Rejects every upsert.
#[derive(Debug, Default)]
pub struct FailingSearchIndex {
    attempts: AtomicUsize,
}

impl FailingSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SearchIndex for FailingSearchIndex {
    fn upsert(&self, document: &SearchDocument) -> Result<(), IndexError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(IndexError(format!("index offline, dropped game {}", document.id)))
    }
}

/// Writes through to the activities table until call number `fail_on`
/// (1-based), which fails.
#[derive(Debug)]
pub struct FailingActivityLog {
    fail_on: usize,
    calls: AtomicUsize,
}

impl FailingActivityLog {
    pub fn failing_on(fail_on: usize) -> Self {
        Self {
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ActivityLog for FailingActivityLog {
    fn record(
        &self,
        descriptor: &ActivityDescriptor,
        uow: &mut UnitOfWork<'_>,
    ) -> Result<(), StorageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StorageError::ConstraintViolation(format!(
                "activity log rejected entry {call}"
            )));
        }
        SqliteActivityLog.record(descriptor, uow)
    }
}
