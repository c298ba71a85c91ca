use chrono::{DateTime, Utc};
use dashmap::DashMap;
use remedy_core::record::RecordId;
use std::sync::Arc;

/// Immutable pre-application file state, kept until the owning record
/// either passes its grace period or is rolled back.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub content: String,
    pub taken_at: DateTime<Utc>,
}

/// Arena of pre-state blobs keyed by application record id. Restore is a
/// pure overwrite from the stored blob, never a diff replay, so restoring
/// twice yields byte-identical results.
#[derive(Default)]
pub struct SnapshotStore {
    blobs: DashMap<RecordId, Arc<Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self, record_id: RecordId, content: String) {
        self.blobs.insert(
            record_id,
            Arc::new(Snapshot {
                content,
                taken_at: Utc::now(),
            }),
        );
    }

    pub fn get(&self, record_id: &RecordId) -> Option<Arc<Snapshot>> {
        self.blobs.get(record_id).map(|e| Arc::clone(e.value()))
    }

    pub fn discard(&self, record_id: &RecordId) {
        self.blobs.remove(record_id);
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}
