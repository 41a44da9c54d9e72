//! Ledger record types.

use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;

/// Sync state of one entity's linked-data mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    Pending,
    Synced,
    Deleted,
}

/// One row per entity that has ever been synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusRecord {
    pub entity: EntityRef,
    pub ric_uri: String,
    pub sync_status: SyncStatus,
    pub parent_id: Option<u64>,
    /// Slash-separated ancestor ids, root first, ending with the entity itself.
    pub hierarchy_path: Option<String>,
    /// Seconds since UNIX epoch.
    pub updated_at: u64,
}

/// Kind of operation recorded in the sync log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncOperation {
    Delete,
    BatchDelete,
    Move,
    HierarchyUpdate,
    Resync,
    IntegrityCheck,
    Cleanup,
    Repair,
}

impl SyncOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOperation::Delete => "delete",
            SyncOperation::BatchDelete => "batch_delete",
            SyncOperation::Move => "move",
            SyncOperation::HierarchyUpdate => "hierarchy_update",
            SyncOperation::Resync => "resync",
            SyncOperation::IntegrityCheck => "integrity_check",
            SyncOperation::Cleanup => "cleanup",
            SyncOperation::Repair => "repair",
        }
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Success,
    Failure,
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Monotonic sequence number assigned by the ledger.
    pub id: u64,
    pub operation: SyncOperation,
    /// `None` for system-wide operations (integrity checks, cleanup).
    pub entity: Option<EntityRef>,
    pub status: OperationStatus,
    /// JSON document or free-form failure message.
    pub details: Option<String>,
    pub triggered_by: String,
    pub created_at: u64,
}

/// How an orphan was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionMethod {
    IntegrityCheck,
    CleanupScan,
}

/// Lifecycle of a detected orphan: `Detected → {Cleaned | Resolved}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrphanStatus {
    Detected,
    /// Its triples were removed by the repair executor.
    Cleaned,
    /// The relational record reappeared.
    Resolved,
}

/// A linked-data resource with no relational counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanTrackingRecord {
    pub ric_uri: String,
    pub expected: EntityRef,
    pub detected_at: u64,
    pub detection_method: DetectionMethod,
    pub status: OrphanStatus,
    pub resolved_at: Option<u64>,
}
