//! Sync ledger: durable record of sync state, operations and orphans.
//!
//! Backed by redb with three tables:
//!
//! - `sync_status`: one [`SyncStatusRecord`] per entity, keyed by `type:id`
//! - `sync_log`: append-only [`SyncLogEntry`] rows keyed by sequence number
//! - `orphan_tracking`: one [`OrphanTrackingRecord`] per orphaned URI
//!
//! Values are bincode-encoded. The engine never rewrites or deletes log
//! entries; retention is left to the operator.

pub mod record;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::entity::{EntityRef, EntityType};
use crate::error::LedgerError;
pub use record::{
    DetectionMethod, OperationStatus, OrphanStatus, OrphanTrackingRecord, SyncLogEntry,
    SyncOperation, SyncStatus, SyncStatusRecord,
};

const STATUS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_status");
const LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("sync_log");
const ORPHAN_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orphan_tracking");

/// Entries returned by [`SyncLedger::history`].
pub const HISTORY_LIMIT: usize = 50;

/// Result type for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Aggregated operation counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub total_operations: usize,
    pub by_operation: BTreeMap<SyncOperation, usize>,
    pub by_status: BTreeMap<OperationStatus, usize>,
}

/// Seconds since UNIX epoch.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn redb_err<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> LedgerError {
    move |e| LedgerError::Redb {
        message: format!("{op} failed: {e}"),
    }
}

fn encode<T: Serialize>(value: &T) -> LedgerResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| LedgerError::Serialization {
        message: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> LedgerResult<T> {
    bincode::deserialize(bytes).map_err(|e| LedgerError::Serialization {
        message: e.to_string(),
    })
}

/// ACID-durable sync ledger.
///
/// All writes go through redb transactions, which also serializes
/// concurrent writers from several engine instances in one process.
pub struct SyncLedger {
    db: Arc<Database>,
    triggered_by: String,
}

impl SyncLedger {
    /// Open or create the ledger in the given directory.
    pub fn open(data_dir: &Path) -> LedgerResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| LedgerError::Io { source: e })?;
        let db_path = data_dir.join("ric-sync.redb");
        let db = Database::create(&db_path).map_err(|e| LedgerError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;
        Self::init(db)
    }

    /// Ledger that lives only as long as the process.
    pub fn in_memory() -> LedgerResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(redb_err("create in-memory database"))?;
        Self::init(db)
    }

    fn init(db: Database) -> LedgerResult<Self> {
        let ledger = Self {
            db: Arc::new(db),
            triggered_by: "system".into(),
        };
        ledger.write(|txn| {
            txn.open_table(STATUS_TABLE).map_err(redb_err("open_table"))?;
            txn.open_table(LOG_TABLE).map_err(redb_err("open_table"))?;
            txn.open_table(ORPHAN_TABLE).map_err(redb_err("open_table"))?;
            Ok(())
        })?;
        Ok(ledger)
    }

    /// Set the `triggered_by` attribution stamped on new log entries.
    pub fn attributed_to(mut self, triggered_by: impl Into<String>) -> Self {
        self.triggered_by = triggered_by.into();
        self
    }

    pub fn triggered_by(&self) -> &str {
        &self.triggered_by
    }

    fn write<R>(&self, f: impl FnOnce(&WriteTransaction) -> LedgerResult<R>) -> LedgerResult<R> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let out = f(&txn)?;
        txn.commit().map_err(redb_err("commit"))?;
        Ok(out)
    }

    fn read<R>(&self, f: impl FnOnce(&ReadTransaction) -> LedgerResult<R>) -> LedgerResult<R> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        f(&txn)
    }

    // -----------------------------------------------------------------------
    // Sync status
    // -----------------------------------------------------------------------

    /// Current status record of an entity.
    pub fn status(&self, entity: EntityRef) -> LedgerResult<Option<SyncStatusRecord>> {
        self.read(|txn| {
            let table = txn.open_table(STATUS_TABLE).map_err(redb_err("open_table"))?;
            let bytes = table
                .get(entity.ledger_key().as_str())
                .map_err(redb_err("get"))?
                .map(|guard| guard.value().to_vec());
            bytes.map(|b| decode(&b)).transpose()
        })
    }

    /// Read-modify-write of one status record in a single transaction.
    ///
    /// `f` receives the current record and returns the record to store (if
    /// any) together with the value handed back to the caller.
    fn modify_status<R>(
        &self,
        entity: EntityRef,
        f: impl FnOnce(Option<SyncStatusRecord>) -> (Option<SyncStatusRecord>, R),
    ) -> LedgerResult<R> {
        let key = entity.ledger_key();
        self.write(|txn| {
            let mut table = txn.open_table(STATUS_TABLE).map_err(redb_err("open_table"))?;
            let existing = table
                .get(key.as_str())
                .map_err(redb_err("get"))?
                .map(|guard| guard.value().to_vec());
            let existing = existing.map(|b| decode(&b)).transpose()?;
            let (updated, out) = f(existing);
            if let Some(record) = updated {
                let bytes = encode(&record)?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(redb_err("insert"))?;
            }
            Ok(out)
        })
    }

    /// Set the sync status, creating the record if needed. Hierarchy fields
    /// of an existing record are kept.
    pub fn set_status(
        &self,
        entity: EntityRef,
        ric_uri: &str,
        sync_status: SyncStatus,
    ) -> LedgerResult<SyncStatusRecord> {
        let now = now_secs();
        self.modify_status(entity, |existing| {
            let record = match existing {
                Some(mut r) => {
                    r.sync_status = sync_status;
                    r.ric_uri = ric_uri.to_string();
                    r.updated_at = now;
                    r
                }
                None => SyncStatusRecord {
                    entity,
                    ric_uri: ric_uri.to_string(),
                    sync_status,
                    parent_id: None,
                    hierarchy_path: None,
                    updated_at: now,
                },
            };
            (Some(record.clone()), record)
        })
    }

    /// Record a successful sync together with the entity's place in the hierarchy.
    pub fn mark_synced(
        &self,
        entity: EntityRef,
        ric_uri: &str,
        parent_id: Option<u64>,
        hierarchy_path: &str,
    ) -> LedgerResult<SyncStatusRecord> {
        let record = SyncStatusRecord {
            entity,
            ric_uri: ric_uri.to_string(),
            sync_status: SyncStatus::Synced,
            parent_id,
            hierarchy_path: Some(hierarchy_path.to_string()),
            updated_at: now_secs(),
        };
        self.modify_status(entity, |_| (Some(record.clone()), record))
    }

    /// Update parent and path of an existing record. Returns `false` when the
    /// entity has never been synced.
    pub fn update_hierarchy(
        &self,
        entity: EntityRef,
        parent_id: Option<u64>,
        hierarchy_path: &str,
    ) -> LedgerResult<bool> {
        let now = now_secs();
        self.modify_status(entity, |existing| match existing {
            Some(mut r) => {
                r.parent_id = parent_id;
                r.hierarchy_path = Some(hierarchy_path.to_string());
                r.updated_at = now;
                (Some(r), true)
            }
            None => (None, false),
        })
    }

    /// All status records, optionally filtered by status and entity type.
    pub fn statuses(
        &self,
        sync_status: Option<SyncStatus>,
        entity_type: Option<EntityType>,
    ) -> LedgerResult<Vec<SyncStatusRecord>> {
        self.read(|txn| {
            let table = txn.open_table(STATUS_TABLE).map_err(redb_err("open_table"))?;
            let mut out = Vec::new();
            for entry in table.iter().map_err(redb_err("iter"))? {
                let (_, value) = entry.map_err(redb_err("iter"))?;
                let record: SyncStatusRecord = decode(value.value())?;
                if sync_status.is_some_and(|s| s != record.sync_status) {
                    continue;
                }
                if entity_type.is_some_and(|t| t != record.entity.entity_type) {
                    continue;
                }
                out.push(record);
            }
            Ok(out)
        })
    }

    // -----------------------------------------------------------------------
    // Sync log
    // -----------------------------------------------------------------------

    /// Append an operation to the log.
    pub fn append(
        &self,
        operation: SyncOperation,
        entity: Option<EntityRef>,
        status: OperationStatus,
        details: Option<String>,
    ) -> LedgerResult<SyncLogEntry> {
        self.write(|txn| {
            let mut table = txn.open_table(LOG_TABLE).map_err(redb_err("open_table"))?;
            let id = table
                .last()
                .map_err(redb_err("last"))?
                .map(|(key, _)| key.value() + 1)
                .unwrap_or(1);
            let entry = SyncLogEntry {
                id,
                operation,
                entity,
                status,
                details,
                triggered_by: self.triggered_by.clone(),
                created_at: now_secs(),
            };
            let bytes = encode(&entry)?;
            table
                .insert(id, bytes.as_slice())
                .map_err(redb_err("insert"))?;
            Ok(entry)
        })
    }

    /// Every log entry, oldest first.
    pub fn entries(&self) -> LedgerResult<Vec<SyncLogEntry>> {
        self.read(|txn| {
            let table = txn.open_table(LOG_TABLE).map_err(redb_err("open_table"))?;
            let mut out = Vec::new();
            for entry in table.iter().map_err(redb_err("iter"))? {
                let (_, value) = entry.map_err(redb_err("iter"))?;
                out.push(decode(value.value())?);
            }
            Ok(out)
        })
    }

    /// The most recent [`HISTORY_LIMIT`] entries for one entity, newest first.
    pub fn history(&self, entity: EntityRef) -> LedgerResult<Vec<SyncLogEntry>> {
        self.read(|txn| {
            let table = txn.open_table(LOG_TABLE).map_err(redb_err("open_table"))?;
            let mut out = Vec::new();
            for entry in table.iter().map_err(redb_err("iter"))?.rev() {
                let (_, value) = entry.map_err(redb_err("iter"))?;
                let log: SyncLogEntry = decode(value.value())?;
                if log.entity == Some(entity) {
                    out.push(log);
                    if out.len() == HISTORY_LIMIT {
                        break;
                    }
                }
            }
            Ok(out)
        })
    }

    /// Operation counts, optionally only for entries created at or after `since`.
    pub fn stats(&self, since: Option<u64>) -> LedgerResult<SyncStats> {
        let mut stats = SyncStats::default();
        for entry in self.entries()? {
            if since.is_some_and(|s| entry.created_at < s) {
                continue;
            }
            stats.total_operations += 1;
            *stats.by_operation.entry(entry.operation).or_default() += 1;
            *stats.by_status.entry(entry.status).or_default() += 1;
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Orphan tracking
    // -----------------------------------------------------------------------

    /// Record (or re-record) an orphan as `Detected`.
    pub fn track_orphan(
        &self,
        ric_uri: &str,
        expected: EntityRef,
        detection_method: DetectionMethod,
    ) -> LedgerResult<OrphanTrackingRecord> {
        let record = OrphanTrackingRecord {
            ric_uri: ric_uri.to_string(),
            expected,
            detected_at: now_secs(),
            detection_method,
            status: OrphanStatus::Detected,
            resolved_at: None,
        };
        let bytes = encode(&record)?;
        self.write(|txn| {
            let mut table = txn.open_table(ORPHAN_TABLE).map_err(redb_err("open_table"))?;
            table
                .insert(ric_uri, bytes.as_slice())
                .map_err(redb_err("insert"))?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Move a tracked orphan to `Cleaned` or `Resolved`. Returns `false` if
    /// the URI is not tracked.
    pub fn set_orphan_status(&self, ric_uri: &str, status: OrphanStatus) -> LedgerResult<bool> {
        let now = now_secs();
        self.write(|txn| {
            let mut table = txn.open_table(ORPHAN_TABLE).map_err(redb_err("open_table"))?;
            let existing = table
                .get(ric_uri)
                .map_err(redb_err("get"))?
                .map(|guard| guard.value().to_vec());
            let Some(bytes) = existing else {
                return Ok(false);
            };
            let mut record: OrphanTrackingRecord = decode(&bytes)?;
            record.status = status;
            record.resolved_at = match status {
                OrphanStatus::Detected => None,
                OrphanStatus::Cleaned | OrphanStatus::Resolved => Some(now),
            };
            let bytes = encode(&record)?;
            table
                .insert(ric_uri, bytes.as_slice())
                .map_err(redb_err("insert"))?;
            Ok(true)
        })
    }

    pub fn orphan(&self, ric_uri: &str) -> LedgerResult<Option<OrphanTrackingRecord>> {
        self.read(|txn| {
            let table = txn.open_table(ORPHAN_TABLE).map_err(redb_err("open_table"))?;
            let bytes = table
                .get(ric_uri)
                .map_err(redb_err("get"))?
                .map(|guard| guard.value().to_vec());
            bytes.map(|b| decode(&b)).transpose()
        })
    }

    /// Tracked orphans, optionally filtered by status.
    pub fn orphans(&self, status: Option<OrphanStatus>) -> LedgerResult<Vec<OrphanTrackingRecord>> {
        self.read(|txn| {
            let table = txn.open_table(ORPHAN_TABLE).map_err(redb_err("open_table"))?;
            let mut out = Vec::new();
            for entry in table.iter().map_err(redb_err("iter"))? {
                let (_, value) = entry.map_err(redb_err("iter"))?;
                let record: OrphanTrackingRecord = decode(value.value())?;
                if status.is_none_or(|s| s == record.status) {
                    out.push(record);
                }
            }
            Ok(out)
        })
    }
}

impl std::fmt::Debug for SyncLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLedger")
            .field("triggered_by", &self.triggered_by)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn io(id: u64) -> EntityRef {
        EntityRef::information_object(id)
    }

    const URI: &str = "https://example.org/ric/atom/recordset/1";

    #[test]
    fn set_status_creates_then_keeps_hierarchy() {
        let ledger = SyncLedger::in_memory().unwrap();
        assert!(ledger.status(io(1)).unwrap().is_none());

        ledger.mark_synced(io(1), URI, Some(5), "5/1").unwrap();
        let record = ledger.set_status(io(1), URI, SyncStatus::Deleted).unwrap();
        assert_eq!(record.sync_status, SyncStatus::Deleted);
        assert_eq!(record.parent_id, Some(5));
        assert_eq!(record.hierarchy_path.as_deref(), Some("5/1"));

        let fresh = ledger
            .set_status(io(2), "https://example.org/ric/atom/recordset/2", SyncStatus::Pending)
            .unwrap();
        assert_eq!(fresh.hierarchy_path, None);
    }

    #[test]
    fn update_hierarchy_only_touches_existing() {
        let ledger = SyncLedger::in_memory().unwrap();
        assert!(!ledger.update_hierarchy(io(1), Some(2), "2/1").unwrap());
        assert!(ledger.status(io(1)).unwrap().is_none());

        ledger.mark_synced(io(1), URI, None, "1").unwrap();
        assert!(ledger.update_hierarchy(io(1), Some(2), "2/1").unwrap());
        let record = ledger.status(io(1)).unwrap().unwrap();
        assert_eq!(record.parent_id, Some(2));
        assert_eq!(record.hierarchy_path.as_deref(), Some("2/1"));
        assert_eq!(record.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn statuses_filter() {
        let ledger = SyncLedger::in_memory().unwrap();
        ledger.mark_synced(io(1), URI, None, "1").unwrap();
        ledger.mark_synced(io(2), URI, None, "2").unwrap();
        ledger
            .mark_synced(EntityRef::new(EntityType::Actor, 3), URI, None, "3")
            .unwrap();
        ledger.set_status(io(2), URI, SyncStatus::Deleted).unwrap();

        assert_eq!(ledger.statuses(None, None).unwrap().len(), 3);
        assert_eq!(ledger.statuses(Some(SyncStatus::Synced), None).unwrap().len(), 2);
        assert_eq!(
            ledger
                .statuses(Some(SyncStatus::Synced), Some(EntityType::InformationObject))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn log_ids_are_monotonic_and_history_is_newest_first() {
        let ledger = SyncLedger::in_memory().unwrap().attributed_to("cli");
        let a = ledger
            .append(SyncOperation::Move, Some(io(1)), OperationStatus::Success, None)
            .unwrap();
        let b = ledger
            .append(SyncOperation::IntegrityCheck, None, OperationStatus::Success, None)
            .unwrap();
        let c = ledger
            .append(
                SyncOperation::Delete,
                Some(io(1)),
                OperationStatus::Failure,
                Some("HTTP 503".into()),
            )
            .unwrap();
        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(c.triggered_by, "cli");

        let history = ledger.history(io(1)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].operation, SyncOperation::Delete);
        assert_eq!(history[1].operation, SyncOperation::Move);
    }

    #[test]
    fn history_is_capped() {
        let ledger = SyncLedger::in_memory().unwrap();
        for _ in 0..(HISTORY_LIMIT + 5) {
            ledger
                .append(SyncOperation::Move, Some(io(1)), OperationStatus::Success, None)
                .unwrap();
        }
        assert_eq!(ledger.history(io(1)).unwrap().len(), HISTORY_LIMIT);
    }

    #[test]
    fn stats_group_by_operation_and_status() {
        let ledger = SyncLedger::in_memory().unwrap();
        ledger
            .append(SyncOperation::Delete, Some(io(1)), OperationStatus::Success, None)
            .unwrap();
        ledger
            .append(SyncOperation::Delete, Some(io(2)), OperationStatus::Failure, None)
            .unwrap();
        ledger
            .append(SyncOperation::Move, Some(io(3)), OperationStatus::Success, None)
            .unwrap();

        let stats = ledger.stats(None).unwrap();
        assert_eq!(stats.total_operations, 3);
        assert_eq!(stats.by_operation[&SyncOperation::Delete], 2);
        assert_eq!(stats.by_status[&OperationStatus::Success], 2);

        let future = ledger.stats(Some(now_secs() + 3600)).unwrap();
        assert_eq!(future.total_operations, 0);
    }

    #[test]
    fn orphan_lifecycle() {
        let ledger = SyncLedger::in_memory().unwrap();
        assert!(!ledger.set_orphan_status(URI, OrphanStatus::Cleaned).unwrap());

        ledger
            .track_orphan(URI, io(1), DetectionMethod::IntegrityCheck)
            .unwrap();
        assert_eq!(ledger.orphans(Some(OrphanStatus::Detected)).unwrap().len(), 1);

        assert!(ledger.set_orphan_status(URI, OrphanStatus::Cleaned).unwrap());
        let record = ledger.orphan(URI).unwrap().unwrap();
        assert_eq!(record.status, OrphanStatus::Cleaned);
        assert!(record.resolved_at.is_some());
        assert!(ledger.orphans(Some(OrphanStatus::Detected)).unwrap().is_empty());
        assert_eq!(ledger.orphans(None).unwrap().len(), 1);
    }

    #[test]
    fn persistence_across_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let ledger = SyncLedger::open(dir.path()).unwrap();
            ledger.mark_synced(io(1), URI, None, "1").unwrap();
            ledger
                .append(SyncOperation::Move, Some(io(1)), OperationStatus::Success, None)
                .unwrap();
        }
        let ledger = SyncLedger::open(dir.path()).unwrap();
        assert_eq!(
            ledger.status(io(1)).unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
        let next = ledger
            .append(SyncOperation::Move, Some(io(1)), OperationStatus::Success, None)
            .unwrap();
        assert_eq!(next.id, 2);
    }
}
