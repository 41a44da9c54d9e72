//! Repair: acting on what the auditor found.

use serde::Serialize;
use serde_json::json;

use crate::audit::IntegrityAuditor;
use crate::engine::SyncEngine;
use crate::entity::EntityRef;
use crate::error::SyncResult;
use crate::hierarchy::EntityResync;
use crate::ledger::{DetectionMethod, OperationStatus, OrphanStatus, SyncOperation};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub orphans_found: usize,
    pub triples_removed: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    pub repaired: usize,
    pub failed: usize,
}

/// Removes orphaned triples and resyncs inconsistent entities.
pub struct RepairExecutor<'a> {
    engine: &'a SyncEngine,
}

impl<'a> RepairExecutor<'a> {
    pub fn new(engine: &'a SyncEngine) -> Self {
        Self { engine }
    }

    /// Scan for orphans and, unless `dry_run`, remove all their triples in
    /// one pass. Removed orphans are marked `Cleaned`.
    ///
    /// Orphans the scan could not verify are left alone. If the removal
    /// fails, any triples the store did remove are gone for good and the rest
    /// are found again by the next scan.
    pub fn cleanup_orphaned_triples(&self, dry_run: bool) -> SyncResult<CleanupStats> {
        let scan = IntegrityAuditor::new(self.engine)
            .scan_orphans(None, DetectionMethod::CleanupScan)?;
        let mut stats = CleanupStats {
            orphans_found: scan.found.len(),
            triples_removed: 0,
            dry_run,
        };
        if dry_run || scan.found.is_empty() {
            tracing::info!(
                orphans = stats.orphans_found,
                dry_run,
                "orphan cleanup: nothing removed"
            );
            return Ok(stats);
        }

        let uris: Vec<String> = scan.found.iter().map(|o| o.ric_uri.clone()).collect();
        match self.engine.propagator().remove_resources(&uris) {
            Ok(removed) => {
                stats.triples_removed = removed;
                let ledger = self.engine.ledger();
                for uri in &uris {
                    ledger.set_orphan_status(uri, OrphanStatus::Cleaned)?;
                }
                self.engine.record(
                    SyncOperation::Cleanup,
                    None,
                    OperationStatus::Success,
                    Some(json!({ "orphans": uris.len(), "triples_removed": removed })),
                );
                tracing::info!(orphans = uris.len(), removed, "orphaned triples removed");
                Ok(stats)
            }
            Err(e) => {
                self.engine.record_failure(SyncOperation::Cleanup, None, &e);
                tracing::warn!(orphans = uris.len(), error = %e, "orphan cleanup failed");
                Err(e.into())
            }
        }
    }

    /// Resync each entity with the built-in hierarchy resync.
    pub fn repair_inconsistencies(&self, entities: &[EntityRef]) -> RepairStats {
        self.repair_inconsistencies_with(entities, &self.engine.hierarchy())
    }

    /// Resync each entity with `resync`. One failure never stops the rest.
    pub fn repair_inconsistencies_with(
        &self,
        entities: &[EntityRef],
        resync: &dyn EntityResync,
    ) -> RepairStats {
        let mut stats = RepairStats::default();
        for &entity in entities {
            match resync.resync(entity) {
                Ok(()) => stats.repaired += 1,
                Err(e) => {
                    tracing::warn!(%entity, error = %e, "repair failed");
                    stats.failed += 1;
                }
            }
        }

        let status = if stats.failed == 0 {
            OperationStatus::Success
        } else {
            OperationStatus::Failure
        };
        self.engine.record(
            SyncOperation::Repair,
            None,
            status,
            Some(json!({ "repaired": stats.repaired, "failed": stats.failed })),
        );
        stats
    }
}
