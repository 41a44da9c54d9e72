//! Engine facade: top-level API for the sync engine.
//!
//! [`SyncEngine`] owns the protocol client, the ledger, the URI mapper and a
//! handle on the host's relational store. Components borrow the engine for
//! the duration of one call (see [`SyncEngine::propagator`] and friends).
//!
//! Hosts call [`SyncEngine::on_delete`] and [`SyncEngine::on_move`] from
//! their lifecycle hooks after the relational change has committed. Neither
//! ever fails the host: failures are logged and left for the auditor.

use std::fmt::Display;
use std::sync::Arc;

use crate::audit::{IntegrityAuditor, IntegrityReport};
use crate::config::SyncConfig;
use crate::entity::EntityRef;
use crate::error::SyncResult;
use crate::hierarchy::HierarchySynchronizer;
use crate::ledger::{
    OperationStatus, SyncLedger, SyncLogEntry, SyncOperation, SyncStats, SyncStatusRecord,
};
use crate::propagate::{BatchDeletion, DeletionPreview, DeletionPropagator};
use crate::records::RecordSource;
use crate::repair::{CleanupStats, RepairExecutor, RepairStats};
use crate::sparql::ProtocolClient;
use crate::sparql::transport::SparqlTransport;
use crate::uri::UriMapper;

/// The dual-store sync engine.
pub struct SyncEngine {
    client: ProtocolClient,
    ledger: SyncLedger,
    records: Arc<dyn RecordSource>,
    mapper: UriMapper,
}

impl SyncEngine {
    /// Create an engine talking HTTP to the configured endpoint.
    pub fn new(config: &SyncConfig, records: Arc<dyn RecordSource>) -> SyncResult<Self> {
        config.validate()?;
        Self::assemble(config, ProtocolClient::http(&config.endpoint), records)
    }

    /// Create an engine over a caller-supplied transport, e.g. an
    /// [`EmbeddedTransport`](crate::sparql::embedded::EmbeddedTransport).
    /// `endpoint.url` is not used and not checked; the timeouts still are.
    pub fn with_transport(
        config: &SyncConfig,
        transport: Box<dyn SparqlTransport>,
        records: Arc<dyn RecordSource>,
    ) -> SyncResult<Self> {
        config.validate_timeouts()?;
        let client = ProtocolClient::with_transport(&config.endpoint, transport);
        Self::assemble(config, client, records)
    }

    fn assemble(
        config: &SyncConfig,
        client: ProtocolClient,
        records: Arc<dyn RecordSource>,
    ) -> SyncResult<Self> {
        let mapper = UriMapper::new(config.mapping.base_uri.clone())?;
        let ledger = match config.ledger.data_dir {
            Some(ref dir) => SyncLedger::open(dir)?,
            None => SyncLedger::in_memory()?,
        }
        .attributed_to(config.ledger.triggered_by.clone());

        tracing::info!(
            endpoint = %client.endpoint(),
            base = mapper.base(),
            persistent = config.ledger.data_dir.is_some(),
            "initializing sync engine"
        );

        Ok(Self {
            client,
            ledger,
            records,
            mapper,
        })
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    pub fn records(&self) -> &dyn RecordSource {
        self.records.as_ref()
    }

    pub fn mapper(&self) -> &UriMapper {
        &self.mapper
    }

    pub fn propagator(&self) -> DeletionPropagator<'_> {
        DeletionPropagator::new(self)
    }

    pub fn hierarchy(&self) -> HierarchySynchronizer<'_> {
        HierarchySynchronizer::new(self)
    }

    pub fn auditor(&self) -> IntegrityAuditor<'_> {
        IntegrityAuditor::new(self)
    }

    pub fn repair(&self) -> RepairExecutor<'_> {
        RepairExecutor::new(self)
    }

    // -----------------------------------------------------------------------
    // Audit log helpers
    // -----------------------------------------------------------------------

    /// Append a log entry. A ledger failure is reported but never aborts the
    /// operation being logged.
    pub(crate) fn record(
        &self,
        operation: SyncOperation,
        entity: Option<EntityRef>,
        status: OperationStatus,
        details: Option<serde_json::Value>,
    ) {
        let details = details.map(|d| d.to_string());
        if let Err(e) = self.ledger.append(operation, entity, status, details) {
            tracing::error!(%operation, error = %e, "failed to append sync log entry");
        }
    }

    /// Log a failed operation with the error message as details.
    pub(crate) fn record_failure(
        &self,
        operation: SyncOperation,
        entity: Option<EntityRef>,
        error: &dyn Display,
    ) {
        if let Err(e) = self.ledger.append(
            operation,
            entity,
            OperationStatus::Failure,
            Some(error.to_string()),
        ) {
            tracing::error!(%operation, error = %e, "failed to append sync log entry");
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle hooks
    // -----------------------------------------------------------------------

    /// Propagate a committed relational delete. Returns the number of triples
    /// removed, or `None` if the graph store could not be updated.
    ///
    /// The stores may be inconsistent afterwards; the next integrity check
    /// reports any triples left behind as orphans.
    pub fn on_delete(&self, entity: EntityRef, cascade: bool) -> Option<usize> {
        self.propagator().delete_entity(entity, cascade).ok()
    }

    /// Propagate a committed re-parenting. Returns `false` if any step failed.
    ///
    /// A failure part-way leaves the parent edges and the recorded paths out
    /// of step with the relational store until repaired.
    pub fn on_move(
        &self,
        entity: EntityRef,
        old_parent: Option<u64>,
        new_parent: Option<u64>,
    ) -> bool {
        self.hierarchy().move_entity(entity, old_parent, new_parent)
    }

    /// Record that the host has published `entity` to the graph store.
    pub fn register_synced(&self, entity: EntityRef) -> SyncResult<SyncStatusRecord> {
        let uri = self.mapper.build(entity);
        let parent = self.records.parent_of(entity)?;
        let path = self.records.hierarchy_path(entity)?;
        Ok(self.ledger.mark_synced(entity, &uri, parent, &path)?)
    }

    // -----------------------------------------------------------------------
    // Operator surface
    // -----------------------------------------------------------------------

    pub fn run_integrity_check(&self) -> SyncResult<IntegrityReport> {
        self.auditor().run_integrity_check()
    }

    /// Remove triples of resources whose relational record is gone.
    pub fn cleanup_orphaned_triples(&self, dry_run: bool) -> SyncResult<CleanupStats> {
        self.repair().cleanup_orphaned_triples(dry_run)
    }

    /// Resync each entity; failures are counted, not raised.
    pub fn repair_inconsistencies(&self, entities: &[EntityRef]) -> RepairStats {
        self.repair().repair_inconsistencies(entities)
    }

    pub fn preview_deletion(&self, entity: EntityRef) -> DeletionPreview {
        self.propagator().preview_deletion(entity)
    }

    /// Propagate many relational deletes at once.
    ///
    /// On failure none of the entities are marked deleted, and whatever the
    /// store did apply is picked up by the next orphan scan.
    pub fn delete_batch(&self, entities: &[EntityRef]) -> SyncResult<BatchDeletion> {
        self.propagator().delete_batch(entities)
    }

    /// Re-link the ancestor chain of `entity`. Returns the number of edges written.
    pub fn update_hierarchy(&self, entity: EntityRef) -> SyncResult<usize> {
        self.hierarchy().update_hierarchy(entity)
    }

    pub fn sync_history(&self, entity: EntityRef) -> SyncResult<Vec<SyncLogEntry>> {
        Ok(self.ledger.history(entity)?)
    }

    /// Operation counts, optionally since a UNIX timestamp.
    pub fn sync_stats(&self, since: Option<u64>) -> SyncResult<SyncStats> {
        Ok(self.ledger.stats(since)?)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("client", &self.client)
            .field("ledger", &self.ledger)
            .field("mapper", &self.mapper)
            .finish()
    }
}
