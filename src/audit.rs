//! Integrity auditing: read-only scans comparing the two stores.
//!
//! Three kinds of divergence are reported:
//!
//! - **orphaned triples**: linked-data resources whose relational record is gone
//! - **missing records**: entities recorded as synced with no triples in the graph store
//! - **inconsistencies**: synced entities whose recorded parent or hierarchy
//!   path no longer matches the relational tree
//!
//! When the graph store (or the relational store) cannot answer for an item,
//! that item goes into `unverified` instead of the findings, so an outage is
//! never reported as data loss.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::json;

use crate::engine::SyncEngine;
use crate::entity::{EntityRef, EntityType};
use crate::error::SyncResult;
use crate::ledger::{
    DetectionMethod, OperationStatus, OrphanStatus, SyncOperation, SyncStatus, now_secs,
};
use crate::sparql::Presence;

/// Findings of one scan plus the items whose state could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scan<T> {
    pub found: Vec<T>,
    /// URIs (or entity keys) that could not be checked in this pass.
    pub unverified: Vec<String>,
    /// `true` only if every query was answered and nothing is unverified.
    pub complete: bool,
}

impl<T> Scan<T> {
    fn new(found: Vec<T>, unverified: Vec<String>, answered: bool) -> Self {
        let complete = answered && unverified.is_empty();
        Self {
            found,
            unverified,
            complete,
        }
    }
}

/// A linked-data resource without a relational counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedResource {
    pub ric_uri: String,
    pub entity: EntityRef,
}

/// A synced entity with no triples in the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingRecord {
    pub entity: EntityRef,
    pub ric_uri: String,
}

/// A synced entity whose recorded hierarchy disagrees with the relational tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inconsistency {
    pub entity: EntityRef,
    pub recorded_parent: Option<u64>,
    pub expected_parent: Option<u64>,
    pub recorded_path: Option<String>,
    pub expected_path: String,
}

/// Combined result of [`IntegrityAuditor::run_integrity_check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub orphaned_triples: Vec<OrphanedResource>,
    pub missing_records: Vec<MissingRecord>,
    pub inconsistencies: Vec<Inconsistency>,
    pub unverified: Vec<String>,
    pub complete: bool,
    pub checked_at: u64,
}

impl IntegrityReport {
    /// No divergence found and every item was checked.
    pub fn is_clean(&self) -> bool {
        self.complete
            && self.orphaned_triples.is_empty()
            && self.missing_records.is_empty()
            && self.inconsistencies.is_empty()
    }
}

/// Read-only divergence scans. The only state touched is orphan tracking.
pub struct IntegrityAuditor<'a> {
    engine: &'a SyncEngine,
}

impl<'a> IntegrityAuditor<'a> {
    pub fn new(engine: &'a SyncEngine) -> Self {
        Self { engine }
    }

    /// Linked-data resources under the managed base whose relational record
    /// no longer exists. Each is tracked as a `Detected` orphan.
    pub fn find_orphaned_triples(
        &self,
        filter: Option<EntityType>,
    ) -> SyncResult<Scan<OrphanedResource>> {
        self.scan_orphans(filter, DetectionMethod::IntegrityCheck)
    }

    pub(crate) fn scan_orphans(
        &self,
        filter: Option<EntityType>,
        method: DetectionMethod,
    ) -> SyncResult<Scan<OrphanedResource>> {
        let mapper = self.engine.mapper();
        let records = self.engine.records();
        let ledger = self.engine.ledger();

        let prefix = mapper.prefix(filter);
        let solutions = self.engine.client().query(&format!(
            "SELECT DISTINCT ?s WHERE {{ ?s ?p ?o . FILTER(STRSTARTS(STR(?s), \"{prefix}\")) }}"
        ));

        let mut found = Vec::new();
        let mut unverified = Vec::new();
        let subjects: BTreeSet<&str> = solutions.rows.iter().filter_map(|r| r.value("s")).collect();
        for uri in subjects {
            let Some(entity) = mapper.parse(uri) else {
                tracing::debug!(uri, "skipping unparseable subject");
                continue;
            };
            match records.exists(entity) {
                Ok(true) => {}
                Ok(false) => {
                    let already_tracked = ledger
                        .orphan(uri)?
                        .is_some_and(|o| o.status == OrphanStatus::Detected);
                    if !already_tracked {
                        ledger.track_orphan(uri, entity, method)?;
                    }
                    found.push(OrphanedResource {
                        ric_uri: uri.to_string(),
                        entity,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        %entity,
                        error = %e,
                        "relational lookup failed during orphan scan"
                    );
                    unverified.push(uri.to_string());
                }
            }
        }

        if solutions.complete {
            self.resolve_reappeared(filter)?;
        }

        tracing::info!(
            orphans = found.len(),
            unverified = unverified.len(),
            complete = solutions.complete,
            "orphan scan finished"
        );
        Ok(Scan::new(found, unverified, solutions.complete))
    }

    /// Mark tracked orphans whose relational record exists again as `Resolved`.
    fn resolve_reappeared(&self, filter: Option<EntityType>) -> SyncResult<()> {
        let ledger = self.engine.ledger();
        for orphan in ledger.orphans(Some(OrphanStatus::Detected))? {
            if filter.is_some_and(|t| t != orphan.expected.entity_type) {
                continue;
            }
            if self.engine.records().exists(orphan.expected).unwrap_or(false) {
                ledger.set_orphan_status(&orphan.ric_uri, OrphanStatus::Resolved)?;
                tracing::info!(
                    uri = %orphan.ric_uri,
                    "orphan resolved: relational record reappeared"
                );
            }
        }
        Ok(())
    }

    /// Entities recorded as synced that have no triples in the graph store.
    pub fn find_missing_records(
        &self,
        filter: Option<EntityType>,
    ) -> SyncResult<Scan<MissingRecord>> {
        let client = self.engine.client();
        let mut found = Vec::new();
        let mut unverified = Vec::new();

        for record in self.engine.ledger().statuses(Some(SyncStatus::Synced), filter)? {
            let ask = format!("ASK {{ <{}> ?p ?o }}", record.ric_uri);
            match client.presence(&ask) {
                Presence::Present => {}
                Presence::Absent => found.push(MissingRecord {
                    entity: record.entity,
                    ric_uri: record.ric_uri,
                }),
                Presence::Unknown => unverified.push(record.ric_uri),
            }
        }
        Ok(Scan::new(found, unverified, true))
    }

    /// Synced entities whose recorded parent or path differs from the
    /// relational parent chain. Entities deleted relationally are skipped;
    /// the orphan scan covers them.
    pub fn find_inconsistencies(
        &self,
        filter: Option<EntityType>,
    ) -> SyncResult<Scan<Inconsistency>> {
        let records = self.engine.records();
        let mut found = Vec::new();
        let mut unverified = Vec::new();

        for record in self.engine.ledger().statuses(Some(SyncStatus::Synced), filter)? {
            let entity = record.entity;
            let expected = records.exists(entity).and_then(|exists| {
                if !exists {
                    return Ok(None);
                }
                Ok(Some((records.parent_of(entity)?, records.hierarchy_path(entity)?)))
            });
            let (expected_parent, expected_path) = match expected {
                Ok(Some(expected)) => expected,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        %entity,
                        error = %e,
                        "relational lookup failed during consistency scan"
                    );
                    unverified.push(record.ric_uri);
                    continue;
                }
            };
            if record.parent_id != expected_parent
                || record.hierarchy_path.as_deref() != Some(expected_path.as_str())
            {
                found.push(Inconsistency {
                    entity,
                    recorded_parent: record.parent_id,
                    expected_parent,
                    recorded_path: record.hierarchy_path,
                    expected_path,
                });
            }
        }
        Ok(Scan::new(found, unverified, true))
    }

    /// Run all three scans across every entity type.
    pub fn run_integrity_check(&self) -> SyncResult<IntegrityReport> {
        let orphans = self.find_orphaned_triples(None)?;
        let missing = self.find_missing_records(None)?;
        let inconsistencies = self.find_inconsistencies(None)?;

        let complete = orphans.complete && missing.complete && inconsistencies.complete;
        let mut unverified = orphans.unverified;
        unverified.extend(missing.unverified);
        unverified.extend(inconsistencies.unverified);
        unverified.sort();
        unverified.dedup();

        let report = IntegrityReport {
            orphaned_triples: orphans.found,
            missing_records: missing.found,
            inconsistencies: inconsistencies.found,
            unverified,
            complete,
            checked_at: now_secs(),
        };

        self.engine.record(
            SyncOperation::IntegrityCheck,
            None,
            OperationStatus::Success,
            Some(json!({
                "orphaned_triples": report.orphaned_triples.len(),
                "missing_records": report.missing_records.len(),
                "inconsistencies": report.inconsistencies.len(),
                "unverified": report.unverified.len(),
                "complete": report.complete,
            })),
        );
        tracing::info!(
            orphans = report.orphaned_triples.len(),
            missing = report.missing_records.len(),
            inconsistencies = report.inconsistencies.len(),
            unverified = report.unverified.len(),
            complete,
            "integrity check finished"
        );
        Ok(report)
    }
}
