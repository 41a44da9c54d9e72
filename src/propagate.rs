//! Deletion propagation: removes a deleted entity's triples from the graph store.
//!
//! The graph store has no referential integrity, so a cascading delete also
//! prunes inbound edges (`?s ?p <uri>`) that other resources hold on the
//! deleted one.
//!
//! Every operation here may leave the two stores transiently inconsistent:
//! the relational record is already gone when these run, and a failed or
//! interrupted update leaves its triples behind until the next cleanup.

use serde::Serialize;
use serde_json::json;

use crate::engine::SyncEngine;
use crate::entity::EntityRef;
use crate::error::{EndpointError, SyncResult};
use crate::ledger::{OperationStatus, SyncOperation, SyncStatus};

/// Outcome of a batch deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchDeletion {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub triples_removed: usize,
}

/// An outbound triple of the previewed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundTriple {
    pub predicate: String,
    pub object: String,
}

/// An inbound triple pointing at the previewed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundTriple {
    pub subject: String,
    pub predicate: String,
}

/// Read-only view of what a cascading delete would remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionPreview {
    pub ric_uri: String,
    pub as_subject: Vec<OutboundTriple>,
    pub as_object: Vec<InboundTriple>,
    pub total: usize,
    /// `false` if either query went unanswered.
    pub complete: bool,
}

/// A triple pattern removable with `DELETE { template } WHERE { pattern }`.
struct Removal {
    template: String,
    pattern: String,
    context: &'static str,
}

impl Removal {
    fn outbound(uri: &str) -> Self {
        let pattern = format!("<{uri}> ?p ?o");
        Self {
            template: pattern.clone(),
            pattern,
            context: "counting outbound triples",
        }
    }

    fn inbound(uri: &str) -> Self {
        let pattern = format!("?s ?p <{uri}>");
        Self {
            template: pattern.clone(),
            pattern,
            context: "counting inbound triples",
        }
    }

    fn subjects_in(list: &str) -> Self {
        Self {
            template: "?s ?p ?o".into(),
            pattern: format!("?s ?p ?o . FILTER(?s IN ({list}))"),
            context: "counting batch outbound triples",
        }
    }

    fn objects_in(list: &str) -> Self {
        Self {
            template: "?s ?p ?o".into(),
            pattern: format!("?s ?p ?o . FILTER(?o IN ({list}))"),
            context: "counting batch inbound triples",
        }
    }

    fn count_query(&self) -> String {
        format!("SELECT (COUNT(*) AS ?n) WHERE {{ {} }}", self.pattern)
    }

    fn delete_update(&self) -> String {
        if self.template == self.pattern {
            format!("DELETE WHERE {{ {} }}", self.pattern)
        } else {
            format!("DELETE {{ {} }} WHERE {{ {} }}", self.template, self.pattern)
        }
    }
}

/// Removes triples of deleted entities.
pub struct DeletionPropagator<'a> {
    engine: &'a SyncEngine,
}

impl<'a> DeletionPropagator<'a> {
    pub fn new(engine: &'a SyncEngine) -> Self {
        Self { engine }
    }

    /// Remove every triple describing `entity`; with `cascade`, also every
    /// triple pointing at it. Returns the number of triples removed.
    ///
    /// On success the status record is marked `Deleted`. On failure the
    /// failure is logged, the status record is left as it was, and the
    /// endpoint error is returned; the leftover triples surface as orphans
    /// in the next integrity check.
    pub fn delete_entity(&self, entity: EntityRef, cascade: bool) -> SyncResult<usize> {
        let uri = self.engine.mapper().build(entity);

        let removed = self.remove_entity_triples(&uri, cascade);

        match removed {
            Ok(removed) => {
                self.engine
                    .ledger()
                    .set_status(entity, &uri, SyncStatus::Deleted)?;
                self.engine.record(
                    SyncOperation::Delete,
                    Some(entity),
                    OperationStatus::Success,
                    Some(json!({
                        "triples_removed": removed,
                        "cascade": cascade,
                        "ric_uri": uri,
                    })),
                );
                tracing::info!(
                    %entity,
                    uri = %uri,
                    removed,
                    cascade,
                    "deleted linked-data resource"
                );
                Ok(removed)
            }
            Err(e) => {
                self.engine.record_failure(SyncOperation::Delete, Some(entity), &e);
                tracing::warn!(%entity, uri = %uri, error = %e, "deletion not propagated");
                Err(e.into())
            }
        }
    }

    /// Delete many entities with two updates in total (outbound, inbound).
    ///
    /// Batch granularity is coarse: any failure marks the whole batch failed
    /// and no status record is advanced. `Err` is only returned when the
    /// ledger itself fails.
    pub fn delete_batch(&self, entities: &[EntityRef]) -> SyncResult<BatchDeletion> {
        let mut result = BatchDeletion {
            total: entities.len(),
            ..Default::default()
        };
        if entities.is_empty() {
            return Ok(result);
        }

        let uris: Vec<String> = entities
            .iter()
            .map(|e| self.engine.mapper().build(*e))
            .collect();

        match self.remove_resources(&uris) {
            Ok(removed) => {
                for (entity, uri) in entities.iter().zip(&uris) {
                    self.engine
                        .ledger()
                        .set_status(*entity, uri, SyncStatus::Deleted)?;
                }
                result.success = entities.len();
                result.triples_removed = removed;
                self.engine.record(
                    SyncOperation::BatchDelete,
                    None,
                    OperationStatus::Success,
                    Some(json!({ "total": result.total, "triples_removed": removed })),
                );
                tracing::info!(total = result.total, removed, "batch deletion propagated");
            }
            Err(e) => {
                result.failed = entities.len();
                self.engine
                    .record_failure(SyncOperation::BatchDelete, None, &e);
                tracing::warn!(total = result.total, error = %e, "batch deletion not propagated");
            }
        }
        Ok(result)
    }

    fn remove_entity_triples(&self, uri: &str, cascade: bool) -> Result<usize, EndpointError> {
        let mut removed = self.remove(&Removal::outbound(uri))?;
        if cascade {
            removed += self.remove(&Removal::inbound(uri))?;
        }
        Ok(removed)
    }

    /// Remove all triples with any of `uris` as subject or object.
    ///
    /// Callers pass URIs built by (or parsed through) the mapper, so they are
    /// safe to embed as IRI references.
    pub fn remove_resources(&self, uris: &[String]) -> Result<usize, EndpointError> {
        if uris.is_empty() {
            return Ok(0);
        }
        let list = uris
            .iter()
            .map(|u| format!("<{u}>"))
            .collect::<Vec<_>>()
            .join(", ");
        let outbound = self.remove(&Removal::subjects_in(&list))?;
        let inbound = self.remove(&Removal::objects_in(&list))?;
        Ok(outbound + inbound)
    }

    /// List the triples a cascading delete of `entity` would remove.
    pub fn preview_deletion(&self, entity: EntityRef) -> DeletionPreview {
        let uri = self.engine.mapper().build(entity);
        let client = self.engine.client();

        let outbound = client.query(&format!("SELECT ?p ?o WHERE {{ <{uri}> ?p ?o }}"));
        let inbound = client.query(&format!("SELECT ?s ?p WHERE {{ ?s ?p <{uri}> }}"));

        let as_subject: Vec<OutboundTriple> = outbound
            .rows
            .iter()
            .map(|row| OutboundTriple {
                predicate: row.value("p").unwrap_or_default().to_string(),
                object: row.value("o").unwrap_or_default().to_string(),
            })
            .collect();
        let as_object: Vec<InboundTriple> = inbound
            .rows
            .iter()
            .map(|row| InboundTriple {
                subject: row.value("s").unwrap_or_default().to_string(),
                predicate: row.value("p").unwrap_or_default().to_string(),
            })
            .collect();

        DeletionPreview {
            ric_uri: uri,
            total: as_subject.len() + as_object.len(),
            as_subject,
            as_object,
            complete: outbound.complete && inbound.complete,
        }
    }

    /// Count, then delete, the triples matching one removal pattern.
    ///
    /// Nothing is sent when nothing matches, which keeps repeated deletes at
    /// zero and avoids a write round-trip.
    fn remove(&self, removal: &Removal) -> Result<usize, EndpointError> {
        let client = self.engine.client();
        let count = client
            .count(&removal.count_query(), "n")
            .ok_or_else(|| EndpointError::ReadFailed {
                context: removal.context.to_string(),
            })?;
        if count == 0 {
            return Ok(0);
        }
        client.apply(&removal.delete_update())?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_queries() {
        let uri = "https://example.org/ric/atom/recordset/42";
        let out = Removal::outbound(uri);
        assert_eq!(
            out.count_query(),
            "SELECT (COUNT(*) AS ?n) WHERE { <https://example.org/ric/atom/recordset/42> ?p ?o }"
        );
        assert_eq!(
            out.delete_update(),
            "DELETE WHERE { <https://example.org/ric/atom/recordset/42> ?p ?o }"
        );
        assert_eq!(
            Removal::inbound(uri).delete_update(),
            "DELETE WHERE { ?s ?p <https://example.org/ric/atom/recordset/42> }"
        );

        let batch = Removal::objects_in("<a>, <b>");
        assert_eq!(
            batch.delete_update(),
            "DELETE { ?s ?p ?o } WHERE { ?s ?p ?o . FILTER(?o IN (<a>, <b>)) }"
        );
    }
}
