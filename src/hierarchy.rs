//! Hierarchy synchronization: parent edges in the graph store and the
//! materialized paths in the ledger.
//!
//! Each parent/child link is mirrored as a pair of RiC-O triples:
//!
//! ```text
//! <child>  rico:isOrWasIncludedIn <parent>
//! <parent> rico:includesOrIncluded <child>
//! ```

use std::collections::HashMap;

use serde_json::json;

use crate::engine::SyncEngine;
use crate::entity::EntityRef;
use crate::error::{SyncError, SyncResult};
use crate::ledger::{OperationStatus, SyncOperation};
use crate::records::{RecordError, join_path};
use crate::sparql::{Presence, rico_prefix};

/// Bring one entity's linked-data mirror back in line with the relational store.
///
/// The repair executor drives this. The built-in [`HierarchySynchronizer`]
/// implementation only repairs parent edges and the status record; it never
/// writes descriptive triples. Hosts with a full record serializer supply
/// their own implementation to restore those.
pub trait EntityResync {
    fn resync(&self, entity: EntityRef) -> SyncResult<()>;
}

fn edge_triples(child_uri: &str, parent_uri: &str) -> String {
    format!(
        "<{child_uri}> rico:isOrWasIncludedIn <{parent_uri}> .\n  \
         <{parent_uri}> rico:includesOrIncluded <{child_uri}> ."
    )
}

/// Keeps parent edges and hierarchy paths in step with the relational tree.
pub struct HierarchySynchronizer<'a> {
    engine: &'a SyncEngine,
}

impl<'a> HierarchySynchronizer<'a> {
    pub fn new(engine: &'a SyncEngine) -> Self {
        Self { engine }
    }

    /// Re-parent `entity` from `old_parent` to `new_parent`.
    ///
    /// Steps run in order and a failed triple write aborts the rest, so a
    /// `false` return may leave the old edge removed without the new one
    /// added. The integrity check reports the resulting inconsistency.
    pub fn move_entity(
        &self,
        entity: EntityRef,
        old_parent: Option<u64>,
        new_parent: Option<u64>,
    ) -> bool {
        match self.relocate(entity, old_parent, new_parent) {
            Ok(descendants) => {
                self.engine.record(
                    SyncOperation::Move,
                    Some(entity),
                    OperationStatus::Success,
                    Some(json!({
                        "old_parent": old_parent,
                        "new_parent": new_parent,
                        "descendants_updated": descendants,
                    })),
                );
                tracing::info!(
                    %entity,
                    ?old_parent,
                    ?new_parent,
                    descendants,
                    "moved in hierarchy"
                );
                true
            }
            Err(e) => {
                self.engine
                    .record_failure(SyncOperation::Move, Some(entity), &e);
                tracing::warn!(
                    %entity,
                    ?old_parent,
                    ?new_parent,
                    error = %e,
                    "move not propagated"
                );
                false
            }
        }
    }

    fn relocate(
        &self,
        entity: EntityRef,
        old_parent: Option<u64>,
        new_parent: Option<u64>,
    ) -> SyncResult<usize> {
        let mapper = self.engine.mapper();
        let uri = mapper.build(entity);

        if let Some(old) = old_parent {
            let parent_uri = mapper.build(entity.sibling(old));
            self.write(&format!(
                "{}DELETE DATA {{\n  {}\n}}",
                rico_prefix(),
                edge_triples(&uri, &parent_uri)
            ))?;
        }
        if let Some(new) = new_parent {
            let parent_uri = mapper.build(entity.sibling(new));
            self.write(&format!(
                "{}INSERT DATA {{\n  {}\n}}",
                rico_prefix(),
                edge_triples(&uri, &parent_uri)
            ))?;
        }

        let records = self.engine.records();
        let path = match new_parent {
            Some(parent) => format!(
                "{}/{}",
                records.hierarchy_path(entity.sibling(parent))?,
                entity.entity_id
            ),
            None => entity.entity_id.to_string(),
        };
        let ledger = self.engine.ledger();
        ledger.update_hierarchy(entity, new_parent, &path)?;

        let mut paths = HashMap::from([(entity.entity_id, path)]);
        let mut updated = 0;
        for (child, parent) in records.descendants(entity)? {
            let parent_path = paths.get(&parent).cloned().unwrap_or_else(|| parent.to_string());
            let child_path = format!("{parent_path}/{child}");
            if ledger.update_hierarchy(entity.sibling(child), Some(parent), &child_path)? {
                updated += 1;
            }
            paths.insert(child, child_path);
        }
        Ok(updated)
    }

    /// Re-link every parent edge from the root down to `entity`, one request
    /// per edge. Idempotent. Returns the number of edges written.
    ///
    /// A failure part-way leaves the edges above it re-linked and those
    /// below it untouched.
    pub fn update_hierarchy(&self, entity: EntityRef) -> SyncResult<usize> {
        match self.relink_ancestry(entity) {
            Ok(edges) => {
                self.engine.record(
                    SyncOperation::HierarchyUpdate,
                    Some(entity),
                    OperationStatus::Success,
                    Some(json!({ "edges": edges })),
                );
                tracing::debug!(%entity, edges, "hierarchy re-linked");
                Ok(edges)
            }
            Err(e) => {
                self.engine
                    .record_failure(SyncOperation::HierarchyUpdate, Some(entity), &e);
                Err(e)
            }
        }
    }

    fn relink_ancestry(&self, entity: EntityRef) -> SyncResult<usize> {
        let mapper = self.engine.mapper();
        let chain = self.engine.records().ancestry(entity)?;
        let mut edges = 0;
        for pair in chain.windows(2) {
            let parent_uri = mapper.build(entity.sibling(pair[0]));
            let child_uri = mapper.build(entity.sibling(pair[1]));
            let triples = edge_triples(&child_uri, &parent_uri);
            self.write(&format!(
                "{}DELETE DATA {{\n  {triples}\n}};\nINSERT DATA {{\n  {triples}\n}}",
                rico_prefix()
            ))?;
            edges += 1;
        }
        Ok(edges)
    }

    /// Remove every parent edge of `entity`, whichever parent it names.
    fn detach(&self, entity: EntityRef) -> SyncResult<()> {
        let uri = self.engine.mapper().build(entity);
        self.write(&format!(
            "{}DELETE WHERE {{ <{uri}> rico:isOrWasIncludedIn ?parent }};\n\
             DELETE WHERE {{ ?parent rico:includesOrIncluded <{uri}> }}",
            rico_prefix()
        ))
    }

    fn write(&self, update: &str) -> SyncResult<()> {
        Ok(self.engine.client().apply(update)?)
    }
}

impl EntityResync for HierarchySynchronizer<'_> {
    /// Confirm the record still exists, drop its stale parent edges, re-link
    /// its ancestors and mark it synced with a freshly computed path.
    ///
    /// Descriptive triples are not restored. An entity left without any
    /// triples is still marked synced and logged as a warning.
    fn resync(&self, entity: EntityRef) -> SyncResult<()> {
        let records = self.engine.records();
        if !records.exists(entity)? {
            let err = SyncError::from(RecordError::NotFound { entity });
            self.engine
                .record_failure(SyncOperation::Resync, Some(entity), &err);
            return Err(err);
        }

        let result = self
            .detach(entity)
            .and_then(|()| self.relink_ancestry(entity))
            .and_then(|edges| {
                let chain = records.ancestry(entity)?;
                let parent = records.parent_of(entity)?;
                let uri = self.engine.mapper().build(entity);
                self.engine
                    .ledger()
                    .mark_synced(entity, &uri, parent, &join_path(&chain))?;
                Ok(edges)
            });

        match result {
            Ok(edges) => {
                let uri = self.engine.mapper().build(entity);
                let ask = format!("ASK {{ <{uri}> ?p ?o }}");
                if self.engine.client().presence(&ask) == Presence::Absent {
                    tracing::warn!(
                        %entity,
                        "resynced entity has no triples; descriptive data needs a full resync"
                    );
                }
                self.engine.record(
                    SyncOperation::Resync,
                    Some(entity),
                    OperationStatus::Success,
                    Some(json!({ "edges": edges })),
                );
                Ok(())
            }
            Err(e) => {
                self.engine
                    .record_failure(SyncOperation::Resync, Some(entity), &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_pair_uses_both_directions() {
        let triples = edge_triples("https://x/atom/recordset/10", "https://x/atom/recordset/1");
        assert!(triples.contains(
            "<https://x/atom/recordset/10> rico:isOrWasIncludedIn <https://x/atom/recordset/1> ."
        ));
        assert!(triples.contains(
            "<https://x/atom/recordset/1> rico:includesOrIncluded <https://x/atom/recordset/10> ."
        ));
    }
}
