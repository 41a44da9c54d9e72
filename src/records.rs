//! The relational side: a narrow read interface onto the authoritative store.
//!
//! The engine never owns relational data. Hosts implement [`RecordSource`]
//! over their own database; [`MemoryRecords`] is a concurrent in-memory
//! implementation for embedding and tests.

use std::collections::{HashSet, VecDeque};

use dashmap::DashMap;
use miette::Diagnostic;
use thiserror::Error;

use crate::entity::EntityRef;

/// Errors from the relational store interface.
#[derive(Debug, Error, Diagnostic)]
pub enum RecordError {
    #[error("relational store error: {message}")]
    #[diagnostic(
        code(ric::records::backend),
        help("The host's relational store failed to answer. Check the database connection.")
    )]
    Backend { message: String },

    #[error("record {entity} does not exist in the relational store")]
    #[diagnostic(
        code(ric::records::not_found),
        help("The record was deleted; its linked-data mirror should be cleaned up instead.")
    )]
    NotFound { entity: EntityRef },

    #[error("parent chain of {entity} loops back on itself")]
    #[diagnostic(
        code(ric::records::cycle),
        help(
            "The relational hierarchy contains a cycle. Fix the parent pointers in \
             the source database before re-running the hierarchy sync."
        )
    )]
    Cycle { entity: EntityRef },
}

pub type RecordResult<T> = std::result::Result<T, RecordError>;

/// Read access to records and their parent pointers.
///
/// Parents and children are always of the same entity type.
pub trait RecordSource: Send + Sync {
    /// Whether the record exists.
    fn exists(&self, entity: EntityRef) -> RecordResult<bool>;

    /// Parent id, or `None` for a root (or a record that does not exist).
    fn parent_of(&self, entity: EntityRef) -> RecordResult<Option<u64>>;

    /// Ids of the direct children.
    fn children_of(&self, entity: EntityRef) -> RecordResult<Vec<u64>>;

    /// Ids from the root down to `entity` inclusive.
    fn ancestry(&self, entity: EntityRef) -> RecordResult<Vec<u64>> {
        let mut chain = vec![entity.entity_id];
        let mut seen = HashSet::from([entity.entity_id]);
        let mut current = entity;
        while let Some(parent) = self.parent_of(current)? {
            if !seen.insert(parent) {
                return Err(RecordError::Cycle { entity });
            }
            chain.push(parent);
            current = entity.sibling(parent);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Materialized slash-separated ancestor chain, e.g. `1/10/11`.
    fn hierarchy_path(&self, entity: EntityRef) -> RecordResult<String> {
        Ok(join_path(&self.ancestry(entity)?))
    }

    /// All descendants as `(id, parent_id)` pairs, parents before children.
    fn descendants(&self, entity: EntityRef) -> RecordResult<Vec<(u64, u64)>> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([entity.entity_id]);
        let mut queue = VecDeque::from([entity.entity_id]);
        while let Some(parent) = queue.pop_front() {
            for child in self.children_of(entity.sibling(parent))? {
                if !seen.insert(child) {
                    return Err(RecordError::Cycle {
                        entity: entity.sibling(child),
                    });
                }
                out.push((child, parent));
                queue.push_back(child);
            }
        }
        Ok(out)
    }
}

/// Join ids into a hierarchy path.
pub fn join_path(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

/// Concurrent in-memory record table: entity → parent id.
#[derive(Debug, Default)]
pub struct MemoryRecords {
    parents: DashMap<EntityRef, Option<u64>>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, entity: EntityRef, parent: Option<u64>) {
        self.parents.insert(entity, parent);
    }

    /// Re-point a record at a new parent. Returns the old parent.
    pub fn set_parent(&self, entity: EntityRef, parent: Option<u64>) -> Option<u64> {
        self.parents.insert(entity, parent).flatten()
    }

    /// Remove a record. Returns whether it existed.
    pub fn remove(&self, entity: EntityRef) -> bool {
        self.parents.remove(&entity).is_some()
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

impl RecordSource for MemoryRecords {
    fn exists(&self, entity: EntityRef) -> RecordResult<bool> {
        Ok(self.parents.contains_key(&entity))
    }

    fn parent_of(&self, entity: EntityRef) -> RecordResult<Option<u64>> {
        Ok(self.parents.get(&entity).and_then(|p| *p.value()))
    }

    fn children_of(&self, entity: EntityRef) -> RecordResult<Vec<u64>> {
        let mut children: Vec<u64> = self
            .parents
            .iter()
            .filter(|e| {
                e.key().entity_type == entity.entity_type && *e.value() == Some(entity.entity_id)
            })
            .map(|e| e.key().entity_id)
            .collect();
        children.sort_unstable();
        Ok(children)
    }
}
