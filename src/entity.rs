//! Entity references: the relational side of the identity mapping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UriError;

/// The closed set of relational entity types mirrored into the graph store.
///
/// Every variant maps to exactly one RiC-O namespace segment. There is no
/// catch-all variant: a type name that is not listed here cannot be parsed,
/// so it can never produce a URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// Archival description (`information_object` table) ⇒ `rico:RecordSet`.
    InformationObject,
    /// Authority record ⇒ `rico:Agent`.
    Actor,
    /// Holding institution ⇒ `rico:CorporateBody`.
    Repository,
    /// ISDF function ⇒ `rico:Activity`.
    Function,
    /// Dated event ⇒ `rico:Event`.
    Event,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::InformationObject,
        EntityType::Actor,
        EntityType::Repository,
        EntityType::Function,
        EntityType::Event,
    ];

    /// Relational name of the type, as used by the host application.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::InformationObject => "informationobject",
            EntityType::Actor => "actor",
            EntityType::Repository => "repository",
            EntityType::Function => "function",
            EntityType::Event => "event",
        }
    }

    /// URI path segment for the type under `{base}atom/`.
    pub fn segment(self) -> &'static str {
        match self {
            EntityType::InformationObject => "recordset",
            EntityType::Actor => "agent",
            EntityType::Repository => "corporatebody",
            EntityType::Function => "activity",
            EntityType::Event => "event",
        }
    }

    /// Inverse of [`segment`](Self::segment).
    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.segment() == segment)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UriError::UnknownEntityType { name: s.to_string() })
    }
}

/// Identifies a record in the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: u64,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: u64) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }

    /// Shorthand for an archival description.
    pub fn information_object(entity_id: u64) -> Self {
        Self::new(EntityType::InformationObject, entity_id)
    }

    /// Another entity of the same type (parents and children share a type).
    pub fn sibling(self, entity_id: u64) -> Self {
        Self::new(self.entity_type, entity_id)
    }

    /// Stable key used by the ledger tables.
    pub(crate) fn ledger_key(self) -> String {
        format!("{}:{}", self.entity_type.as_str(), self.entity_id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_segments_are_unique() {
        for a in EntityType::ALL {
            for b in EntityType::ALL {
                if a != b {
                    assert_ne!(a.as_str(), b.as_str());
                    assert_ne!(a.segment(), b.segment());
                }
            }
        }
    }

    #[test]
    fn parse_type_names() {
        assert_eq!(
            "informationobject".parse::<EntityType>().unwrap(),
            EntityType::InformationObject
        );
        assert_eq!("actor".parse::<EntityType>().unwrap(), EntityType::Actor);
        assert!(matches!(
            "place".parse::<EntityType>(),
            Err(UriError::UnknownEntityType { .. })
        ));
    }

    #[test]
    fn segment_roundtrip() {
        for t in EntityType::ALL {
            assert_eq!(EntityType::from_segment(t.segment()), Some(t));
        }
        assert_eq!(EntityType::from_segment("informationobject"), None);
    }

    #[test]
    fn display_and_key() {
        let e = EntityRef::information_object(42);
        assert_eq!(e.to_string(), "informationobject:42");
        assert_eq!(e.ledger_key(), "informationobject:42");
        assert_eq!(e.sibling(7), EntityRef::information_object(7));
    }
}
