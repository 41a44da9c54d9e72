//! Bidirectional mapping between [`EntityRef`]s and linked-data URIs.
//!
//! URIs have the shape `{base}atom/{segment}/{id}`. The mapping is a
//! bijection over the supported entity types: [`UriMapper::parse`] accepts
//! exactly the strings [`UriMapper::build`] can produce and returns `None`
//! for everything else, including foreign namespaces and non-canonical ids.

use crate::entity::{EntityRef, EntityType};
use crate::error::UriError;

/// Path component between the base and the type segment.
const ATOM_SEGMENT: &str = "atom/";

/// Characters that cannot appear inside a SPARQL `<IRIREF>` or a string literal.
const FORBIDDEN: &[char] = &['<', '>', '"', '{', '}', '|', '^', '`', '\\', ' '];

/// Maps entities to URIs under a managed base namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriMapper {
    base: String,
}

impl UriMapper {
    /// Create a mapper for the given base namespace.
    ///
    /// A missing trailing `/` is added.
    pub fn new(base: impl Into<String>) -> Result<Self, UriError> {
        let mut base = base.into();
        let invalid = |reason: &str| UriError::InvalidBase {
            base: base.clone(),
            reason: reason.to_string(),
        };

        let rest = base
            .strip_prefix("https://")
            .or_else(|| base.strip_prefix("http://"))
            .ok_or_else(|| invalid("must start with http:// or https://"))?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(invalid("missing host"));
        }
        if base.contains(FORBIDDEN) || base.chars().any(char::is_control) {
            return Err(invalid("contains characters not allowed in an IRI"));
        }
        if base.contains(['?', '#']) {
            return Err(invalid("must not carry a query or fragment"));
        }

        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self { base })
    }

    /// The managed namespace, always ending in `/`.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Build the URI for an entity. Total and deterministic.
    pub fn build(&self, entity: EntityRef) -> String {
        format!(
            "{}{ATOM_SEGMENT}{}/{}",
            self.base,
            entity.entity_type.segment(),
            entity.entity_id
        )
    }

    /// Common prefix of every URI of one type, or of all managed URIs.
    pub fn prefix(&self, entity_type: Option<EntityType>) -> String {
        match entity_type {
            Some(t) => format!("{}{ATOM_SEGMENT}{}/", self.base, t.segment()),
            None => self.base.clone(),
        }
    }

    /// Parse a URI back into an entity.
    ///
    /// Returns `None` for URIs that are not ours; callers skip those.
    pub fn parse(&self, uri: &str) -> Option<EntityRef> {
        let rest = uri.strip_prefix(&self.base)?.strip_prefix(ATOM_SEGMENT)?;
        let (segment, id) = rest.split_once('/')?;
        let entity_type = EntityType::from_segment(segment)?;
        Some(EntityRef::new(entity_type, parse_canonical_id(id)?))
    }

    /// Whether the URI lies under the managed namespace at all.
    pub fn is_managed(&self, uri: &str) -> bool {
        uri.starts_with(&self.base)
    }
}

/// Decimal id with no sign, no leading zeros and no trailing path.
fn parse_canonical_id(id: &str) -> Option<u64> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if id.len() > 1 && id.starts_with('0') {
        return None;
    }
    id.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> UriMapper {
        UriMapper::new("https://example.org/ric/").unwrap()
    }

    #[test]
    fn recordset_scenario() {
        let uri = mapper().build(EntityRef::information_object(42));
        assert_eq!(uri, "https://example.org/ric/atom/recordset/42");
    }

    #[test]
    fn bijection_over_all_types() {
        let m = mapper();
        for t in EntityType::ALL {
            for id in [0, 1, 42, 77, 1_000_000, u64::MAX] {
                let e = EntityRef::new(t, id);
                let uri = m.build(e);
                assert_eq!(m.parse(&uri), Some(e));
            }
        }
    }

    #[test]
    fn trailing_slash_is_added() {
        let m = UriMapper::new("https://example.org/ric").unwrap();
        assert_eq!(m.base(), "https://example.org/ric/");
        assert_eq!(
            m.build(EntityRef::new(EntityType::Actor, 5)),
            "https://example.org/ric/atom/agent/5"
        );
    }

    #[test]
    fn foreign_and_malformed_uris_do_not_parse() {
        let m = mapper();
        for uri in [
            "https://other.org/ric/atom/recordset/1",
            "https://example.org/ric/atom/place/1",
            "https://example.org/ric/atom/recordset/",
            "https://example.org/ric/atom/recordset/abc",
            "https://example.org/ric/atom/recordset/+1",
            "https://example.org/ric/atom/recordset/007",
            "https://example.org/ric/atom/recordset/1/extra",
            "https://example.org/ric/recordset/1",
            "https://example.org/ric/atom/recordset/99999999999999999999999",
            "",
        ] {
            assert_eq!(m.parse(uri), None, "{uri} should not parse");
        }
    }

    #[test]
    fn relational_names_are_not_segments() {
        assert_eq!(
            mapper().parse("https://example.org/ric/atom/informationobject/3"),
            None
        );
    }

    #[test]
    fn invalid_bases_are_rejected() {
        for base in [
            "ftp://example.org/ric/",
            "https://",
            "https:///ric",
            "https://example.org/r ic/",
            "https://example.org/<ric>/",
            "https://example.org/ric?x=1",
        ] {
            assert!(UriMapper::new(base).is_err(), "{base} should be rejected");
        }
    }

    #[test]
    fn managed_namespace_check() {
        let m = mapper();
        assert!(m.is_managed("https://example.org/ric/atom/agent/1"));
        assert!(!m.is_managed("https://example.org/other/1"));
        assert_eq!(
            m.prefix(Some(EntityType::Repository)),
            "https://example.org/ric/atom/corporatebody/"
        );
        assert_eq!(m.prefix(None), "https://example.org/ric/");
    }
}
