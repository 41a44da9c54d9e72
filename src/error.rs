//! Rich diagnostic error types for the ric-sync engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so operators know what went wrong and
//! which side of the two stores needs attention.
//!
//! Transport failures are deliberately absent from the hot paths: the protocol
//! client converts them into empty result sets, [`UpdateOutcome`]s, or
//! [`Presence::Unknown`]. [`EndpointError`] only appears where a component has
//! to report that a write did not (or may not have) landed.
//!
//! [`UpdateOutcome`]: crate::sparql::UpdateOutcome
//! [`Presence::Unknown`]: crate::sparql::Presence::Unknown

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::records::RecordError;

/// Top-level error type for the sync engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Uri(#[from] UriError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Records(#[from] RecordError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// URI errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum UriError {
    #[error("invalid linked-data base URI \"{base}\": {reason}")]
    #[diagnostic(
        code(ric::uri::invalid_base),
        help(
            "The base URI must be an absolute http(s) IRI such as \
             `https://archives.example.org/ric/` and must not contain spaces, \
             quotes, angle brackets or braces."
        )
    )]
    InvalidBase { base: String, reason: String },

    #[error("unknown entity type \"{name}\"")]
    #[diagnostic(
        code(ric::uri::unknown_entity_type),
        help(
            "Supported entity types are: informationobject, actor, repository, \
             function, event. Unmapped types are rejected so that malformed URIs \
             never reach the graph store."
        )
    )]
    UnknownEntityType { name: String },
}

// ---------------------------------------------------------------------------
// Endpoint errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EndpointError {
    #[error("SPARQL endpoint {endpoint} is unreachable: {message}")]
    #[diagnostic(
        code(ric::endpoint::unreachable),
        help(
            "Check that the triple store is running and that `endpoint.url` in the \
             configuration points at the dataset (e.g. http://localhost:3030/ric)."
        )
    )]
    Unreachable { endpoint: String, message: String },

    #[error("SPARQL request was interrupted: {message}")]
    #[diagnostic(
        code(ric::endpoint::interrupted),
        help(
            "The request timed out or the connection dropped mid-transfer. A write \
             may or may not have been applied; the next integrity check will tell."
        )
    )]
    Interrupted { message: String },

    #[error("SPARQL endpoint rejected the update with HTTP {status}")]
    #[diagnostic(
        code(ric::endpoint::rejected),
        help(
            "The store answered with a non-2xx status. Check the credentials and \
             the server log of the triple store."
        )
    )]
    Rejected { status: u16 },

    #[error("outcome of SPARQL update is unknown: {reason}")]
    #[diagnostic(
        code(ric::endpoint::outcome_unknown),
        help(
            "Treat the resource as possibly partially updated. Run an integrity \
             check to reconcile the two stores."
        )
    )]
    OutcomeUnknown { reason: String },

    #[error("SPARQL read failed while {context}")]
    #[diagnostic(
        code(ric::endpoint::read_failed),
        help("The store could not be queried. No changes were made.")
    )]
    ReadFailed { context: String },

    #[error("embedded graph store error: {message}")]
    #[diagnostic(
        code(ric::endpoint::embedded),
        help("The in-process oxigraph store could not be created or opened.")
    )]
    Embedded { message: String },
}

// ---------------------------------------------------------------------------
// Ledger errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LedgerError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(ric::ledger::io),
        help(
            "A filesystem operation failed. Check that the ledger directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(ric::ledger::redb),
        help(
            "The embedded ledger database encountered a transaction error. \
             If the problem persists, move the ledger file aside and re-run an \
             integrity check to rebuild the orphan tracking state."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(ric::ledger::serde),
        help(
            "Failed to encode or decode a ledger record. This usually means the \
             ledger was written by an incompatible version."
        )
    )]
    Serialization { message: String },
}

/// Result type for engine operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsystem_errors_keep_their_codes() {
        let err: SyncError = EndpointError::Rejected { status: 503 }.into();
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("ric::endpoint::rejected"));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn unknown_entity_type_has_help() {
        let err = UriError::UnknownEntityType {
            name: "place".into(),
        };
        assert!(err.help().is_some());
        assert_eq!(err.to_string(), "unknown entity type \"place\"");
    }
}
