// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # ric-sync
//!
//! Keeps a RiC-O linked-data mirror in a SPARQL triple store consistent with
//! the hierarchical relational store it was published from.
//!
//! ## Architecture
//!
//! - **URI mapping** (`uri`): bijection between entities and resource URIs
//! - **Protocol client** (`sparql`): SPARQL 1.1 over HTTP (ureq) or in-process (oxigraph)
//! - **Propagation** (`propagate`, `hierarchy`): deletes and moves, pushed as they happen
//! - **Auditing** (`audit`, `repair`): orphan, missing-record and hierarchy scans plus cleanup
//! - **Ledger** (`ledger`): sync status, audit log and orphan tracking in redb
//!
//! The relational store is authoritative and is read through [`records::RecordSource`].
//! Writes to the two stores are never atomic: every propagation may leave them
//! briefly out of step, and the auditor is what brings them back together.
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ric_sync::config::SyncConfig;
//! use ric_sync::engine::SyncEngine;
//! use ric_sync::entity::EntityRef;
//! use ric_sync::records::MemoryRecords;
//!
//! let config = SyncConfig::load("ric-sync.toml".as_ref()).unwrap();
//! let records = Arc::new(MemoryRecords::new());
//! let engine = SyncEngine::new(&config, records).unwrap();
//!
//! // after the host has deleted information object 42
//! let removed = engine.on_delete(EntityRef::information_object(42), true);
//! let report = engine.run_integrity_check().unwrap();
//! println!("{removed:?} triples removed, clean: {}", report.is_clean());
//! ```

pub mod audit;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod hierarchy;
pub mod ledger;
pub mod propagate;
pub mod records;
pub mod repair;
pub mod sparql;
pub mod telemetry;
pub mod uri;
