//! Persistence tests: ledger state survives an engine restart.

use std::sync::Arc;

use ric_sync::config::SyncConfig;
use ric_sync::engine::SyncEngine;
use ric_sync::entity::EntityRef;
use ric_sync::ledger::{OrphanStatus, SyncOperation, SyncStatus};
use ric_sync::records::MemoryRecords;
use ric_sync::sparql::embedded::EmbeddedTransport;

fn persistent_engine(dir: &std::path::Path, records: &Arc<MemoryRecords>) -> SyncEngine {
    let mut config = SyncConfig::default();
    config.mapping.base_uri = "https://example.org/ric/".into();
    config.ledger.data_dir = Some(dir.join("ledger"));
    config.ledger.triggered_by = "nightly".into();
    SyncEngine::with_transport(
        &config,
        Box::new(EmbeddedTransport::open(&dir.join("graph")).unwrap()),
        records.clone(),
    )
    .unwrap()
}

#[test]
fn ledger_and_graph_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let records = Arc::new(MemoryRecords::new());
    records.insert(EntityRef::information_object(1), None);
    records.insert(EntityRef::information_object(10), Some(1));
    let ten = EntityRef::information_object(10);

    // First session: link, register, delete one record.
    {
        let engine = persistent_engine(dir.path(), &records);
        engine.update_hierarchy(ten).unwrap();
        engine.register_synced(ten).unwrap();
        assert!(engine.client().update(
            "INSERT DATA { <https://example.org/ric/atom/recordset/5> \
             <https://www.ica.org/standards/RiC/ontology#title> \"gone\" . }"
        ));
        engine.run_integrity_check().unwrap();
    }

    // Second session: everything is still there.
    {
        let engine = persistent_engine(dir.path(), &records);
        let status = engine.ledger().status(ten).unwrap().unwrap();
        assert_eq!(status.sync_status, SyncStatus::Synced);
        assert_eq!(status.hierarchy_path.as_deref(), Some("1/10"));

        let history = engine.sync_history(ten).unwrap();
        assert_eq!(history[0].operation, SyncOperation::HierarchyUpdate);
        assert_eq!(history[0].triggered_by, "nightly");

        let orphans = engine.ledger().orphans(Some(OrphanStatus::Detected)).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].expected, EntityRef::information_object(5));

        let stats = engine.sync_stats(None).unwrap();
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.by_operation[&SyncOperation::IntegrityCheck], 1);

        let cleaned = engine.cleanup_orphaned_triples(false).unwrap();
        assert_eq!(cleaned.triples_removed, 1);
    }
}
