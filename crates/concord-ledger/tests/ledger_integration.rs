//! Durable ledger scenarios: reload, on-disk tampering, concurrent writers.
//!
//! Sled holds a per-process lock on its directory that is released
//! asynchronously after the last handle drops. Scenarios that need a fresh
//! view of the same data keep one `sled::Db` and rebuild the store from it.

use concord_ledger::storage::{sequence_key, BlockStorage};
use concord_ledger::{BreakKind, EventType, LedgerBlock, LedgerError, LedgerStore};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn fill(ledger: &LedgerStore, n: u64) {
    for i in 0..n {
        ledger
            .append_event(EventType::PipelineStep, &json!({"step": i}))
            .unwrap();
    }
}

fn reload(db: &sled::Db) -> Result<LedgerStore, LedgerError> {
    LedgerStore::with_storage(BlockStorage::from_db(db.clone())?)
}

#[test]
fn test_reload_preserves_chain() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("ledger")).unwrap();

    let tail = {
        let ledger = reload(&db).unwrap();
        fill(&ledger, 4);
        ledger.flush().unwrap();
        ledger.tail().unwrap().unwrap()
    };

    let ledger = reload(&db).unwrap();
    assert_eq!(ledger.len().unwrap(), 4);
    assert_eq!(ledger.tail().unwrap().unwrap(), tail);

    let next = ledger
        .append_event(EventType::Verification, &json!({"after": "reload"}))
        .unwrap();
    assert_eq!(next.sequence, 4);
    assert_eq!(next.previous_hash, tail.current_hash);
    assert!(ledger.verify_chain(0, None).unwrap().ok);
}

#[test]
fn test_open_by_path_persists() {
    let dir = TempDir::new().unwrap();
    let ledger = LedgerStore::open(dir.path().join("ledger"))
        .unwrap()
        .with_flush_on_append(true);
    fill(&ledger, 2);

    let storage = ledger.storage().unwrap();
    assert_eq!(storage.len(), 2);
    assert_eq!(storage.load_all().unwrap(), ledger.blocks(0, None).unwrap());
}

#[test]
fn test_on_disk_tamper_detected_after_reload() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("ledger")).unwrap();

    fill(&reload(&db).unwrap().with_flush_on_append(true), 5);

    let tree = db.open_tree("blocks").unwrap();
    let raw = tree.get(sequence_key(1)).unwrap().unwrap();
    let mut block: LedgerBlock = serde_json::from_slice(&raw).unwrap();
    block.payload.insert("step".to_string(), json!("rewritten"));
    tree.insert(sequence_key(1), serde_json::to_vec(&block).unwrap())
        .unwrap();

    let ledger = reload(&db).unwrap();
    let report = ledger.verify_chain(0, None).unwrap();
    assert!(!report.ok);
    assert_eq!(report.first_break, Some(2));
    assert_eq!(report.break_kind, Some(BreakKind::BrokenLink));

    assert!(matches!(
        ledger.ensure_integrity(0, None),
        Err(LedgerError::ChainIntegrity { sequence: 2, .. })
    ));
}

#[test]
fn test_on_disk_removal_rejected_on_reload() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("ledger")).unwrap();

    fill(&reload(&db).unwrap(), 3);

    db.open_tree("blocks")
        .unwrap()
        .remove(sequence_key(1))
        .unwrap();

    assert!(matches!(reload(&db), Err(LedgerError::Corrupt(_))));
}

#[test]
fn test_concurrent_durable_appends() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(LedgerStore::open(dir.path().join("ledger")).unwrap());

    std::thread::scope(|scope| {
        for w in 0..4 {
            let ledger = Arc::clone(&ledger);
            scope.spawn(move || {
                for i in 0..10 {
                    ledger
                        .append_event(EventType::PipelineStep, &json!({"w": w, "i": i}))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(ledger.len().unwrap(), 40);
    assert!(ledger.verify_chain(0, None).unwrap().ok);
}
