//! Tests for the pluggable AuditSink / forward sink functionality.

mod common;

use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use phivault::audit::{AuditEvent, AuditRecord, AuditSink, FileAuditSink};
use phivault::repository::{EncryptedRecord, InMemoryRepository};
use phivault::{EnvelopeBlob, RotationStatus, RotationTrigger, VaultConfig};

use common::{bootstrapped_vault, bootstrapped_vault_with, test_config};

/// A test sink that collects records into a shared Vec.
struct SharedVecSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl SharedVecSink {
    fn new(records: Arc<Mutex<Vec<AuditRecord>>>) -> Self {
        Self { records }
    }
}

impl AuditSink for SharedVecSink {
    fn append(&mut self, record: AuditRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[tokio::test]
async fn test_forward_sink_receives_rotation_results() {
    let mut vault = bootstrapped_vault();
    let records = Arc::new(Mutex::new(Vec::new()));
    vault.add_audit_sink(Box::new(SharedVecSink::new(Arc::clone(&records))));

    let repo = Arc::new(InMemoryRepository::new("patients"));
    repo.insert(EncryptedRecord::new("p1", 1).with_field("ssn", vault.encrypt("078-05-1120").unwrap()));
    vault.register_repository(repo);

    vault
        .trigger_rotation(RotationTrigger::Scheduled)
        .await
        .unwrap();

    // Primary log has the record
    assert_eq!(vault.audit_log().len(), 1);

    // Forward sink also received the record
    let collected = records.lock().unwrap();
    assert_eq!(collected.len(), 1);
    match &collected[0].event {
        AuditEvent::RotationFinished(result) => {
            assert_eq!(result.status, RotationStatus::Complete);
            assert_eq!(result.records_succeeded, 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_forward_sink_receives_decrypt_failures() {
    let vault = bootstrapped_vault();
    let records = Arc::new(Mutex::new(Vec::new()));
    vault.add_audit_sink(Box::new(SharedVecSink::new(Arc::clone(&records))));

    // Structurally valid envelope naming a version that was never issued.
    let mut bytes = vec![0u8; phivault::envelope::HEADER_LEN + 4];
    bytes[0] = 9;
    let blob = EnvelopeBlob::from_encoded(BASE64.encode(bytes));
    assert!(vault.decrypt(&blob).is_err());

    // Malformed input is data corruption, not a security event.
    assert!(vault.decrypt(&EnvelopeBlob::from_encoded("AAAA")).is_err());

    let collected = records.lock().unwrap();
    assert_eq!(collected.len(), 1);
    assert_eq!(
        collected[0].event,
        AuditEvent::UnknownKeyVersion { key_version: 9 }
    );
}

#[tokio::test]
async fn test_file_sink_persists_rotation_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rotation-audit.jsonl");

    let vault = bootstrapped_vault();
    vault.add_audit_sink(Box::new(FileAuditSink::new(&path).unwrap()));
    vault
        .trigger_rotation(RotationTrigger::Scheduled)
        .await
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let line = contents.lines().next().unwrap();
    let value: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(value["event"], "rotation_finished");
    assert_eq!(value["status"], "COMPLETE");
    assert_eq!(value["previous_version"], 1);
    assert_eq!(value["new_version"], 2);

    let record: AuditRecord = serde_json::from_str(line).unwrap();
    assert!(matches!(record.event, AuditEvent::RotationFinished(_)));
}

#[test]
fn test_in_memory_log_is_bounded_but_sinks_see_everything() {
    let vault = bootstrapped_vault_with(VaultConfig {
        audit_log_capacity: 3,
        ..test_config()
    });
    let records = Arc::new(Mutex::new(Vec::new()));
    vault.add_audit_sink(Box::new(SharedVecSink::new(Arc::clone(&records))));

    let mut bytes = vec![0u8; phivault::envelope::HEADER_LEN + 4];
    bytes[0] = 9;
    let blob = EnvelopeBlob::from_encoded(BASE64.encode(bytes));
    for _ in 0..10 {
        assert_eq!(vault.codec().decrypt_or_marker(&blob), phivault::UNDECRYPTABLE_MARKER);
    }

    assert_eq!(vault.audit_log().len(), 3);
    assert_eq!(records.lock().unwrap().len(), 10);
}
