//! Audit trail.
//!
//! Records every rotation run and every security-relevant decrypt failure.
//! Forward sinks receive every record; the in-memory log only keeps the most
//! recent ones. Attach a sink for anything that must be retained.

use std::collections::{vec_deque, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::rotation::RotationResult;

/// A sink that receives audit records. Implement this to forward records
/// to a file, database, message queue or other persistent store.
pub trait AuditSink: Send {
    /// Append a record. Called for every event the vault reports.
    fn append(&mut self, record: AuditRecord);
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A rotation run finished, complete or partial.
    RotationFinished(RotationResult),
    /// An envelope failed tag verification. May indicate tampering.
    AuthenticationFailed { key_version: u32 },
    /// An envelope named a key version the registry no longer holds.
    UnknownKeyVersion { key_version: u32 },
}

/// A permanent record of a reported event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(flatten)]
    pub event: AuditEvent,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Stamp `event` with the current time.
    pub fn now(event: AuditEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Records kept in memory when no capacity is configured.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1_024;

/// A bounded log of recently reported events. Once full, the oldest record
/// is dropped for each new one.
/// Can forward records to additional sinks via `add_forward_sink`.
pub struct AuditLog {
    records: VecDeque<AuditRecord>,
    capacity: usize,
    forward_sinks: Vec<Box<dyn AuditSink>>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

/// The audit log as shared by the codec and the orchestrator.
pub type SharedAuditLog = Arc<Mutex<AuditLog>>;

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("records", &self.records)
            .field("capacity", &self.capacity)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` records in memory. Zero keeps none, so
    /// records only reach the forward sinks.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
            capacity,
            forward_sinks: Vec::new(),
        }
    }

    /// A new, empty log ready to be shared.
    pub fn shared() -> SharedAuditLog {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn shared_with_capacity(capacity: usize) -> SharedAuditLog {
        Arc::new(Mutex::new(Self::with_capacity(capacity)))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a sink to receive a copy of every record without replacing the
    /// in-memory log.
    pub fn add_forward_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.forward_sinks.push(sink);
    }

    /// Forward a record to any attached sinks and keep it in memory,
    /// evicting the oldest record if the log is full.
    pub fn append(&mut self, record: AuditRecord) {
        for sink in self.forward_sinks.iter_mut() {
            sink.append(record.clone());
        }
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Return the number of records in the log.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the retained records, oldest first.
    pub fn iter(&self) -> vec_deque::Iter<'_, AuditRecord> {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes audit records as JSON lines (one per record) to a file.
/// Creates the file if it doesn't exist; appends if it does.
pub struct FileAuditSink {
    file: std::fs::File,
}

impl FileAuditSink {
    /// Open or create a file for append-only audit logging.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&mut self, record: AuditRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => {
                if let Err(err) = writeln!(self.file, "{line}").and_then(|_| self.file.flush()) {
                    tracing::error!(error = %err, "failed to write audit record");
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to serialize audit record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let mut log = AuditLog::new();
        log.add_forward_sink(Box::new(FileAuditSink::new(&path).unwrap()));
        log.append(AuditRecord::now(AuditEvent::AuthenticationFailed { key_version: 3 }));
        log.append(AuditRecord::now(AuditEvent::UnknownKeyVersion { key_version: 1 }));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event, AuditEvent::AuthenticationFailed { key_version: 3 });
        assert!(lines[1].contains("\"event\":\"unknown_key_version\""));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_full_log_evicts_oldest() {
        let mut log = AuditLog::with_capacity(2);
        for key_version in 1..=5 {
            log.append(AuditRecord::now(AuditEvent::UnknownKeyVersion { key_version }));
        }
        assert_eq!(log.len(), 2);
        let kept: Vec<_> = log.iter().map(|r| r.event.clone()).collect();
        assert_eq!(
            kept,
            vec![
                AuditEvent::UnknownKeyVersion { key_version: 4 },
                AuditEvent::UnknownKeyVersion { key_version: 5 },
            ]
        );
    }

    struct Counter(Arc<Mutex<usize>>);

    impl AuditSink for Counter {
        fn append(&mut self, _record: AuditRecord) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn test_zero_capacity_only_forwards() {
        let forwarded = Arc::new(Mutex::new(0));
        let mut log = AuditLog::with_capacity(0);
        log.add_forward_sink(Box::new(Counter(Arc::clone(&forwarded))));
        for _ in 0..3 {
            log.append(AuditRecord::now(AuditEvent::AuthenticationFailed { key_version: 1 }));
        }
        assert!(log.is_empty());
        assert_eq!(*forwarded.lock(), 3);
    }
}
