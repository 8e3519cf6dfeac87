//! Record repository interface consumed by the rotation orchestrator.
//!
//! Each record type that carries encrypted fields gets one adapter
//! implementing [`RecordRepository`]. Adapters are registered with the
//! orchestrator up front; the orchestrator never looks record types up by name.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::envelope::EnvelopeBlob;
use crate::error::RepositoryError;

/// Encrypted fields of one record, by field name. `None` is a null field.
pub type EncryptedFields = BTreeMap<String, Option<EnvelopeBlob>>;

/// A persisted record as the orchestrator sees it: an id, the key version
/// tag stored next to its encrypted fields, and the fields themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub id: String,
    pub key_version: u32,
    pub fields: EncryptedFields,
}

impl EncryptedRecord {
    pub fn new(id: impl Into<String>, key_version: u32) -> Self {
        Self {
            id: id.into(),
            key_version,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, blob: Option<EnvelopeBlob>) -> Self {
        self.fields.insert(name.into(), blob);
        self
    }
}

/// Storage for one record type holding encrypted fields.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Stable name used in logs and failure reports, e.g. `"patients"`.
    fn name(&self) -> &str;

    /// All records whose `key_version` tag equals `version`.
    async fn find_by_key_version(
        &self,
        version: u32,
    ) -> Result<Vec<EncryptedRecord>, RepositoryError>;

    /// Replace the encrypted fields of record `id` and retag it with
    /// `key_version` in one write.
    async fn update_encrypted_fields(
        &self,
        id: &str,
        fields: EncryptedFields,
        key_version: u32,
    ) -> Result<(), RepositoryError>;
}

/// A repository held in process memory, for tests and small deployments.
pub struct InMemoryRepository {
    name: String,
    records: Mutex<BTreeMap<String, EncryptedRecord>>,
}

impl InMemoryRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: EncryptedRecord) {
        self.records.lock().insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<EncryptedRecord> {
        self.records.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RecordRepository for InMemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_by_key_version(
        &self,
        version: u32,
    ) -> Result<Vec<EncryptedRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.key_version == version)
            .cloned()
            .collect())
    }

    async fn update_encrypted_fields(
        &self,
        id: &str,
        fields: EncryptedFields,
        key_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        record.fields = fields;
        record.key_version = key_version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_filters_by_version_tag() {
        let repo = InMemoryRepository::new("visits");
        repo.insert(EncryptedRecord::new("a", 1));
        repo.insert(EncryptedRecord::new("b", 2));
        repo.insert(EncryptedRecord::new("c", 1));

        let found = repo.find_by_key_version(1).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_update_retags_record() {
        let repo = InMemoryRepository::new("visits");
        repo.insert(EncryptedRecord::new("a", 1).with_field("notes", None));

        let mut fields = EncryptedFields::new();
        fields.insert("notes".into(), Some(EnvelopeBlob::from_encoded("AQID")));
        repo.update_encrypted_fields("a", fields, 2).await.unwrap();

        let updated = repo.get("a").unwrap();
        assert_eq!(updated.key_version, 2);
        assert_eq!(
            updated.fields["notes"],
            Some(EnvelopeBlob::from_encoded("AQID"))
        );
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let repo = InMemoryRepository::new("visits");
        assert!(matches!(
            repo.update_encrypted_fields("ghost", EncryptedFields::new(), 2).await,
            Err(RepositoryError::NotFound(id)) if id == "ghost"
        ));
    }
}
