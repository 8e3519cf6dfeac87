//! Key rotation and online re-encryption.
//!
//! A rotation run:
//! 1. Generates generation `current + 1` and promotes it. The outgoing
//!    generation stays registered as previous.
//! 2. Sweeps every registered repository for records tagged with the
//!    outgoing version, re-encrypting each under the new generation.
//! 3. Retires the outgoing generation only if every record migrated.
//!
//! A failed record never aborts the run; it is reported and the outgoing
//! generation is kept so the record stays readable. The next run sees the
//! retained generation and resumes the sweep instead of generating another
//! key, so `promote` never discards a generation that still has records.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, AuditRecord, SharedAuditLog};
use crate::config::VaultConfig;
use crate::envelope::EnvelopeCodec;
use crate::error::{PhiVaultError, RepositoryError, Result};
use crate::keys::{KeyGeneration, KeySecret};
use crate::repository::{EncryptedFields, EncryptedRecord, RecordRepository};

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationStatus {
    /// Every record migrated and the outgoing generation was released.
    Complete,
    /// Some records are still on the outgoing generation, which is retained.
    Partial,
}

/// A record that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub repository: String,
    pub id: String,
    pub reason: String,
}

/// A repository that could not be queried at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFailure {
    pub repository: String,
    pub reason: String,
}

/// The audit artifact of one rotation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationResult {
    /// The outgoing generation records were migrated from.
    pub previous_version: u32,
    /// The generation records were migrated to.
    pub new_version: u32,
    pub status: RotationStatus,
    /// True when this run resumed an earlier partial run instead of
    /// generating a new key.
    pub resumed: bool,
    pub records_attempted: usize,
    pub records_succeeded: usize,
    pub records_failed: Vec<RecordFailure>,
    pub repositories_failed: Vec<RepositoryFailure>,
    /// Whether the outgoing generation was discarded from the registry.
    pub outgoing_retired: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RotationResult {
    pub fn is_complete(&self) -> bool {
        self.status == RotationStatus::Complete
    }
}

/// Why a single record did not migrate.
#[derive(Debug, Error)]
enum MigrationFailure {
    #[error("re-encryption failed: {0}")]
    Reencrypt(#[from] PhiVaultError),
    #[error("persisting failed: {0}")]
    Persist(#[from] RepositoryError),
    #[error("persisting timed out after {0:?}")]
    TimedOut(Duration),
    #[error("re-encryption task aborted")]
    Aborted,
    #[error("still tagged with the outgoing key version after the sweep")]
    StillOutstanding,
}

/// Per-record result of a sweep.
enum RecordOutcome {
    Migrated,
    Failed(MigrationFailure),
}

/// Drives rotation runs over a fixed set of repositories.
pub struct RotationOrchestrator {
    codec: EnvelopeCodec,
    repositories: Vec<Arc<dyn RecordRepository>>,
    audit: SharedAuditLog,
    record_timeout: Duration,
    concurrency: usize,
    in_progress: tokio::sync::Mutex<()>,
}

impl RotationOrchestrator {
    pub fn new(codec: EnvelopeCodec, audit: SharedAuditLog, config: &VaultConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            codec,
            repositories: Vec::new(),
            audit,
            record_timeout: config.record_timeout(),
            concurrency: config.migration_concurrency,
            in_progress: tokio::sync::Mutex::new(()),
        })
    }

    /// Register a repository whose records are migrated on every run.
    pub fn register(&mut self, repository: Arc<dyn RecordRepository>) {
        self.repositories.push(repository);
    }

    pub fn with_repository(mut self, repository: Arc<dyn RecordRepository>) -> Self {
        self.register(repository);
        self
    }

    /// Returns true while a run holds the rotation lock.
    pub fn is_rotating(&self) -> bool {
        self.in_progress.try_lock().is_err()
    }

    /// Run one rotation.
    ///
    /// Fails fast with `RotationAlreadyInProgress` if another run is active.
    /// Per-record failures are reported in the result, not as errors; the
    /// call itself only fails for registry-level problems.
    pub async fn rotate(&self) -> Result<RotationResult> {
        let _guard = self
            .in_progress
            .try_lock()
            .map_err(|_| PhiVaultError::RotationAlreadyInProgress)?;

        let started_at = Utc::now();
        let registry = self.codec.registry();

        let (outgoing, incoming, resumed) = match registry.previous_version() {
            Some(retained) => (retained, registry.current_version()?, true),
            None => {
                let current = registry.current_version()?;
                let next = current
                    .checked_add(1)
                    .ok_or(PhiVaultError::VersionOverflow(current))?;
                registry.promote(KeyGeneration::new(next, KeySecret::generate()?))?;
                (current, next, false)
            }
        };
        info!(outgoing, incoming, resumed, "starting key rotation");

        let mut attempted = 0;
        let mut succeeded = 0;
        let mut records_failed = Vec::new();
        let mut repositories_failed = Vec::new();

        for repository in &self.repositories {
            let records = match repository.find_by_key_version(outgoing).await {
                Ok(records) => records,
                Err(err) => {
                    warn!(repository = repository.name(), error = %err, "repository lookup failed");
                    repositories_failed.push(RepositoryFailure {
                        repository: repository.name().to_string(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let outcomes: Vec<(String, RecordOutcome)> = stream::iter(records)
                .map(|record| self.migrate_record(&**repository, record, incoming))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (id, outcome) in outcomes {
                attempted += 1;
                match outcome {
                    RecordOutcome::Migrated => succeeded += 1,
                    RecordOutcome::Failed(reason) => {
                        warn!(
                            repository = repository.name(),
                            record_id = %id,
                            reason = %reason,
                            "record migration failed"
                        );
                        records_failed.push(RecordFailure {
                            repository: repository.name().to_string(),
                            id,
                            reason: reason.to_string(),
                        });
                    }
                }
            }
        }

        // Records written under the outgoing version while the sweep ran
        // would be lost with the key; confirm none are left before retiring.
        if records_failed.is_empty() && repositories_failed.is_empty() {
            for repository in &self.repositories {
                match repository.find_by_key_version(outgoing).await {
                    Ok(stragglers) => {
                        for record in stragglers {
                            attempted += 1;
                            records_failed.push(RecordFailure {
                                repository: repository.name().to_string(),
                                id: record.id,
                                reason: MigrationFailure::StillOutstanding.to_string(),
                            });
                        }
                    }
                    Err(err) => repositories_failed.push(RepositoryFailure {
                        repository: repository.name().to_string(),
                        reason: err.to_string(),
                    }),
                }
            }
        }

        let status = if records_failed.is_empty() && repositories_failed.is_empty() {
            RotationStatus::Complete
        } else {
            RotationStatus::Partial
        };

        let outgoing_retired = match status {
            RotationStatus::Complete => match registry.retire(outgoing) {
                Ok(retired) => retired,
                Err(err) => {
                    error!(version = outgoing, error = %err, "failed to retire outgoing key generation");
                    false
                }
            },
            RotationStatus::Partial => false,
        };

        let result = RotationResult {
            previous_version: outgoing,
            new_version: incoming,
            status,
            resumed,
            records_attempted: attempted,
            records_succeeded: succeeded,
            records_failed,
            repositories_failed,
            outgoing_retired,
            started_at,
            finished_at: Utc::now(),
        };

        match result.status {
            RotationStatus::Complete => info!(
                outgoing,
                incoming,
                migrated = result.records_succeeded,
                "key rotation complete"
            ),
            RotationStatus::Partial => warn!(
                outgoing,
                incoming,
                failed = result.records_failed.len(),
                "key rotation partial; outgoing generation retained"
            ),
        }

        self.audit
            .lock()
            .append(AuditRecord::now(AuditEvent::RotationFinished(result.clone())));

        Ok(result)
    }

    async fn migrate_record(
        &self,
        repository: &dyn RecordRepository,
        record: EncryptedRecord,
        version: u32,
    ) -> (String, RecordOutcome) {
        let EncryptedRecord { id, fields, .. } = record;
        let outcome = match self.migrate_fields(repository, &id, fields, version).await {
            Ok(()) => RecordOutcome::Migrated,
            Err(failure) => RecordOutcome::Failed(failure),
        };
        (id, outcome)
    }

    /// Key derivation runs unbounded on the blocking pool; only the write
    /// back to the repository is held to `record_timeout`.
    async fn migrate_fields(
        &self,
        repository: &dyn RecordRepository,
        id: &str,
        fields: EncryptedFields,
        version: u32,
    ) -> std::result::Result<(), MigrationFailure> {
        let codec = self.codec.clone();
        let migrated = tokio::task::spawn_blocking(move || {
            reencrypt_fields(&codec, &fields, version)
        })
        .await
        .map_err(|_| MigrationFailure::Aborted)??;

        tokio::time::timeout(
            self.record_timeout,
            repository.update_encrypted_fields(id, migrated, version),
        )
        .await
        .map_err(|_| MigrationFailure::TimedOut(self.record_timeout))??;
        Ok(())
    }
}

/// Re-encrypt every non-null field under `version`. All or nothing: one
/// bad field fails the record.
fn reencrypt_fields(
    codec: &EnvelopeCodec,
    fields: &EncryptedFields,
    version: u32,
) -> Result<EncryptedFields> {
    fields
        .iter()
        .map(|(name, blob)| {
            let migrated = match blob {
                Some(blob) => codec.reencrypt(blob, version)?,
                None => None,
            };
            Ok((name.clone(), migrated))
        })
        .collect()
}
