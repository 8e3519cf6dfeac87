//! The vault: one registry, codec and orchestrator wired together.
//!
//! This is the surface the calling system holds. Rotation is only ever
//! started through [`PhiVault::trigger_rotation`], by an external scheduler
//! or an authorised operator.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::MutexGuard;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{AuditLog, AuditSink, SharedAuditLog};
use crate::config::VaultConfig;
use crate::envelope::{EnvelopeBlob, EnvelopeCodec};
use crate::error::Result;
use crate::keys::KeySecret;
use crate::registry::KeyRegistry;
use crate::repository::RecordRepository;
use crate::rotation::{RotationOrchestrator, RotationResult};
use crate::status::KeyStatus;

/// Who asked for a rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RotationTrigger {
    /// The external calendar scheduler.
    Scheduled,
    /// An operator, identified by the calling layer after its own access check.
    Manual { operator: String },
}

impl fmt::Display for RotationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual { operator } => write!(f, "manual ({operator})"),
        }
    }
}

/// Envelope encryption with versioned keys and rotation.
pub struct PhiVault {
    registry: Arc<KeyRegistry>,
    codec: EnvelopeCodec,
    orchestrator: RotationOrchestrator,
    audit: SharedAuditLog,
    config: VaultConfig,
}

impl PhiVault {
    /// Build a vault over `registry`. The registry may still need `bootstrap`.
    pub fn new(registry: Arc<KeyRegistry>, config: VaultConfig) -> Result<Self> {
        config.validate()?;

        let audit = AuditLog::shared_with_capacity(config.audit_log_capacity);
        let codec = EnvelopeCodec::new(Arc::clone(&registry), Arc::clone(&audit))
            .with_kdf_iterations(config.kdf_iterations);
        let orchestrator = RotationOrchestrator::new(codec.clone(), Arc::clone(&audit), &config)?;

        Ok(Self {
            registry,
            codec,
            orchestrator,
            audit,
            config,
        })
    }

    /// Register a repository to be migrated on every rotation.
    pub fn register_repository(&mut self, repository: Arc<dyn RecordRepository>) {
        self.orchestrator.register(repository);
    }

    /// Create generation 1. Fails if the registry already has a key.
    pub fn bootstrap(&self, secret: KeySecret) -> Result<u32> {
        self.registry.bootstrap(secret)
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// A codec handle for callers encrypting and decrypting fields.
    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Encrypt under the current generation. Empty input yields `None`.
    pub fn encrypt(&self, plaintext: &str) -> Result<Option<EnvelopeBlob>> {
        self.codec.encrypt(plaintext)
    }

    pub fn decrypt(&self, blob: &EnvelopeBlob) -> Result<String> {
        self.codec.decrypt(blob)
    }

    /// Forward every audit record to `sink` as well.
    pub fn add_audit_sink(&self, sink: Box<dyn AuditSink>) {
        self.audit.lock().add_forward_sink(sink);
    }

    /// Lock and return the in-memory audit log.
    pub fn audit_log(&self) -> MutexGuard<'_, AuditLog> {
        self.audit.lock()
    }

    /// Rotation entry point for schedulers and operators.
    pub async fn trigger_rotation(&self, trigger: RotationTrigger) -> Result<RotationResult> {
        info!(trigger = %trigger, "rotation triggered");
        self.orchestrator.rotate().await
    }

    /// Current key age and whether rotation is due.
    pub fn status(&self) -> Result<KeyStatus> {
        KeyStatus::at(&self.registry, self.config.rotation_interval_days, Utc::now())
    }
}
