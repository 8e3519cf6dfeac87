//! Key generation registry.
//!
//! Holds the current generation and at most one previous generation. Reads
//! (`resolve`, `current`) take a shared lock and hand out a cheap clone of the
//! generation, so an in-flight decrypt keeps its key even if the generation is
//! retired right after. `promote` and `retire` are separate write-locked
//! steps; the rotation orchestrator only calls `retire` once nothing still
//! references the outgoing version.
//!
//! State is written through to a [`KeyStore`] before it becomes visible. A
//! failed save leaves the registry exactly as it was.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{PhiVaultError, Result};
use crate::keys::{KeyGeneration, KeyMetadata, KeySecret};

/// The full registry contents, as persisted by a [`KeyStore`].
#[derive(Debug, Clone)]
pub struct RegistryState {
    pub current: KeyGeneration,
    pub previous: Option<KeyGeneration>,
}

/// Backing storage for registry state. Implement this over a secrets
/// manager, HSM or KMS; the registry never decides where key bytes live.
pub trait KeyStore: Send + Sync {
    /// Load previously saved state, or `None` on first run.
    fn load(&self) -> Result<Option<RegistryState>>;

    /// Replace the saved state.
    fn save(&self, state: &RegistryState) -> Result<()>;
}

/// Process-local key store. State is lost when the process exits.
#[derive(Default)]
pub struct MemoryKeyStore {
    state: Mutex<Option<RegistryState>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<RegistryState>> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &RegistryState) -> Result<()> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }
}

/// Registry of live key generations.
pub struct KeyRegistry {
    store: Arc<dyn KeyStore>,
    state: RwLock<Option<RegistryState>>,
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl KeyRegistry {
    /// Open a registry over `store`, restoring any saved state.
    pub fn open(store: Arc<dyn KeyStore>) -> Result<Self> {
        let state = store.load()?;
        if let Some(ref restored) = state {
            debug!(
                current = restored.current.version(),
                previous = restored.previous.as_ref().map(KeyGeneration::version),
                "restored key registry"
            );
        }
        Ok(Self {
            store,
            state: RwLock::new(state),
        })
    }

    /// A registry over a fresh [`MemoryKeyStore`].
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryKeyStore::new()),
            state: RwLock::new(None),
        }
    }

    /// Create generation 1 from `secret`.
    ///
    /// Fails with `RegistryAlreadyExists` if this registry or its store
    /// already holds state, so an existing key is never replaced by accident.
    pub fn bootstrap(&self, secret: KeySecret) -> Result<u32> {
        let mut state = self.state.write();
        if state.is_some() || self.store.load()?.is_some() {
            return Err(PhiVaultError::RegistryAlreadyExists);
        }

        let initial = RegistryState {
            current: KeyGeneration::new(1, secret),
            previous: None,
        };
        self.store.save(&initial)?;
        *state = Some(initial);

        info!(version = 1, "bootstrapped key registry");
        Ok(1)
    }

    /// Returns true once a current generation exists.
    pub fn is_bootstrapped(&self) -> bool {
        self.state.read().is_some()
    }

    /// The generation new envelopes are written under.
    pub fn current(&self) -> Result<KeyGeneration> {
        self.state
            .read()
            .as_ref()
            .map(|s| s.current.clone())
            .ok_or(PhiVaultError::RegistryNotBootstrapped)
    }

    pub fn current_version(&self) -> Result<u32> {
        self.current().map(|g| g.version())
    }

    /// The retained previous generation, if any.
    pub fn previous(&self) -> Option<KeyGeneration> {
        self.state.read().as_ref().and_then(|s| s.previous.clone())
    }

    pub fn previous_version(&self) -> Option<u32> {
        self.previous().map(|g| g.version())
    }

    /// Look up a generation by version.
    pub fn resolve(&self, version: u32) -> Result<KeyGeneration> {
        let state = self.state.read();
        let state = state
            .as_ref()
            .ok_or(PhiVaultError::UnknownKeyVersion(version))?;

        if state.current.version() == version {
            return Ok(state.current.clone());
        }
        match state.previous {
            Some(ref previous) if previous.version() == version => Ok(previous.clone()),
            _ => Err(PhiVaultError::UnknownKeyVersion(version)),
        }
    }

    /// Make `generation` current and demote the old current to previous.
    ///
    /// Whatever was previous before the call is discarded; its version is
    /// returned. `generation` must carry version `current + 1` and fit in the
    /// envelope version byte.
    pub fn promote(&self, generation: KeyGeneration) -> Result<Option<u32>> {
        let mut state = self.state.write();
        let existing = state.as_ref().ok_or(PhiVaultError::RegistryNotBootstrapped)?;

        let expected = existing.current.version().saturating_add(1);
        if generation.version() != expected {
            return Err(PhiVaultError::InvalidGeneration {
                expected,
                got: generation.version(),
            });
        }
        if u8::try_from(generation.version()).is_err() {
            return Err(PhiVaultError::VersionOverflow(generation.version()));
        }

        let discarded = existing.previous.as_ref().map(KeyGeneration::version);
        let next = RegistryState {
            previous: Some(existing.current.demoted(Utc::now())),
            current: generation,
        };
        self.store.save(&next)?;

        if let Some(version) = discarded {
            warn!(version, "promotion discarded previous key generation");
        }
        info!(
            current = next.current.version(),
            previous = existing.current.version(),
            "promoted key generation"
        );
        *state = Some(next);
        Ok(discarded)
    }

    /// Discard the previous generation if it is exactly `version`.
    ///
    /// Returns whether anything was discarded. Envelopes written under the
    /// retired version fail with `UnknownKeyVersion` afterwards.
    pub fn retire(&self, version: u32) -> Result<bool> {
        let mut state = self.state.write();
        let existing = match state.as_ref() {
            Some(existing) => existing,
            None => return Ok(false),
        };

        match existing.previous {
            Some(ref previous) if previous.version() == version => {}
            _ => {
                debug!(version, "retire requested for a version that is not previous");
                return Ok(false);
            }
        }

        let next = RegistryState {
            current: existing.current.clone(),
            previous: None,
        };
        self.store.save(&next)?;
        *state = Some(next);

        info!(version, "retired key generation");
        Ok(true)
    }

    /// Secret-free view of current and previous generations.
    pub fn metadata(&self) -> Option<(KeyMetadata, Option<KeyMetadata>)> {
        self.state.read().as_ref().map(|s| {
            (
                s.current.metadata(),
                s.previous.as_ref().map(KeyGeneration::metadata),
            )
        })
    }
}
