//! Response backends for the virtual ECU.
//!
//! A backend turns a raw UDS request into an optional response. Two kinds
//! exist: [`StorageBackend`] replays canned pairs from a dataset file and
//! [`SyntheticBackend`] derives plausible answers from a seed. Both share
//! the universal default-response pipeline in [`defaults`].

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use serde_json::{Map, Value as JsonValue};
use tracing::info;

use crate::error::{EvaluationError, LaunchError};
use crate::overrides::AttributeValue;
use crate::schema::{self, AttributeScope};
use crate::uds::ServiceId;

mod defaults;
mod selector;
mod storage;
mod synthetic;

pub use defaults::ResponseDefaults;
pub use selector::{build_backend, resolve_overrides};
pub use storage::StorageBackend;
pub use synthetic::SyntheticBackend;

/// Seed used by the synthetic backend when none is given on the command line.
///
/// Drawn once per process so every report of the run names the same value.
static PROCESS_SEED: Lazy<u64> = Lazy::new(|| rand::random());

pub fn process_seed() -> u64 {
    *PROCESS_SEED
}

/// Backend variant selected for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    StorageBacked,
    Synthetic,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::StorageBacked => f.write_str("storage-backed"),
            BackendKind::Synthetic => f.write_str("synthetic"),
        }
    }
}

/// Configuration of the dataset-driven backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageBackedConfig {
    pub path: PathBuf,
    pub unit_name: Option<String>,
    pub properties: Option<Map<String, JsonValue>>,
}

/// Configuration of the seeded backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: process_seed(),
        }
    }
}

/// Typed configuration for exactly one backend kind.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    StorageBacked(StorageBackedConfig),
    Synthetic(SyntheticConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::StorageBacked(_) => BackendKind::StorageBacked,
            BackendConfig::Synthetic(_) => BackendKind::Synthetic,
        }
    }
}

/// Trait implemented by response backends.
///
/// `setup` acquires whatever the backend needs (dataset contents, derived
/// state) and `teardown` releases it. `teardown` must tolerate a `setup`
/// that failed halfway.
pub trait UdsBackend: Send {
    fn kind(&self) -> BackendKind;

    fn defaults(&self) -> &ResponseDefaults;

    fn defaults_mut(&mut self) -> &mut ResponseDefaults;

    fn setup(&mut self) -> Result<(), LaunchError>;

    fn teardown(&mut self) -> Result<(), LaunchError>;

    fn supports_service(&self, sid: ServiceId) -> bool;

    fn supports_sub_function(&self, sid: ServiceId, sub_function: u8) -> bool;

    /// Backend-specific answer, consulted after the default-response checks.
    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>>;

    /// Apply a backend-specific attribute. Universal attributes never reach
    /// this method.
    fn apply_specific(&mut self, name: &str, value: AttributeValue) -> Result<(), LaunchError>;

    /// Apply any attribute declared for this backend kind.
    fn apply_attribute(&mut self, name: &str, value: AttributeValue) -> Result<(), LaunchError> {
        let kind = self.kind();
        let spec = schema::lookup(kind, name).ok_or_else(|| LaunchError::UnknownAttribute {
            kind,
            name: name.to_string(),
        })?;
        if value.kind() != spec.kind {
            return Err(LaunchError::Evaluation {
                attribute: name.to_string(),
                source: EvaluationError::TypeMismatch {
                    expected: "a value of the attribute's declared kind",
                    found: format!("a {} value", value.kind()),
                },
            });
        }
        match spec.scope {
            AttributeScope::Universal => self.defaults_mut().apply(kind, name, value),
            AttributeScope::Synthetic => self.apply_specific(name, value),
        }
    }

    /// Full request handling: default responses, then [`UdsBackend::respond`].
    fn handle_request(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        defaults::handle_request(self, request)
    }
}

/// The constructed backend with all overrides applied.
///
/// Cloning yields another handle to the same backend; the transport binding
/// holds one for request handling while the lifecycle drives setup and
/// teardown through another.
#[derive(Clone)]
pub struct ResolvedBackend {
    kind: BackendKind,
    inner: Arc<Mutex<Box<dyn UdsBackend>>>,
}

impl ResolvedBackend {
    pub fn new(backend: Box<dyn UdsBackend>) -> Self {
        Self {
            kind: backend.kind(),
            inner: Arc::new(Mutex::new(backend)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn setup(&self) -> Result<(), LaunchError> {
        self.lock()?.setup()?;
        info!(backend = %self.kind, "backend setup complete");
        Ok(())
    }

    pub fn teardown(&self) -> Result<(), LaunchError> {
        self.lock()?.teardown()?;
        info!(backend = %self.kind, "backend torn down");
        Ok(())
    }

    /// Handle one request. The lock is never held across an await point.
    pub fn handle(&self, request: &[u8]) -> Result<Option<Vec<u8>>, LaunchError> {
        Ok(self.lock()?.handle_request(request))
    }

    /// Run `f` against the backend, e.g. to inspect state in tests.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn UdsBackend) -> R) -> Result<R, LaunchError> {
        let mut guard = self.lock()?;
        Ok(f(guard.as_mut()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn UdsBackend>>, LaunchError> {
        self.inner.lock().map_err(|_| LaunchError::BackendPoisoned)
    }
}

impl fmt::Debug for ResolvedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedBackend")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
