//! Dataset-driven backend replaying recorded request/response pairs.
//!
//! Dataset format (JSON):
//!
//! ```json
//! {
//!   "properties": { "variant": "eu" },
//!   "records": [
//!     { "ecu": "engine", "session": 1, "request": "22f190", "response": "62f190...",
//!       "properties": { "variant": "eu" } }
//!   ]
//! }
//! ```
//!
//! `ecu`, `session` and `properties` are optional on every record.

use std::fs;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

use crate::error::LaunchError;
use crate::overrides::AttributeValue;
use crate::uds::{self, ServiceId, SUPPRESS_POSITIVE_RESPONSE};

use super::{BackendKind, ResponseDefaults, StorageBackedConfig, UdsBackend};

const DEFAULT_SESSION: u8 = 0x01;

#[derive(Debug, Deserialize)]
struct Dataset {
    #[serde(default)]
    properties: Map<String, JsonValue>,
    records: Vec<DatasetRecord>,
}

#[derive(Debug, Deserialize)]
struct DatasetRecord {
    #[serde(default)]
    ecu: Option<String>,
    #[serde(default)]
    session: Option<u8>,
    request: String,
    response: String,
    #[serde(default)]
    properties: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    session: Option<u8>,
    request: Vec<u8>,
    response: Vec<u8>,
}

/// Backend answering from a recorded dataset.
pub struct StorageBackend {
    config: StorageBackedConfig,
    defaults: ResponseDefaults,
    entries: Vec<Entry>,
    session: u8,
}

impl StorageBackend {
    /// Create the backend. The dataset must exist; it is read in `setup`.
    pub fn new(config: StorageBackedConfig) -> Result<Self, LaunchError> {
        if !config.path.exists() {
            return Err(LaunchError::DatasetMissing { path: config.path });
        }
        Ok(Self {
            config,
            defaults: ResponseDefaults::default(),
            entries: Vec::new(),
            session: DEFAULT_SESSION,
        })
    }

    /// Number of loaded request/response pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn session(&self) -> u8 {
        self.session
    }

    fn invalid(&self, reason: impl Into<String>) -> LaunchError {
        LaunchError::DatasetInvalid {
            path: self.config.path.clone(),
            reason: reason.into(),
        }
    }

    fn load(&self) -> Result<Vec<Entry>, LaunchError> {
        let contents = fs::read_to_string(&self.config.path).map_err(|err| self.invalid(err.to_string()))?;
        let dataset: Dataset =
            serde_json::from_str(&contents).map_err(|err| self.invalid(err.to_string()))?;

        let mut effective = dataset.properties;
        if let Some(overrides) = &self.config.properties {
            for (key, value) in overrides {
                effective.insert(key.clone(), value.clone());
            }
        }

        let mut entries = Vec::new();
        for (idx, record) in dataset.records.into_iter().enumerate() {
            if !self.unit_matches(&record) || !properties_match(&effective, &record.properties) {
                continue;
            }
            let request = hex::decode(record.request.trim())
                .map_err(|err| self.invalid(format!("record {idx}: request: {err}")))?;
            let response = hex::decode(record.response.trim())
                .map_err(|err| self.invalid(format!("record {idx}: response: {err}")))?;
            if request.is_empty() {
                return Err(self.invalid(format!("record {idx}: empty request")));
            }
            entries.push(Entry {
                session: record.session,
                request,
                response,
            });
        }
        Ok(entries)
    }

    fn unit_matches(&self, record: &DatasetRecord) -> bool {
        match (&self.config.unit_name, &record.ecu) {
            (Some(wanted), Some(ecu)) => wanted == ecu,
            _ => true,
        }
    }

    fn lookup(&self, request: &[u8]) -> Option<&Entry> {
        let candidates = || self.entries.iter().filter(move |entry| entry.request == request);
        candidates()
            .find(|entry| entry.session == Some(self.session))
            .or_else(|| candidates().find(|entry| entry.session.is_none()))
    }

    fn track_session(&mut self, request: &[u8], response: &[u8]) {
        let sid = ServiceId(request[0]);
        if !uds::is_positive_response(request[0], response) {
            return;
        }
        match sid {
            ServiceId::DIAGNOSTIC_SESSION_CONTROL => {
                if let Some(session) = uds::sub_function(request) {
                    self.session = session;
                }
            }
            ServiceId::ECU_RESET => self.session = DEFAULT_SESSION,
            _ => {}
        }
    }
}

/// A record matches when none of its properties contradicts the effective bag.
fn properties_match(effective: &Map<String, JsonValue>, record: &Map<String, JsonValue>) -> bool {
    effective
        .iter()
        .all(|(key, value)| record.get(key).map_or(true, |own| own == value))
}

impl UdsBackend for StorageBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::StorageBacked
    }

    fn defaults(&self) -> &ResponseDefaults {
        &self.defaults
    }

    fn defaults_mut(&mut self) -> &mut ResponseDefaults {
        &mut self.defaults
    }

    fn setup(&mut self) -> Result<(), LaunchError> {
        self.entries = self.load()?;
        self.session = DEFAULT_SESSION;
        if self.entries.is_empty() {
            warn!(path = %self.config.path.display(), "dataset has no matching records");
        }
        info!(
            path = %self.config.path.display(),
            unit = self.config.unit_name.as_deref().unwrap_or("*"),
            records = self.entries.len(),
            "dataset loaded"
        );
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), LaunchError> {
        self.entries.clear();
        self.session = DEFAULT_SESSION;
        Ok(())
    }

    fn supports_service(&self, sid: ServiceId) -> bool {
        self.entries.iter().any(|entry| entry.request[0] == sid.0)
    }

    fn supports_sub_function(&self, sid: ServiceId, sub_function: u8) -> bool {
        self.entries.iter().any(|entry| {
            entry.request[0] == sid.0 && uds::sub_function(&entry.request) == Some(sub_function)
        })
    }

    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let response = match self.lookup(request) {
            Some(entry) => entry.response.clone(),
            None if uds::suppress_positive_response(request) => {
                let mut plain = request.to_vec();
                plain[1] &= !SUPPRESS_POSITIVE_RESPONSE;
                self.lookup(&plain)?.response.clone()
            }
            None => return None,
        };
        self.track_session(request, &response);
        Some(response)
    }

    fn apply_specific(&mut self, name: &str, _value: AttributeValue) -> Result<(), LaunchError> {
        Err(LaunchError::UnknownAttribute {
            kind: self.kind(),
            name: name.to_string(),
        })
    }
}
