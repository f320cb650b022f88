//! In-memory state manager for tests.

use serde::Serialize;
use serde_json::value::RawValue;
use std::sync::{Arc, PoisonError, RwLock};

use super::snapshot::{Config, ParsedValue, Snapshot};
use super::state::StateManager;
use crate::error::Result;

/// Test double that serves configs injected directly by test code.
///
/// Shares the lookup and memoization contract of the file-backed manager
/// but never touches the filesystem.
#[derive(Debug)]
pub struct DummyStateManager {
    state: RwLock<Snapshot>,
}

impl DummyStateManager {
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::empty())
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Insert or replace a config. Holders of the previous config for the
    /// same key keep their own memo slot.
    pub fn set_config(&self, config: Config) -> &Self {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .upsert(config);
        self
    }

    /// Serialize a value into the raw form stored in a config.
    pub fn to_raw_value<T: Serialize + ?Sized>(val: &T) -> serde_json::Result<Box<RawValue>> {
        serde_json::value::to_raw_value(val)
    }
}

impl Default for DummyStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager for DummyStateManager {
    fn get_key(&self, key: &str) -> Result<Arc<Config>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
    }

    fn get_parsed_value(&self, config: &Config) -> Option<ParsedValue> {
        let _state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        config.parsed_value()
    }

    fn set_parsed_value(&self, config: &Config, value: ParsedValue) {
        let _state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        config.set_parsed_value(value);
    }

    fn close(&self) {}
}
