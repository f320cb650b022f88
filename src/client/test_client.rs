use serde::Serialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use super::Client;
use crate::logging::{LogLevel, Logger};
use crate::model::{Config, DummyStateManager, StateManager};

/// A [`Client`] over an in-memory manager whose values are set by the test.
///
/// ```
/// use config_manager::client::TestClient;
///
/// let client = TestClient::new();
/// client.set_boolean("enabled", true).set_int64("limit", 10);
/// assert!(client.get_boolean("enabled", false));
/// assert_eq!(client.get_int64("limit", 0), 10);
/// ```
pub struct TestClient {
    client: Client,
    dm: Arc<DummyStateManager>,
    logger: Logger,
}

impl TestClient {
    pub fn new() -> Self {
        Self::with_logger(Logger::null())
    }

    pub fn with_logger(logger: Logger) -> Self {
        let dm = Arc::new(DummyStateManager::new());
        let sm: Arc<dyn StateManager> = dm.clone();
        Self {
            client: Client::from_state_manager(sm, logger.clone()),
            dm,
            logger: logger.scoped("test_client"),
        }
    }

    /// Use a fixed draw for feature flags.
    pub fn with_random_draw(self, draw: f64) -> Self {
        Self {
            client: self
                .client
                .with_random_source(super::FixedRandomSource(draw)),
            dm: self.dm,
            logger: self.logger,
        }
    }

    pub fn set_boolean(&self, key: &str, val: bool) -> &Self {
        self.set_value(key, &val)
    }

    pub fn set_int64(&self, key: &str, val: i64) -> &Self {
        self.set_value(key, &val)
    }

    pub fn set_float64(&self, key: &str, val: f64) -> &Self {
        self.set_value(key, &val)
    }

    pub fn set_string(&self, key: &str, val: &str) -> &Self {
        self.set_value(key, val)
    }

    pub fn set_byte(&self, key: &str, val: u8) -> &Self {
        self.set_value(key, &val)
    }

    /// Store `raw` verbatim. Invalid JSON is logged and ignored.
    pub fn set_raw(&self, key: &str, raw: &str) -> &Self {
        match RawValue::from_string(raw.to_string()) {
            Ok(raw) => {
                self.dm.set_config(Config::new(key, raw));
            }
            Err(e) => self.warn(key, &e),
        }
        self
    }

    /// Store `{"<id>": {}, ...}` for the given project ids.
    pub fn set_projects_whitelist(&self, key: &str, project_ids: &[i64]) -> &Self {
        let ids: BTreeMap<i64, Map<String, Value>> =
            project_ids.iter().map(|id| (*id, Map::new())).collect();
        self.set_value(key, &ids)
    }

    /// Store `{"<token>": {}, ...}` for the given tokens.
    pub fn set_tokens_whitelist(&self, key: &str, tokens: &[&str]) -> &Self {
        let tokens: BTreeMap<&str, Map<String, Value>> =
            tokens.iter().map(|t| (*t, Map::new())).collect();
        self.set_value(key, &tokens)
    }

    pub fn state_manager(&self) -> &DummyStateManager {
        &self.dm
    }

    fn set_value<T: Serialize + ?Sized>(&self, key: &str, val: &T) -> &Self {
        match Config::from_value(key, val) {
            Ok(config) => {
                self.dm.set_config(config);
            }
            Err(e) => self.warn(key, &e),
        }
        self
    }

    fn warn(&self, key: &str, err: &serde_json::Error) {
        self.logger.log_with_data(
            LogLevel::Warning,
            "ignoring unserializable test value",
            json!({ "key": key, "error": err.to_string() }),
        );
    }
}

impl Default for TestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}
