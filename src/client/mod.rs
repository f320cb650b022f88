//! Typed accessors over a state manager.
//!
//! Every getter follows the same path: fetch the config by key, return the
//! memoized value if it has the expected type, otherwise decode the raw
//! value, memoize it and return it. Any failure resolves to the caller's
//! default. Failures other than a missing key are logged.

mod test_client;

pub use test_client::TestClient;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ConfigError, Result};
use crate::logging::{LogLevel, Logger};
use crate::model::{
    Config, FileStateManager, NullStateManager, ParsedValue, StateManager, StateManagerOptions,
};

/// Source of uniform draws in `[0, 1)` for feature flags.
///
/// Implementations need not be thread-safe; the client serializes access.
pub trait RandomSource: Send {
    fn next_f64(&mut self) -> f64;
}

impl RandomSource for StdRng {
    fn next_f64(&mut self) -> f64 {
        self.gen_range(0.0..1.0)
    }
}

/// Whitelist entries map to an object whose fields are ignored, e.g. `{}`.
type Member = HashMap<String, IgnoredAny>;

/// Random source that always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandomSource(pub f64);

impl RandomSource for FixedRandomSource {
    fn next_f64(&mut self) -> f64 {
        self.0
    }
}

/// Reads configs of one scope through typed, memoizing getters.
pub struct Client {
    logger: Logger,
    sm: Arc<dyn StateManager>,
    /// Guarded separately since random sources are not concurrency-safe.
    rng: Mutex<Box<dyn RandomSource>>,
    decodes: AtomicUsize,
}

impl Client {
    /// Create a client for `<dir>/<scope>/configs.json`.
    ///
    /// Blocks until the file has been loaded once. Fails if the file does
    /// not exist or cannot be watched.
    pub fn new(dir: impl AsRef<Path>, scope: &str, logger: Logger) -> Result<Self> {
        Self::with_options(dir, scope, StateManagerOptions::default(), logger)
    }

    pub fn with_options(
        dir: impl AsRef<Path>,
        scope: &str,
        options: StateManagerOptions,
        logger: Logger,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        match FileStateManager::with_options(dir, scope, options, logger.clone()) {
            Ok(sm) => Ok(Self::from_state_manager(Arc::new(sm), logger)),
            Err(e) => {
                logger.log_with_data(
                    LogLevel::Error,
                    "error creating config manager client",
                    json!({
                        "scope": scope,
                        "dir_path": dir.display().to_string(),
                        "error": e.to_string(),
                    }),
                );
                Err(e)
            }
        }
    }

    pub fn from_state_manager(sm: Arc<dyn StateManager>, logger: Logger) -> Self {
        Self {
            logger: logger.scoped("client"),
            sm,
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
            decodes: AtomicUsize::new(0),
        }
    }

    /// A client that echoes back every default.
    pub fn null() -> Self {
        Self::from_state_manager(Arc::new(NullStateManager), Logger::null())
    }

    /// Replace the random source used by [`Client::is_feature_enabled`].
    pub fn with_random_source(self, rng: impl RandomSource + 'static) -> Self {
        *self.rng.lock().unwrap_or_else(PoisonError::into_inner) = Box::new(rng);
        self
    }

    pub fn state_manager(&self) -> &Arc<dyn StateManager> {
        &self.sm
    }

    /// Number of raw-value decodes performed so far.
    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::Relaxed)
    }

    /// Decode the raw value of `key` into `T`. Not memoized, since the
    /// target type is chosen per call.
    pub fn unmarshal<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let config = self.sm.get_key(key)?;
        self.decode(&config)
    }

    /// Raw JSON text of `key`.
    pub fn get_raw(&self, key: &str) -> Result<String> {
        Ok(self.sm.get_key(key)?.raw_json().to_string())
    }

    pub fn get_boolean(&self, key: &str, default_val: bool) -> bool {
        self.get_typed(key, "get_boolean", default_val)
    }

    pub fn get_int64(&self, key: &str, default_val: i64) -> i64 {
        self.get_typed(key, "get_int64", default_val)
    }

    pub fn get_float64(&self, key: &str, default_val: f64) -> f64 {
        self.get_typed(key, "get_float64", default_val)
    }

    pub fn get_string(&self, key: &str, default_val: &str) -> String {
        self.get_typed(key, "get_string", default_val.to_string())
    }

    pub fn get_byte(&self, key: &str, default_val: u8) -> u8 {
        self.get_typed(key, "get_byte", default_val)
    }

    /// Roll the dice for a feature flag.
    ///
    /// The key holds a probability in `[0, 1]`. An unconfigured flag is
    /// always on when `enabled_by_default`, always off otherwise.
    pub fn is_feature_enabled(&self, key: &str, enabled_by_default: bool) -> bool {
        let default_val = if enabled_by_default { 1.0 } else { 0.0 };
        let probability = self.get_float64(key, default_val);
        let draw = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_f64();
        draw < probability
    }

    /// Whether `project_id` is a key of the JSON object stored at `key`,
    /// e.g. `{"3": {}, "17": {}}`.
    pub fn is_project_whitelisted(&self, key: &str, project_id: i64, default_val: bool) -> bool {
        let set = self.memoized(key, |config| {
            let ids: HashMap<i64, Member> = self.decode(config)?;
            Ok(ids.into_keys().collect::<HashSet<i64>>())
        });
        match set {
            Ok(set) => set.contains(&project_id),
            Err(e) => {
                self.log_err_get("is_project_whitelisted", &e, key, &default_val);
                default_val
            }
        }
    }

    /// Whether `token` is a key of the JSON object stored at `key`.
    pub fn is_token_whitelisted(&self, key: &str, token: &str, default_val: bool) -> bool {
        let set = self.memoized(key, |config| {
            let tokens: HashMap<String, Member> = self.decode(config)?;
            Ok(tokens.into_keys().collect::<HashSet<String>>())
        });
        match set {
            Ok(set) => set.contains(token),
            Err(e) => {
                self.log_err_get("is_token_whitelisted", &e, key, &default_val);
                default_val
            }
        }
    }

    /// Close the underlying state manager.
    pub fn close(&self) {
        self.sm.close();
    }

    fn get_typed<T>(&self, key: &str, op: &str, default_val: T) -> T
    where
        T: DeserializeOwned + Serialize + Clone + Any + Send + Sync,
    {
        match self.memoized(key, |config| self.decode::<T>(config)) {
            Ok(val) => T::clone(&val),
            Err(e) => {
                self.log_err_get(op, &e, key, &default_val);
                default_val
            }
        }
    }

    /// Return the memoized `T` for `key`, decoding and memoizing it first
    /// if the memo slot is empty or holds another type.
    fn memoized<T, F>(&self, key: &str, decode: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce(&Config) -> Result<T>,
    {
        let config = self.sm.get_key(key)?;
        if let Some(parsed) = self.sm.get_parsed_value(&config)
            && let Ok(val) = parsed.downcast::<T>()
        {
            return Ok(val);
        }

        let val = Arc::new(decode(&config)?);
        let memo: ParsedValue = val.clone();
        self.sm.set_parsed_value(&config, memo);
        Ok(val)
    }

    fn decode<T: DeserializeOwned>(&self, config: &Config) -> Result<T> {
        self.decodes.fetch_add(1, Ordering::Relaxed);
        config.decode()
    }

    fn log_err_get<D: Serialize>(&self, op: &str, err: &ConfigError, key: &str, default_val: &D) {
        if err.is_not_found() {
            return;
        }
        let default_val = serde_json::to_value(default_val).unwrap_or(Value::Null);
        self.logger.scoped(op).log_with_data(
            LogLevel::Warning,
            "error while doing get",
            json!({
                "key": key,
                "default_value": default_val,
                "error": err.to_string(),
            }),
        );
    }
}
