//! Configuration records and immutable snapshots of a scope.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{ConfigError, Result};

/// A lazily decoded, type-erased interpretation of a raw value.
pub type ParsedValue = Arc<dyn Any + Send + Sync>;

/// One `{ "key": ..., "value": ... }` record from the config file.
///
/// The raw value is kept as unparsed JSON text. A record without `value`
/// still loads; its raw value is empty and every typed decode of it fails.
/// The memo slot is the one mutable part of a published config: it caches
/// the first successful typed decode. State managers only touch it while
/// holding their own lock.
#[derive(Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub key: String,
    #[serde(rename = "value", default, deserialize_with = "present_raw_value")]
    raw_value: Option<Box<RawValue>>,
    #[serde(skip)]
    parsed_value: RwLock<Option<ParsedValue>>,
}

/// Keeps an explicit `null` as the raw text `null`; only a missing field is `None`.
fn present_raw_value<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

impl Config {
    pub fn new(key: impl Into<String>, raw_value: Box<RawValue>) -> Self {
        Self {
            key: key.into(),
            raw_value: Some(raw_value),
            parsed_value: RwLock::new(None),
        }
    }

    /// Build a config by serializing `value` to JSON.
    pub fn from_value<T: Serialize + ?Sized>(
        key: impl Into<String>,
        value: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(key, serde_json::value::to_raw_value(value)?))
    }

    /// `None` when the record had no `value` field.
    pub fn raw_value(&self) -> Option<&RawValue> {
        self.raw_value.as_deref()
    }

    /// The raw value as JSON text; empty when the record had no value.
    pub fn raw_json(&self) -> &str {
        self.raw_value.as_deref().map_or("", RawValue::get)
    }

    /// Decode the raw value into `T`. Does not memoize.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(self.raw_json())
            .map_err(|source| ConfigError::unmarshal(&self.key, source))
    }

    pub(crate) fn parsed_value(&self) -> Option<ParsedValue> {
        self.parsed_value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_parsed_value(&self, value: ParsedValue) {
        *self
            .parsed_value
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(value);
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw_json())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("key", &self.key)
            .field("raw_value", &self.raw_json())
            .field("memoized", &self.parsed_value().is_some())
            .finish()
    }
}

/// The complete view of a scope at one point in time.
///
/// Built once from the parsed file and never mutated afterwards, apart from
/// the memo slots of its configs.
#[derive(Debug)]
pub struct Snapshot {
    configs: Vec<Arc<Config>>,
    index: HashMap<String, Arc<Config>>,
    generation: u64,
    loaded_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot and its key index. Later duplicates win.
    pub fn new(configs: Vec<Config>, generation: u64) -> Self {
        let configs: Vec<Arc<Config>> = configs.into_iter().map(Arc::new).collect();
        let index = configs
            .iter()
            .map(|cfg| (cfg.key.clone(), Arc::clone(cfg)))
            .collect();
        Self {
            configs,
            index,
            generation,
            loaded_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    /// Parse the on-disk format: a JSON array of `{key, value}` records.
    pub fn parse(data: &[u8]) -> serde_json::Result<Vec<Config>> {
        serde_json::from_slice(data)
    }

    pub fn get(&self, key: &str) -> Result<Arc<Config>> {
        self.index
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::not_found(key))
    }

    /// Records in file order, including shadowed duplicates.
    pub fn configs(&self) -> &[Arc<Config>] {
        &self.configs
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Insert or replace a key. Only used by the in-memory test double,
    /// which owns its snapshot exclusively.
    pub(crate) fn upsert(&mut self, config: Config) {
        let config = Arc::new(config);
        let previous = self.index.insert(config.key.clone(), Arc::clone(&config));
        match previous.and_then(|prev| self.configs.iter().position(|c| Arc::ptr_eq(c, &prev))) {
            Some(pos) => self.configs[pos] = config,
            None => self.configs.push(config),
        }
    }

    /// Key to raw value view used for introspection. Records without a
    /// value are left out.
    pub fn debug_vars(&self) -> DebugVars {
        DebugVars {
            generation: self.generation,
            loaded_at: Some(self.loaded_at),
            values: self
                .index
                .iter()
                .filter_map(|(k, cfg)| Some((k.clone(), cfg.raw_value.clone()?)))
                .collect(),
        }
    }
}

/// Side index of the last published raw values, for debugging endpoints.
#[derive(Debug, Default, Serialize)]
pub struct DebugVars {
    pub generation: u64,
    pub loaded_at: Option<DateTime<Utc>>,
    pub values: BTreeMap<String, Box<RawValue>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn parse(s: &str) -> Vec<Config> {
        Snapshot::parse(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_keeps_raw_values() {
        let configs = parse(r#"[{"key":"foo","value":{"x": [1, 2]}},{"key":"bar","value":3}]"#);
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].key, "foo");
        let foo: Value = serde_json::from_str(configs[0].raw_json()).unwrap();
        assert_eq!(foo, json!({"x": [1, 2]}));
        assert_eq!(configs[1].raw_json(), "3");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Snapshot::parse(b"{not json").is_err());
        assert!(Snapshot::parse(br#"{"key":"foo","value":1}"#).is_err());
        assert!(Snapshot::parse(br#"[{"key":"foo","value":}]"#).is_err());
    }

    #[test]
    fn test_record_without_value_loads() {
        let snapshot = Snapshot::new(
            parse(r#"[{"key":"foo","value":1},{"key":"bar"},{"value":2}]"#),
            1,
        );
        assert_eq!(snapshot.get("foo").unwrap().raw_json(), "1");

        let bar = snapshot.get("bar").unwrap();
        assert!(bar.raw_value().is_none());
        assert_eq!(bar.raw_json(), "");
        let err = bar.decode::<i64>().unwrap_err();
        assert!(matches!(err, ConfigError::UnmarshalMismatch { ref key, .. } if key == "bar"));

        // A record without a key is indexed under the empty key.
        assert_eq!(snapshot.get("").unwrap().raw_json(), "2");

        let vars = snapshot.debug_vars();
        assert!(vars.values.contains_key("foo"));
        assert!(!vars.values.contains_key("bar"));
    }

    #[test]
    fn test_explicit_null_is_kept() {
        let configs = parse(r#"[{"key":"foo","value":null}]"#);
        assert_eq!(configs[0].raw_json(), "null");
        assert_eq!(configs[0].decode::<Option<i64>>().unwrap(), None);
    }

    #[test]
    fn test_last_duplicate_wins() {
        let snapshot = Snapshot::new(
            parse(r#"[{"key":"x","value":1},{"key":"y","value":2},{"key":"x","value":3}]"#),
            1,
        );
        assert_eq!(snapshot.get("x").unwrap().raw_json(), "3");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.configs().len(), 3);
    }

    #[test]
    fn test_missing_key() {
        let snapshot = Snapshot::empty();
        assert!(snapshot.is_empty());
        let err = snapshot.get("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_decode_mismatch() {
        let cfg = Config::from_value("bar", &3).unwrap();
        assert_eq!(cfg.decode::<i64>().unwrap(), 3);
        let err = cfg.decode::<bool>().unwrap_err();
        assert!(matches!(err, ConfigError::UnmarshalMismatch { ref key, .. } if key == "bar"));
    }

    #[test]
    fn test_memo_slot() {
        let cfg = Config::from_value("foo", &true).unwrap();
        assert!(cfg.parsed_value().is_none());
        cfg.set_parsed_value(Arc::new(true));
        let memo = cfg.parsed_value().unwrap();
        assert_eq!(memo.downcast_ref::<bool>(), Some(&true));
        assert!(memo.downcast_ref::<i64>().is_none());
    }

    #[test]
    fn test_upsert_replaces_key() {
        let mut snapshot = Snapshot::empty();
        snapshot.upsert(Config::from_value("foo", &1).unwrap());
        snapshot.upsert(Config::from_value("bar", &true).unwrap());
        for n in 2..10 {
            snapshot.upsert(Config::from_value("foo", &n).unwrap());
        }
        assert_eq!(snapshot.get("foo").unwrap().raw_json(), "9");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.configs().len(), 2);
        assert_eq!(snapshot.configs()[0].key, "foo");
    }

    #[test]
    fn test_debug_vars_serialization() {
        let snapshot = Snapshot::new(parse(r#"[{"key":"foo","value":[1,2]}]"#), 4);
        let vars = snapshot.debug_vars();
        assert_eq!(vars.generation, 4);
        let json = serde_json::to_value(&vars).unwrap();
        assert_eq!(json["values"]["foo"], json!([1, 2]));
    }

    #[test]
    fn test_display_is_raw_json() {
        let cfg = Config::from_value("s", "hello").unwrap();
        assert_eq!(cfg.to_string(), "\"hello\"");
    }
}
