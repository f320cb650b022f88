//! State managers: the single source of truth for a scope's snapshot.

use arc_swap::ArcSwap;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::Duration;

use super::snapshot::{Config, DebugVars, ParsedValue, Snapshot};
use crate::error::{ConfigError, Result};
use crate::logging::{LogLevel, Logger};
use crate::testutil::CallCounter;
use crate::watcher::FileWatcher;

/// File name of a scope's configuration inside its directory.
pub const CONFIG_FILE_NAME: &str = "configs.json";

/// Lookup and memoization capabilities shared by every manager variant.
pub trait StateManager: Send + Sync {
    /// Look up a key in the current snapshot.
    fn get_key(&self, key: &str) -> Result<Arc<Config>>;

    /// Read the memo slot of a config previously returned by `get_key`.
    fn get_parsed_value(&self, config: &Config) -> Option<ParsedValue>;

    /// Write the memo slot of a config previously returned by `get_key`.
    fn set_parsed_value(&self, config: &Config, value: ParsedValue);

    /// Release background resources. Idempotent.
    fn close(&self);
}

/// Manager used when no configuration should be active.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStateManager;

impl StateManager for NullStateManager {
    fn get_key(&self, key: &str) -> Result<Arc<Config>> {
        Err(ConfigError::not_found(key))
    }

    fn get_parsed_value(&self, _config: &Config) -> Option<ParsedValue> {
        None
    }

    fn set_parsed_value(&self, _config: &Config, _value: ParsedValue) {}

    fn close(&self) {}
}

/// Construction options for [`FileStateManager`].
#[derive(Debug, Default, Clone)]
pub struct StateManagerOptions {
    /// Receives a best-effort notification after each successful reload.
    /// Use `sync_channel(1)` to keep at most one pending notification.
    pub update_tx: Option<SyncSender<()>>,
    /// Fail construction if no load succeeds within this duration.
    /// `None` blocks until the first successful load.
    pub initial_load_timeout: Option<Duration>,
    /// Count watcher callback invocations (see [`FileStateManager::notify_counter`]).
    pub test_counter: bool,
}

impl StateManagerOptions {
    pub fn with_update_channel(mut self, tx: SyncSender<()>) -> Self {
        self.update_tx = Some(tx);
        self
    }

    pub fn with_initial_load_timeout(mut self, timeout: Duration) -> Self {
        self.initial_load_timeout = Some(timeout);
        self
    }

    pub fn with_test_counter(mut self) -> Self {
        self.test_counter = true;
        self
    }
}

/// State shared between the manager and its watcher callback.
struct SharedState {
    file_path: PathBuf,
    state: RwLock<Option<Arc<Snapshot>>>,
    next_generation: AtomicU64,
    /// "Has loaded" predicate for the initial-load gate.
    loaded: Mutex<bool>,
    loaded_cond: Condvar,
    update_tx: Option<SyncSender<()>>,
    debug_vars: ArcSwap<DebugVars>,
    logger: Logger,
}

impl SharedState {
    /// Watcher callback: reload the file and publish a new snapshot.
    ///
    /// Waiters on the initial-load gate are woken whether or not the load
    /// succeeded.
    fn load_config(&self, path: &Path) -> Result<()> {
        let result = self.reload(path);
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if result.is_ok() {
            *loaded = true;
        }
        drop(loaded);
        self.loaded_cond.notify_all();
        result
    }

    fn reload(&self, path: &Path) -> Result<()> {
        let data = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let configs = Snapshot::parse(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(Snapshot::new(configs, generation));
        self.load_state(Arc::clone(&snapshot));

        self.logger.log_with_data(
            LogLevel::Info,
            "config loaded",
            json!({
                "path": path.display().to_string(),
                "generation": generation,
                "keys": snapshot.len(),
            }),
        );
        Ok(())
    }

    fn load_state(&self, snapshot: Arc<Snapshot>) {
        let vars = snapshot.debug_vars();
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        self.notify();
        self.debug_vars.store(Arc::new(vars));
    }

    /// Non-blocking send; a full or disconnected channel drops the signal.
    fn notify(&self) {
        let Some(ref tx) = self.update_tx else {
            return;
        };
        match tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                self.logger.debug("update channel receiver dropped");
            }
        }
    }

    fn current(&self) -> Option<Arc<Snapshot>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Manager backed by `<dir>/<scope>/configs.json`, kept fresh by a watcher.
pub struct FileStateManager {
    shared: Arc<SharedState>,
    watcher: FileWatcher,
}

impl FileStateManager {
    /// Start watching the scope's file and block until it has been loaded.
    pub fn new(dir: impl AsRef<Path>, scope: &str, logger: Logger) -> Result<Self> {
        Self::with_options(dir, scope, StateManagerOptions::default(), logger)
    }

    pub fn with_options(
        dir: impl AsRef<Path>,
        scope: &str,
        options: StateManagerOptions,
        logger: Logger,
    ) -> Result<Self> {
        let logger = logger.scoped("state_manager");
        let file_path = dir.as_ref().join(scope).join(CONFIG_FILE_NAME);

        let shared = Arc::new(SharedState {
            file_path: file_path.clone(),
            state: RwLock::new(None),
            next_generation: AtomicU64::new(0),
            loaded: Mutex::new(false),
            loaded_cond: Condvar::new(),
            update_tx: options.update_tx,
            debug_vars: ArcSwap::from_pointee(DebugVars::default()),
            logger: logger.clone(),
        });

        let callback_state = Arc::clone(&shared);
        let on_file_event = move |p: &Path| callback_state.load_config(p);
        let watcher = if options.test_counter {
            FileWatcher::new_for_test(&file_path, on_file_event, logger.clone())?
        } else {
            FileWatcher::new(&file_path, on_file_event, logger.clone())?
        };

        let manager = Self { shared, watcher };
        if let Err(e) = manager.watcher.start() {
            logger.log_with_data(
                LogLevel::Error,
                "error starting config watcher",
                json!({ "path": file_path.display().to_string(), "error": e.to_string() }),
            );
            return Err(e);
        }
        manager.wait_for_initial_load(options.initial_load_timeout)?;
        Ok(manager)
    }

    /// Block on the load gate until a snapshot has been published.
    fn wait_for_initial_load(&self, timeout: Option<Duration>) -> Result<()> {
        let loaded = self
            .shared
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(timeout) = timeout else {
            let _loaded = self
                .shared
                .loaded_cond
                .wait_while(loaded, |loaded| !*loaded)
                .unwrap_or_else(PoisonError::into_inner);
            return Ok(());
        };

        let (loaded, _) = self
            .shared
            .loaded_cond
            .wait_timeout_while(loaded, timeout, |loaded| !*loaded)
            .unwrap_or_else(PoisonError::into_inner);
        if *loaded {
            return Ok(());
        }
        drop(loaded);

        // The watcher is stopped when `self` is dropped by the caller.
        Err(ConfigError::InitialLoadTimeout {
            path: self.shared.file_path.clone(),
            timeout_ms: timeout.as_millis(),
        })
    }

    /// Resolved path of the watched file.
    pub fn file_path(&self) -> &Path {
        &self.shared.file_path
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.current()
    }

    /// Raw values of the last published snapshot. Lock-free.
    pub fn debug_vars(&self) -> Arc<DebugVars> {
        self.shared.debug_vars.load_full()
    }

    /// Watcher callback counter, present when built with `test_counter`.
    pub fn notify_counter(&self) -> Option<&Arc<CallCounter>> {
        self.watcher.notify_counter()
    }
}

impl StateManager for FileStateManager {
    fn get_key(&self, key: &str) -> Result<Arc<Config>> {
        let state = self
            .shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match state.as_ref() {
            Some(snapshot) => snapshot.get(key),
            None => Err(ConfigError::not_found(key)),
        }
    }

    fn get_parsed_value(&self, config: &Config) -> Option<ParsedValue> {
        let _state = self
            .shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        config.parsed_value()
    }

    fn set_parsed_value(&self, config: &Config, value: ParsedValue) {
        let _state = self
            .shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        config.set_parsed_value(value);
    }

    fn close(&self) {
        self.watcher.stop();
    }
}
