//! File watcher for a single configuration file.
//!
//! Wraps a `notify` watcher registered on exactly one path and runs a
//! background event loop that invokes a callback whenever the file may have
//! changed. The loop calls the callback once eagerly at startup so the file
//! is processed even if no filesystem event ever fires.
//!
//! Editors and config-map volumes often replace the file via rename, which
//! invalidates the OS watch handle. Remove, rename and chmod events therefore
//! re-register the watch before invoking the callback.

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::error::{ConfigError, Result};
use crate::logging::{LogLevel, Logger};
use crate::testutil::CallCounter;

/// Callback invoked with the watched path whenever it may have changed.
pub type OnFileEvent = Arc<dyn Fn(&Path) -> Result<()> + Send + Sync>;

/// The classes of filesystem operation the watcher reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

impl FileOp {
    /// Map a `notify` event kind to the operation it represents.
    ///
    /// Returns `None` for kinds the watcher ignores (access, other).
    pub fn classify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(FileOp::Create),
            EventKind::Remove(_) => Some(FileOp::Remove),
            EventKind::Modify(ModifyKind::Name(_)) => Some(FileOp::Rename),
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(FileOp::Chmod),
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                Some(FileOp::Write)
            }
            _ => None,
        }
    }

    /// Whether the OS watch handle must be re-registered after this op.
    pub fn invalidates_watch(self) -> bool {
        matches!(self, FileOp::Remove | FileOp::Rename | FileOp::Chmod)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileOp::Create => "create",
            FileOp::Write => "write",
            FileOp::Remove => "remove",
            FileOp::Rename => "rename",
            FileOp::Chmod => "chmod",
        }
    }
}

/// Watches one file and invokes a callback on relevant changes.
pub struct FileWatcher {
    path: PathBuf,
    on_file_event: OnFileEvent,
    /// The OS watch handle. `None` once stopped; dropping it closes `events`.
    watcher: Arc<Mutex<Option<RecommendedWatcher>>>,
    /// Taken by the event loop on start.
    events: Mutex<Option<Receiver<notify::Result<Event>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    notify_counter: Option<Arc<CallCounter>>,
    logger: Logger,
}

impl FileWatcher {
    /// Create a watcher for `path`. The path is not checked until [`start`].
    ///
    /// [`start`]: FileWatcher::start
    pub fn new<F>(path: impl Into<PathBuf>, on_file_event: F, logger: Logger) -> Result<Self>
    where
        F: Fn(&Path) -> Result<()> + Send + Sync + 'static,
    {
        Self::build(path.into(), Arc::new(on_file_event), None, logger)
    }

    /// Create a watcher whose callback invocations are counted.
    ///
    /// The counter is incremented after every invocation, successful or not,
    /// so tests can wait for N reloads instead of sleeping.
    pub fn new_for_test<F>(
        path: impl Into<PathBuf>,
        on_file_event: F,
        logger: Logger,
    ) -> Result<Self>
    where
        F: Fn(&Path) -> Result<()> + Send + Sync + 'static,
    {
        let counter = Arc::new(CallCounter::new());
        let incr = Arc::clone(&counter);
        let wrapped = move |p: &Path| {
            let res = on_file_event(p);
            incr.incr();
            res
        };
        Self::build(path.into(), Arc::new(wrapped), Some(counter), logger)
    }

    fn build(
        path: PathBuf,
        on_file_event: OnFileEvent,
        notify_counter: Option<Arc<CallCounter>>,
        logger: Logger,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher =
            notify::recommended_watcher(tx).map_err(|source| ConfigError::WatchRegistration {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            on_file_event,
            watcher: Arc::new(Mutex::new(Some(watcher))),
            events: Mutex::new(Some(rx)),
            handle: Mutex::new(None),
            notify_counter,
            logger: logger.scoped("watcher"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counter of callback invocations, present only for test watchers.
    pub fn notify_counter(&self) -> Option<&Arc<CallCounter>> {
        self.notify_counter.as_ref()
    }

    /// Register the watch and spawn the event loop.
    ///
    /// Fails if the path does not exist, if the watch cannot be registered,
    /// or if the watcher was already started or stopped. Errors from the
    /// eager first callback are logged by the loop, never returned here.
    pub fn start(&self) -> Result<()> {
        if !self.path.exists() {
            return Err(ConfigError::PathNotFound {
                path: self.path.clone(),
            });
        }

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.is_none() {
            return Err(ConfigError::AlreadyStarted {
                path: self.path.clone(),
            });
        }

        {
            let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(watcher) = guard.as_mut() else {
                return Err(ConfigError::AlreadyStarted {
                    path: self.path.clone(),
                });
            };
            watcher
                .watch(&self.path, RecursiveMode::NonRecursive)
                .map_err(|source| ConfigError::WatchRegistration {
                    path: self.path.clone(),
                    source,
                })?;
        }

        let Some(rx) = events.take() else {
            return Err(ConfigError::AlreadyStarted {
                path: self.path.clone(),
            });
        };

        // Some backends report canonical paths (e.g. /private/var on macOS).
        let mut aliases = vec![self.path.clone()];
        if let Ok(canonical) = self.path.canonicalize()
            && canonical != self.path
        {
            aliases.push(canonical);
        }

        let event_loop = EventLoop {
            path: self.path.clone(),
            aliases,
            on_file_event: Arc::clone(&self.on_file_event),
            watcher: Arc::clone(&self.watcher),
            logger: self.logger.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("config-watcher".to_string())
            .spawn(move || event_loop.run(rx))
            .map_err(ConfigError::ThreadSpawn)?;

        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        self.logger.log_with_data(
            LogLevel::Info,
            "watching config file",
            json!({ "path": self.path.display().to_string() }),
        );
        Ok(())
    }

    /// Close the watch handle and wait for the event loop to exit.
    ///
    /// Safe to call on a watcher that was never started and safe to call
    /// more than once; only the first call performs the shutdown.
    pub fn stop(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Dropping the OS watcher drops the event sender and ends the loop.
        drop(watcher);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                self.logger.error("config watcher thread panicked");
            }
            self.logger.debug("config watcher stopped");
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved into the background thread.
struct EventLoop {
    path: PathBuf,
    aliases: Vec<PathBuf>,
    on_file_event: OnFileEvent,
    watcher: Arc<Mutex<Option<RecommendedWatcher>>>,
    logger: Logger,
}

impl EventLoop {
    fn run(self, events: Receiver<notify::Result<Event>>) {
        // Force the callback once so the file is processed even if no
        // event ever fires. Fail open.
        if let Err(e) = (self.on_file_event)(&self.path) {
            self.warn("initial on_file_event failed", &e.to_string());
        }

        for res in events {
            match res {
                Ok(event) => self.handle_event(event),
                Err(e) => self.warn("error while watching config file", &e.to_string()),
            }
        }

        self.logger.debug("config watcher event channel closed");
    }

    fn handle_event(&self, event: Event) {
        if !event.paths.iter().any(|p| self.aliases.contains(p)) {
            return;
        }

        match FileOp::classify(&event.kind) {
            Some(op) if op.invalidates_watch() => match self.rewatch() {
                Ok(true) => self.dispatch(op),
                Ok(false) => {}
                Err(e) => self.warn("error while resetting watch on config file", &e.to_string()),
            },
            Some(op) => self.dispatch(op),
            None => self.logger.log_with_data(
                LogLevel::Debug,
                "unhandled fs event",
                json!({
                    "path": self.path.display().to_string(),
                    "kind": format!("{:?}", event.kind),
                }),
            ),
        }
    }

    /// Drop the possibly-stale watch and register a fresh one.
    ///
    /// Returns `Ok(false)` when the watcher has been stopped meanwhile.
    fn rewatch(&self) -> Result<bool> {
        let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(watcher) = guard.as_mut() else {
            return Ok(false);
        };
        let _ = watcher.unwatch(&self.path);
        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|source| ConfigError::WatchRegistration {
                path: self.path.clone(),
                source,
            })?;
        Ok(true)
    }

    fn dispatch(&self, op: FileOp) {
        self.logger.log_with_data(
            LogLevel::Debug,
            "config file changed",
            json!({ "path": self.path.display().to_string(), "op": op.as_str() }),
        );
        if let Err(e) = (self.on_file_event)(&self.path) {
            self.warn("could not load config file", &e.to_string());
        }
    }

    fn warn(&self, message: &str, error: &str) {
        self.logger.log_with_data(
            LogLevel::Warning,
            message,
            json!({ "path": self.path.display().to_string(), "error": error }),
        );
    }
}
