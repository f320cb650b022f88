//! Configuration model and state managers.
//!
//! ```text
//! configs.json
//!     → FileWatcher event
//!     → FileStateManager::load_config (read + parse)
//!     → Snapshot (immutable, indexed by key)
//!     → swapped in under the manager's RwLock
//!     → readers see it on their next get_key
//! ```
//!
//! A failed reload leaves the previous snapshot in place.

mod dummy;
mod snapshot;
mod state;

pub use dummy::DummyStateManager;
pub use snapshot::{Config, DebugVars, ParsedValue, Snapshot};
pub use state::{
    CONFIG_FILE_NAME, FileStateManager, NullStateManager, StateManager, StateManagerOptions,
};
