//! Config Manager Library
//!
//! File-backed configuration snapshots that refresh themselves when the
//! file changes, with typed memoizing accessors, whitelists and
//! probabilistic feature flags.

pub mod cli;
pub mod client;
pub mod error;
pub mod logging;
pub mod model;
pub mod server;
pub mod testutil;
pub mod watcher;

pub use client::{Client, TestClient};
pub use error::{ConfigError, Result};
pub use logging::Logger;
pub use model::{FileStateManager, StateManager, StateManagerOptions};
