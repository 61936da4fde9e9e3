//! Cirrus daemon: hosts the attestation engine.
//!
//! Provides the pieces the `cirrus-daemon` binary wires together:
//! configuration loading, provider record conversion, SQLite-backed replay
//! counters and the periodic counter sweeper.

pub mod config;
pub mod convert;
pub mod store;
pub mod sweeper;

pub use config::{Config, ConfigError};
pub use convert::{instance_from_provider, ConvertError};
pub use store::SqliteAttemptStore;
pub use sweeper::{spawn_sweeper, sweep_once};
