//! UnitStore - local durable key-value cache
//!
//! Holds the small pieces of state an integration endpoint must remember
//! across process restarts without asking the remote side again: the
//! resolved instance identity and the fingerprints already surfaced as
//! pending work.
//!
//! # Layout
//!
//! ```text
//! store.json          # one flat JSON object, key -> value
//! ```
//!
//! # Example
//!
//! ```ignore
//! use unitstore::{FileStore, KeyValueStore};
//!
//! let mut store = FileStore::open("/var/lib/unit/store.json")?;
//! store.set("gcp.instance", "i-abc".into())?;
//! assert_eq!(store.get_string("gcp.instance")?, Some("i-abc".to_string()));
//! ```

pub mod cli;
pub mod config;
mod store;

pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};

/// Default file name for the store inside its data directory
pub const DEFAULT_STORE_FILE: &str = "store.json";
