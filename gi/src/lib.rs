//! gcp-integration - credential-free cloud integration over a relation
//!
//! A requirer unit asks a provider unit to perform privileged cloud actions
//! on its behalf (label its instance, grant it network, DNS, or storage
//! management) without ever holding credentials. Both sides talk through a
//! replicated two-sided key-value channel whose change notifications can be
//! lost, duplicated, or replayed.
//!
//! # Core Concepts
//!
//! - **Fingerprints**: both sides hash the same canonical encoding of the
//!   published request, so "what was asked" and "what was done" compare by
//!   value
//! - **Recompute, don't track**: readiness and pending work are derived from
//!   current channel contents on every notification
//! - **Surface once**: the provider's ChangeCache suppresses re-surfacing a
//!   request whose fingerprint it has already seen
//!
//! # Modules
//!
//! - [`fingerprint`] - canonical request digests
//! - [`request`] - databag wire model and typed request view
//! - [`channel`] - relation abstraction and in-memory implementation
//! - [`identity`] - instance id / zone resolution via metadata
//! - [`requirer`] - request publishing and readiness
//! - [`provider`] - pending request detection and completion records
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod provider;
pub mod request;
pub mod requirer;
pub mod simulate;

// Re-export commonly used types
pub use channel::{ChannelEvent, MemoryRelation, Relation};
pub use config::{Config, MetadataConfig, StoreConfig};
pub use error::{IntegrationError, MetadataError};
pub use fingerprint::{Fingerprint, fingerprint, request_fingerprint};
pub use identity::{HttpMetadata, Identity, IdentityResolver, MetadataSource, StaticMetadata};
pub use provider::{Provider, UnitInstance};
pub use request::{
    COMPLETED_KEY, CREDENTIALS_KEY, Databag, InstanceLabels, IntegrationRequest, RequestFields, RequestKey,
    RequestedMarker, UnitName,
};
pub use requirer::{Readiness, Requirer};
pub use simulate::{SimulationStep, run_simulation};
