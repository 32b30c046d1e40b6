//! Error types for the integration protocol
//!
//! Only identity resolution and local storage can fail. Missing relations,
//! unfulfilled requests, and malformed remote data are ordinary states and
//! never surface here.

use thiserror::Error;

/// Errors resolving this unit's identity from the metadata endpoint
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Metadata request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Metadata endpoint {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Metadata response from {url} is not valid UTF-8")]
    InvalidUtf8 { url: String },

    #[error("Metadata response from {url} is empty")]
    Empty { url: String },

    #[error("Failed to build metadata client: {0}")]
    Client(String),
}

/// Errors from requirer and provider operations
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Identity resolution failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Local store error: {0}")]
    Store(#[from] unitstore::StoreError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntegrationError {
    /// Whether this is a failure to resolve instance identity
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, IntegrationError::Metadata(_))
    }
}
