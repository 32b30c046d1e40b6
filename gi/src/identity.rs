//! Instance identity resolution
//!
//! The requirer learns its own instance id and zone from the cloud metadata
//! endpoint. Each value is fetched at most once: the result is kept in memory
//! and in the local store, so restarts skip the network as well. Failures
//! are not retried; the caller must not publish until resolution succeeds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use unitstore::KeyValueStore;

use crate::config::MetadataConfig;
use crate::error::{IntegrationError, MetadataError};

/// Default metadata service base URL
pub const METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1/";

/// Path of the instance name under the metadata base URL
pub const INSTANCE_PATH: &str = "instance/name";

/// Path of the zone under the metadata base URL
pub const ZONE_PATH: &str = "instance/zone";

/// Response read cap; instance names and zone paths are far shorter
pub const READ_BLOCK_SIZE: usize = 2048;

const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR: &str = "Google";

/// The instance a requirer unit runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub instance: String,
    pub zone: String,
}

/// Somewhere to read instance metadata from
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the raw value at `path` below the metadata root
    async fn fetch(&self, path: &str) -> Result<String, MetadataError>;
}

/// Metadata source backed by the HTTP metadata service
pub struct HttpMetadata {
    client: reqwest::Client,
    base_url: String,
    read_limit: usize,
}

impl HttpMetadata {
    pub fn new(base_url: impl Into<String>, read_limit: usize, timeout: Duration) -> Result<Self, MetadataError> {
        let base_url = base_url.into();
        debug!(%base_url, read_limit, ?timeout, "HttpMetadata::new: called");
        // The metadata server is link-local; never route it through a proxy
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            read_limit,
        })
    }

    pub fn from_config(config: &MetadataConfig) -> Result<Self, MetadataError> {
        Self::new(
            config.base_url.clone(),
            config.read_limit,
            Duration::from_millis(config.timeout_ms),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[async_trait]
impl MetadataSource for HttpMetadata {
    async fn fetch(&self, path: &str) -> Result<String, MetadataError> {
        let url = self.url(path);
        debug!(%url, "HttpMetadata::fetch: called");

        let mut response = self
            .client
            .get(&url)
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR)
            .send()
            .await
            .map_err(|source| MetadataError::Network {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "HttpMetadata::fetch: error status");
            return Err(MetadataError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        // Stop at the cap instead of draining whatever the endpoint sends
        let mut body = Vec::with_capacity(self.read_limit);
        while body.len() < self.read_limit {
            let chunk = response.chunk().await.map_err(|source| MetadataError::Network {
                url: url.clone(),
                source,
            })?;
            match chunk {
                Some(bytes) => {
                    let take = bytes.len().min(self.read_limit - body.len());
                    body.extend_from_slice(&bytes[..take]);
                }
                None => break,
            }
        }

        debug!(body_len = body.len(), "HttpMetadata::fetch: body read");
        String::from_utf8(body).map_err(|_| MetadataError::InvalidUtf8 { url })
    }
}

/// Metadata source with fixed answers
///
/// Counts fetches so callers can confirm that caching holds.
#[derive(Debug, Default)]
pub struct StaticMetadata {
    responses: HashMap<String, String>,
    calls: AtomicUsize,
}

impl StaticMetadata {
    pub fn new(instance: impl Into<String>, zone: impl Into<String>) -> Self {
        let mut responses = HashMap::new();
        responses.insert(INSTANCE_PATH.to_string(), instance.into());
        responses.insert(ZONE_PATH.to_string(), zone.into());
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn fetch(&self, path: &str) -> Result<String, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses.get(path).cloned().ok_or_else(|| MetadataError::Status {
            url: path.to_string(),
            status: 404,
        })
    }
}

/// Resolves and caches this unit's identity
pub struct IdentityResolver<M, S> {
    source: M,
    store: S,
    endpoint: String,
    instance: Option<String>,
    zone: Option<String>,
}

impl<M: MetadataSource, S: KeyValueStore> IdentityResolver<M, S> {
    pub fn new(source: M, store: S, endpoint: impl Into<String>) -> Self {
        Self {
            source,
            store,
            endpoint: endpoint.into(),
            instance: None,
            zone: None,
        }
    }

    /// This unit's instance id
    pub async fn instance_id(&mut self) -> Result<String, IntegrationError> {
        if let Some(instance) = &self.instance {
            return Ok(instance.clone());
        }
        let instance = self.lookup(INSTANCE_PATH, "instance", |raw| raw.trim().to_string()).await?;
        self.instance = Some(instance.clone());
        Ok(instance)
    }

    /// The zone this unit runs in
    ///
    /// The endpoint answers with a resource path such as
    /// `projects/123/zones/us-east1-b`; only the last segment is kept.
    pub async fn zone(&mut self) -> Result<String, IntegrationError> {
        if let Some(zone) = &self.zone {
            return Ok(zone.clone());
        }
        let zone = self.lookup(ZONE_PATH, "zone", last_path_segment).await?;
        self.zone = Some(zone.clone());
        Ok(zone)
    }

    /// Both halves of the identity
    pub async fn resolve(&mut self) -> Result<Identity, IntegrationError> {
        Ok(Identity {
            instance: self.instance_id().await?,
            zone: self.zone().await?,
        })
    }

    /// The identity, if both halves are already resolved in this process
    pub fn cached(&self) -> Option<Identity> {
        Some(Identity {
            instance: self.instance.clone()?,
            zone: self.zone.clone()?,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn lookup(
        &mut self,
        path: &str,
        name: &str,
        normalize: impl Fn(&str) -> String,
    ) -> Result<String, IntegrationError> {
        let cache_key = format!("{}.{}", self.endpoint, name);
        if let Some(cached) = self.store.get_string(&cache_key)?
            && !cached.is_empty()
        {
            debug!(%cache_key, "IdentityResolver::lookup: store hit");
            return Ok(cached);
        }

        let raw = self.source.fetch(path).await?;
        let value = normalize(&raw);
        if value.is_empty() {
            return Err(MetadataError::Empty { url: path.to_string() }.into());
        }

        self.store.set(&cache_key, Value::String(value.clone()))?;
        info!(%name, %value, "Resolved instance metadata");
        Ok(value)
    }
}

fn last_path_segment(raw: &str) -> String {
    raw.trim().rsplit('/').next().unwrap_or_default().to_string()
}
