//! Provider side of the integration relation
//!
//! The provider watches every joined requirer unit, surfaces each request
//! once per distinct fingerprint, and publishes a completion record mapping
//! instance id to the fingerprint it fulfilled.
//!
//! The ChangeCache in the local store remembers what was already surfaced,
//! keyed `<endpoint>.request.<instance>`. It only suppresses duplicate work;
//! it says nothing about whether the work was done. Consumers of
//! [`Provider::requests`] that need to re-drive unfinished work must track
//! that themselves.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use unitstore::KeyValueStore;

use crate::channel::{ChannelEvent, Relation};
use crate::error::IntegrationError;
use crate::fingerprint::Fingerprint;
use crate::request::{
    COMPLETED_KEY, IntegrationRequest, RequestKey, UnitName, application_name, completion_record, decode_string,
};

/// Instance info reported by a joined unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitInstance {
    pub instance: Option<String>,
    pub zone: Option<String>,
}

/// Fulfils integration requests for connected requirer units
pub struct Provider<S> {
    endpoint: String,
    store: S,
}

impl<S: KeyValueStore> Provider<S> {
    pub fn new(endpoint: impl Into<String>, store: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            store,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// React to a relation notification, returning newly pending requests
    ///
    /// Departures queued on the relation are cleaned up before the pending
    /// query runs, whichever event arrived; a lost `Departed` is caught up on
    /// the next notification.
    pub fn handle<R: Relation>(
        &mut self,
        relation: &mut R,
        event: &ChannelEvent,
    ) -> Result<Vec<IntegrationRequest>, IntegrationError> {
        debug!(?event, "Provider::handle: called");
        let removed = self.cleanup(relation)?;
        if removed > 0 {
            debug!(removed, "Provider::handle: departed units cleaned up");
        }
        self.requests(relation)
    }

    /// New or changed requests since they were last surfaced
    ///
    /// Each returned request is recorded in the ChangeCache immediately, so
    /// the next call will not return it again unless its fingerprint changes.
    pub fn requests<R: Relation>(&mut self, relation: &R) -> Result<Vec<IntegrationRequest>, IntegrationError> {
        let mut pending = Vec::new();

        for unit in relation.units() {
            let Some(databag) = relation.remote(&unit) else {
                continue;
            };
            let Some(request) = IntegrationRequest::from_databag(&unit, databag) else {
                debug!(%unit, "Provider::requests: no request published");
                continue;
            };

            let key = self.cache_key(&request.instance);
            let seen = self.store.get_string(&key)?;
            if seen.as_deref() == Some(request.fingerprint.as_str()) {
                debug!(%unit, instance = %request.instance, "Provider::requests: already surfaced");
                continue;
            }

            self.store.set(&key, Value::String(request.fingerprint.to_string()))?;
            info!(
                %unit,
                instance = %request.instance,
                fingerprint = %request.fingerprint,
                "Surfaced integration request"
            );
            pending.push(request);
        }

        Ok(pending)
    }

    /// Publish that `request` has been fulfilled
    ///
    /// Overwrites the record for the request's instance; repeating the call
    /// with the same request leaves the channel unchanged.
    pub fn mark_completed<R: Relation>(
        &mut self,
        relation: &mut R,
        request: &IntegrationRequest,
    ) -> Result<(), IntegrationError> {
        debug!(instance = %request.instance, "Provider::mark_completed: called");
        let mut record = completion_record(relation.local());
        record.insert(request.instance.clone(), request.fingerprint.clone());
        relation
            .local_mut()
            .insert(COMPLETED_KEY.to_string(), serde_json::to_string(&record)?);

        let key = self.cache_key(&request.instance);
        self.store.set(&key, Value::String(request.fingerprint.to_string()))?;
        info!(instance = %request.instance, fingerprint = %request.fingerprint, "Marked request completed");
        Ok(())
    }

    /// Forget surfaced requests of departed units
    ///
    /// Completion records are kept, so a unit that rejoins with the same
    /// request reads as ready straight away. Returns the number of cache
    /// entries removed.
    pub fn cleanup<R: Relation>(&mut self, relation: &mut R) -> Result<usize, IntegrationError> {
        let mut removed = 0;
        for (unit, databag) in relation.take_departed() {
            let Some(instance) = decode_string(&databag, RequestKey::Instance) else {
                debug!(%unit, "Provider::cleanup: departed unit never published an instance");
                continue;
            };
            let key = self.cache_key(&instance);
            self.store.unset(&key)?;
            info!(%unit, %instance, "Cleared departed unit's request cache");
            removed += 1;
        }
        Ok(removed)
    }

    /// Purge both the cache entry and the completion record for `instance`
    ///
    /// Forces the instance's current request to be surfaced and fulfilled
    /// again.
    pub fn clear<R: Relation>(&mut self, relation: &mut R, instance: &str) -> Result<(), IntegrationError> {
        debug!(%instance, "Provider::clear: called");
        let key = self.cache_key(instance);
        self.store.unset(&key)?;

        let mut record = completion_record(relation.local());
        if record.remove(instance).is_some() {
            relation
                .local_mut()
                .insert(COMPLETED_KEY.to_string(), serde_json::to_string(&record)?);
        }
        info!(%instance, "Cleared request state");
        Ok(())
    }

    /// The CompletionRecord as currently published
    pub fn completed<R: Relation>(&self, relation: &R) -> BTreeMap<String, Fingerprint> {
        completion_record(relation.local())
    }

    /// Names of all applications that still have joined units
    pub fn application_names<R: Relation>(&self, relation: &R) -> BTreeSet<String> {
        relation
            .units()
            .iter()
            .map(|unit| application_name(unit).to_string())
            .collect()
    }

    /// Instance and zone reported by each joined unit
    pub fn unit_instances<R: Relation>(&self, relation: &R) -> BTreeMap<UnitName, UnitInstance> {
        relation
            .units()
            .into_iter()
            .map(|unit| {
                let info = relation
                    .remote(&unit)
                    .map(|bag| UnitInstance {
                        instance: decode_string(bag, RequestKey::Instance),
                        zone: decode_string(bag, RequestKey::Zone),
                    })
                    .unwrap_or(UnitInstance {
                        instance: None,
                        zone: None,
                    });
                (unit, info)
            })
            .collect()
    }

    fn cache_key(&self, instance: &str) -> String {
        format!("{}.request.{}", self.endpoint, instance)
    }
}
