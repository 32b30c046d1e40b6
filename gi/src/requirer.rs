//! Requirer side of the integration relation
//!
//! A requirer publishes what it needs (capability flags, instance labels,
//! storage patterns) plus its own identity, stamps the published bag with
//! its fingerprint, and is ready once the provider's completion record holds
//! that same fingerprint under its instance id.
//!
//! Readiness is never stored. Every evaluation reads the channel fresh, so a
//! missed, duplicated, or replayed notification cannot leave it stale.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use unitstore::KeyValueStore;

use crate::channel::{ChannelEvent, Relation};
use crate::config::Config;
use crate::error::IntegrationError;
use crate::fingerprint::{Fingerprint, request_fingerprint};
use crate::identity::{Identity, IdentityResolver, MetadataSource};
use crate::request::{
    CREDENTIALS_KEY, Databag, InstanceLabels, RequestKey, RequestedMarker, completion_record, decode_string,
    encode_value,
};

/// Requirer-side view of the relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    /// No relation to a provider, or it is being torn down
    Missing,
    /// Related, but the current request is not fulfilled yet
    Waiting,
    /// The provider fulfilled exactly the currently published request
    Ready,
}

impl Readiness {
    /// Status text for the unit, `None` when ready
    pub fn status_message(self, endpoint: &str) -> Option<String> {
        match self {
            Readiness::Missing => Some(format!("Missing required {}", endpoint)),
            Readiness::Waiting => Some(format!("Waiting for {}", endpoint)),
            Readiness::Ready => None,
        }
    }
}

/// Requests cloud integration features from a provider
pub struct Requirer<M, S> {
    endpoint: String,
    charm: String,
    model_uuid: Option<String>,
    resolver: IdentityResolver<M, S>,
}

impl<M: MetadataSource, S: KeyValueStore> Requirer<M, S> {
    pub fn new(endpoint: impl Into<String>, charm: impl Into<String>, source: M, store: S) -> Self {
        let endpoint = endpoint.into();
        Self {
            resolver: IdentityResolver::new(source, store, endpoint.clone()),
            endpoint,
            charm: charm.into(),
            model_uuid: None,
        }
    }

    pub fn from_config(config: &Config, source: M, store: S) -> Self {
        let mut requirer = Self::new(config.endpoint.clone(), config.charm.clone(), source, store);
        requirer.model_uuid = config.model_uuid.clone();
        requirer
    }

    pub fn with_model_uuid(mut self, model_uuid: impl Into<String>) -> Self {
        self.model_uuid = Some(model_uuid.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn resolver(&self) -> &IdentityResolver<M, S> {
        &self.resolver
    }

    /// React to a relation notification and report the resulting readiness
    ///
    /// On `Joined`, or on any other live event while the local partition
    /// still lacks an `instance`, the unit's identity is resolved and
    /// published first. A resolution failure is returned and nothing is
    /// published.
    pub async fn handle<R: Relation>(
        &mut self,
        relation: Option<&mut R>,
        event: &ChannelEvent,
    ) -> Result<Readiness, IntegrationError> {
        debug!(?event, "Requirer::handle: called");
        let Some(relation) = relation else {
            return Ok(Readiness::Missing);
        };

        let unpublished = decode_string(relation.local(), RequestKey::Instance).is_none();
        match event {
            ChannelEvent::Broken => {}
            ChannelEvent::Joined(_) => {
                self.send_instance_info(relation).await?;
            }
            _ if unpublished => {
                debug!("Requirer::handle: identity not yet published, publishing now");
                self.send_instance_info(relation).await?;
            }
            _ => {}
        }

        let readiness = self.evaluate_event(Some(&*relation), event);
        info!(endpoint = %self.endpoint, ?readiness, "Relation evaluated");
        Ok(readiness)
    }

    /// Resolve this unit's identity and publish it with the request
    pub async fn send_instance_info<R: Relation>(&mut self, relation: &mut R) -> Result<Identity, IntegrationError> {
        debug!("Requirer::send_instance_info: called");
        let identity = self.resolver.resolve().await?;

        let mut updates = vec![
            (RequestKey::Instance, Some(Value::String(identity.instance.clone()))),
            (RequestKey::Zone, Some(Value::String(identity.zone.clone()))),
            (RequestKey::Charm, Some(Value::String(self.charm.clone()))),
        ];
        if let Some(uuid) = &self.model_uuid {
            updates.push((RequestKey::ModelUuid, Some(Value::String(uuid.clone()))));
        }
        self.request(relation, updates);
        Ok(identity)
    }

    /// Readiness computed from current channel contents
    pub fn evaluate<R: Relation>(&self, relation: Option<&R>) -> Readiness {
        match relation {
            None => Readiness::Missing,
            Some(rel) if self.is_ready(rel) => Readiness::Ready,
            Some(_) => Readiness::Waiting,
        }
    }

    /// Like [`Requirer::evaluate`], but a `Broken` event reads as missing
    pub fn evaluate_event<R: Relation>(&self, relation: Option<&R>, event: &ChannelEvent) -> Readiness {
        if *event == ChannelEvent::Broken {
            return Readiness::Missing;
        }
        self.evaluate(relation)
    }

    /// Whether the provider has completed the currently published request
    pub fn is_ready<R: Relation>(&self, relation: &R) -> bool {
        let local = relation.local();
        if RequestedMarker::read(local).is_none() {
            debug!("Requirer::is_ready: nothing requested");
            return false;
        }
        let Some(instance) = self.instance_id(relation) else {
            debug!("Requirer::is_ready: identity not published");
            return false;
        };

        let expected = request_fingerprint(local);
        let completed = received(relation)
            .map(completion_record)
            .unwrap_or_default()
            .remove(&instance);
        debug!(%expected, ?completed, "Requirer::is_ready: comparing");
        completed.as_ref() == Some(&expected)
    }

    /// Fingerprint of what is currently published, if anything was requested
    pub fn requested_fingerprint<R: Relation>(&self, relation: &R) -> Option<Fingerprint> {
        RequestedMarker::read(relation.local()).map(|_| request_fingerprint(relation.local()))
    }

    /// Credentials shared by the provider, if any
    pub fn credentials<R: Relation>(&self, relation: &R) -> Option<String> {
        received(relation).and_then(|bag| bag.get(CREDENTIALS_KEY).cloned())
    }

    /// Request that the given labels be applied to this instance
    ///
    /// Replaces any previously requested label set.
    pub fn tag_instance<R: Relation>(&self, relation: &mut R, labels: InstanceLabels) {
        let object = labels
            .into_iter()
            .map(|(name, value)| (name, value.map(Value::String).unwrap_or(Value::Null)))
            .collect();
        self.request(relation, vec![(RequestKey::InstanceLabels, Some(Value::Object(object)))]);
    }

    /// Alias for [`Requirer::tag_instance`]
    pub fn label_instance<R: Relation>(&self, relation: &mut R, labels: InstanceLabels) {
        self.tag_instance(relation, labels);
    }

    pub fn enable_instance_inspection<R: Relation>(&self, relation: &mut R) {
        self.request_flag(relation, RequestKey::EnableInstanceInspection);
    }

    /// Request the ability to manage networking (subnets, routes, etc)
    pub fn enable_network_management<R: Relation>(&self, relation: &mut R) {
        self.request_flag(relation, RequestKey::EnableNetworkManagement);
    }

    pub fn enable_load_balancer_management<R: Relation>(&self, relation: &mut R) {
        self.request_flag(relation, RequestKey::EnableLoadBalancerManagement);
    }

    /// Request the ability to manage security (e.g. firewalls)
    pub fn enable_security_management<R: Relation>(&self, relation: &mut R) {
        self.request_flag(relation, RequestKey::EnableSecurityManagement);
    }

    pub fn enable_block_storage_management<R: Relation>(&self, relation: &mut R) {
        self.request_flag(relation, RequestKey::EnableBlockStorageManagement);
    }

    pub fn enable_dns_management<R: Relation>(&self, relation: &mut R) {
        self.request_flag(relation, RequestKey::EnableDns);
    }

    /// Request object storage access, optionally restricted to `patterns`
    ///
    /// `None` withdraws any previously published restriction.
    pub fn enable_object_storage_access<R: Relation>(&self, relation: &mut R, patterns: Option<Vec<String>>) {
        self.request(
            relation,
            vec![
                (RequestKey::EnableObjectStorageAccess, Some(Value::Bool(true))),
                (RequestKey::ObjectStorageAccessPatterns, patterns.map(string_list)),
            ],
        );
    }

    /// Request object storage management, optionally restricted to `patterns`
    pub fn enable_object_storage_management<R: Relation>(&self, relation: &mut R, patterns: Option<Vec<String>>) {
        self.request(
            relation,
            vec![
                (RequestKey::EnableObjectStorageManagement, Some(Value::Bool(true))),
                (RequestKey::ObjectStorageManagementPatterns, patterns.map(string_list)),
            ],
        );
    }

    fn request_flag<R: Relation>(&self, relation: &mut R, key: RequestKey) {
        self.request(relation, vec![(key, Some(Value::Bool(true)))]);
    }

    /// Apply `updates` to the published bag and restamp the `requested` marker
    ///
    /// Keys not named in `updates` keep their published values.
    fn request<R: Relation>(&self, relation: &mut R, updates: Vec<(RequestKey, Option<Value>)>) {
        let local = relation.local_mut();
        for (key, value) in updates {
            debug!(key = key.as_str(), ?value, "Requirer::request: updating key");
            match value {
                Some(value) => {
                    local.insert(key.as_str().to_string(), encode_value(&value));
                }
                None => {
                    local.remove(key.as_str());
                }
            }
        }

        let fingerprint = request_fingerprint(local);
        local.insert(RequestKey::Requested.as_str().to_string(), fingerprint.to_string());
        info!(endpoint = %self.endpoint, %fingerprint, "Published request");
    }

    fn instance_id<R: Relation>(&self, relation: &R) -> Option<String> {
        self.resolver
            .cached()
            .map(|identity| identity.instance)
            .or_else(|| decode_string(relation.local(), RequestKey::Instance))
    }
}

/// The provider's partition; a requirer talks to exactly one provider unit
fn received<R: Relation>(relation: &R) -> Option<&Databag> {
    let unit = relation.units().into_iter().next()?;
    relation.remote(&unit)
}

fn string_list(items: Vec<String>) -> Value {
    Value::Array(items.into_iter().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryRelation;
    use crate::identity::StaticMetadata;
    use crate::request::COMPLETED_KEY;
    use unitstore::MemoryStore;

    const PROVIDER_UNIT: &str = "gcp-integrator/0";
    const INSTANCE: &str = "i-abcdefghijklmnopq";

    fn requirer() -> Requirer<StaticMetadata, MemoryStore> {
        Requirer::new(
            "gcp",
            "test",
            StaticMetadata::new(INSTANCE, "projects/1/zones/us-east1-b"),
            MemoryStore::new(),
        )
    }

    fn complete(relation: &mut MemoryRelation, instance: &str, fingerprint: &Fingerprint) {
        let record = format!(r#"{{"{}": "{}"}}"#, instance, fingerprint);
        relation
            .remote_mut(PROVIDER_UNIT)
            .unwrap()
            .insert(COMPLETED_KEY.to_string(), record);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(Readiness::Missing.status_message("gcp").unwrap(), "Missing required gcp");
        assert_eq!(Readiness::Waiting.status_message("gcp").unwrap(), "Waiting for gcp");
        assert!(Readiness::Ready.status_message("gcp").is_none());
    }

    #[tokio::test]
    async fn test_missing_without_relation() {
        let mut req = requirer();
        let readiness = req
            .handle::<MemoryRelation>(None, &ChannelEvent::Changed(PROVIDER_UNIT.into()))
            .await
            .unwrap();
        assert_eq!(readiness, Readiness::Missing);
        assert_eq!(req.evaluate::<MemoryRelation>(None), Readiness::Missing);
    }

    #[tokio::test]
    async fn test_joined_publishes_identity_and_waits() {
        let mut req = requirer().with_model_uuid("cf67b90e-7201-4f23-8c0a-e1f453f1dc2e");
        let mut rel = MemoryRelation::new();
        let event = rel.join(PROVIDER_UNIT);

        let readiness = req.handle(Some(&mut rel), &event).await.unwrap();
        assert_eq!(readiness, Readiness::Waiting);

        let local = rel.local();
        assert_eq!(local.get("instance").unwrap(), "\"i-abcdefghijklmnopq\"");
        assert_eq!(local.get("zone").unwrap(), "\"us-east1-b\"");
        assert_eq!(local.get("charm").unwrap(), "\"test\"");
        assert_eq!(local.get("model-uuid").unwrap(), "\"cf67b90e-7201-4f23-8c0a-e1f453f1dc2e\"");
        assert_eq!(local.get("requested").unwrap(), request_fingerprint(local).as_str());
    }

    #[tokio::test]
    async fn test_exact_match_is_ready() {
        let mut req = requirer();
        let mut rel = MemoryRelation::new();
        let event = rel.join(PROVIDER_UNIT);
        req.handle(Some(&mut rel), &event).await.unwrap();

        let mut labels = InstanceLabels::new();
        labels.insert("tag1".into(), Some("value1".into()));
        labels.insert("tag2".into(), None);
        req.tag_instance(&mut rel, labels);
        assert_eq!(rel.local().get("instance-labels").unwrap(), r#"{"tag1":"value1","tag2":null}"#);

        let fingerprint = req.requested_fingerprint(&rel).unwrap();
        complete(&mut rel, INSTANCE, &fingerprint);

        assert!(req.is_ready(&rel));
        assert_eq!(req.evaluate(Some(&rel)), Readiness::Ready);
    }

    #[tokio::test]
    async fn test_rerequest_invalidates_readiness() {
        let mut req = requirer();
        let mut rel = MemoryRelation::new();
        let event = rel.join(PROVIDER_UNIT);
        req.handle(Some(&mut rel), &event).await.unwrap();

        req.enable_dns_management(&mut rel);
        let fingerprint = req.requested_fingerprint(&rel).unwrap();
        complete(&mut rel, INSTANCE, &fingerprint);
        assert_eq!(req.evaluate(Some(&rel)), Readiness::Ready);

        // Republishing the same request keeps it ready
        req.enable_dns_management(&mut rel);
        assert_eq!(req.evaluate(Some(&rel)), Readiness::Ready);

        // A new capability changes the fingerprint
        req.enable_network_management(&mut rel);
        assert_eq!(req.evaluate(Some(&rel)), Readiness::Waiting);
    }

    #[tokio::test]
    async fn test_changed_without_joined_publishes_identity() {
        let mut req = requirer();
        let mut rel = MemoryRelation::new();
        // Joined is lost; only a later Changed arrives
        rel.join(PROVIDER_UNIT);
        req.enable_dns_management(&mut rel);

        let event = ChannelEvent::Changed(PROVIDER_UNIT.into());
        let readiness = req.handle(Some(&mut rel), &event).await.unwrap();
        assert_eq!(readiness, Readiness::Waiting);
        assert_eq!(rel.local().get("instance").unwrap(), "\"i-abcdefghijklmnopq\"");
        assert_eq!(rel.local().get("enable-dns").unwrap(), "true");
        assert_eq!(rel.local().get("requested").unwrap(), request_fingerprint(rel.local()).as_str());

        // Identity is already published; completing the request converges
        let fingerprint = req.requested_fingerprint(&rel).unwrap();
        complete(&mut rel, INSTANCE, &fingerprint);
        let readiness = req.handle(Some(&mut rel), &event).await.unwrap();
        assert_eq!(readiness, Readiness::Ready);
        assert_eq!(req.resolver().store().get_string("gcp.instance").unwrap().as_deref(), Some(INSTANCE));
    }

    #[tokio::test]
    async fn test_broken_event_reads_missing() {
        let mut req = requirer();
        let mut rel = MemoryRelation::new();
        let event = rel.join(PROVIDER_UNIT);
        req.handle(Some(&mut rel), &event).await.unwrap();
        let fingerprint = req.requested_fingerprint(&rel).unwrap();
        complete(&mut rel, INSTANCE, &fingerprint);

        let readiness = req.handle(Some(&mut rel), &ChannelEvent::Broken).await.unwrap();
        assert_eq!(readiness, Readiness::Missing);
    }

    #[tokio::test]
    async fn test_resolution_failure_publishes_nothing() {
        let mut req: Requirer<StaticMetadata, MemoryStore> =
            Requirer::new("gcp", "test", StaticMetadata::default(), MemoryStore::new());
        let mut rel = MemoryRelation::new();
        let event = rel.join(PROVIDER_UNIT);

        let err = req.handle(Some(&mut rel), &event).await.unwrap_err();
        assert!(err.is_resolution_failure());
        assert!(rel.local().is_empty());
    }

    #[test]
    fn test_completion_for_other_instance_is_not_ready() {
        let req = requirer();
        let mut rel = MemoryRelation::new();
        rel.join(PROVIDER_UNIT);
        req.enable_instance_inspection(&mut rel);
        rel.local_mut().insert("instance".into(), format!("\"{}\"", INSTANCE));
        let fingerprint = request_fingerprint(rel.local());

        complete(&mut rel, "i-someone-else", &fingerprint);
        assert_eq!(req.evaluate(Some(&rel)), Readiness::Waiting);
    }

    #[test]
    fn test_malformed_completion_record_reads_waiting() {
        let req = requirer();
        let mut rel = MemoryRelation::new();
        rel.join(PROVIDER_UNIT);
        req.enable_instance_inspection(&mut rel);
        rel.remote_mut(PROVIDER_UNIT)
            .unwrap()
            .insert(COMPLETED_KEY.into(), "{oops".into());

        assert_eq!(req.evaluate(Some(&rel)), Readiness::Waiting);
    }

    #[test]
    fn test_patterns_none_withdraws_restriction() {
        let req = requirer();
        let mut rel = MemoryRelation::new();

        req.enable_object_storage_access(&mut rel, Some(vec!["bucket-a/*".into()]));
        assert_eq!(
            rel.local().get("object-storage-access-patterns").unwrap(),
            r#"["bucket-a/*"]"#
        );

        req.enable_object_storage_access(&mut rel, None);
        assert!(!rel.local().contains_key("object-storage-access-patterns"));
        assert_eq!(rel.local().get("enable-object-storage-access").unwrap(), "true");
    }

    #[test]
    fn test_unrelated_keys_persist_across_mutations() {
        let req = requirer();
        let mut rel = MemoryRelation::new();

        req.enable_block_storage_management(&mut rel);
        req.enable_security_management(&mut rel);
        req.enable_load_balancer_management(&mut rel);
        req.enable_object_storage_management(&mut rel, None);

        let local = rel.local();
        for key in [
            "enable-block-storage-management",
            "enable-security-management",
            "enable-load-balancer-management",
            "enable-object-storage-management",
        ] {
            assert_eq!(local.get(key).map(String::as_str), Some("true"), "{key}");
        }
        assert_eq!(local.get("requested").unwrap(), request_fingerprint(local).as_str());
    }

    #[test]
    fn test_credentials_from_provider() {
        let req = requirer();
        let mut rel = MemoryRelation::new();
        assert!(req.credentials(&rel).is_none());

        rel.join(PROVIDER_UNIT);
        rel.remote_mut(PROVIDER_UNIT)
            .unwrap()
            .insert(CREDENTIALS_KEY.into(), "c2VjcmV0".into());
        assert_eq!(req.credentials(&rel).as_deref(), Some("c2VjcmV0"));
    }
}
