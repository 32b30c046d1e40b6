//! Request wire model
//!
//! A databag is one side's partition of the relation: string keys mapped to
//! string values. Request values are the JSON encoding of their typed value
//! (`true`, a label object, a pattern list, a quoted string), so the
//! published bag stays readable by any peer that speaks the same keys.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::fingerprint::{Fingerprint, request_fingerprint};

/// One side's partition of the relation
pub type Databag = BTreeMap<String, String>;

/// Name of a remote unit on the relation, e.g. `worker/0`
pub type UnitName = String;

/// Label name to optional value; `None` applies the label with no value
pub type InstanceLabels = BTreeMap<String, Option<String>>;

/// Provider-published key holding the CompletionRecord
pub const COMPLETED_KEY: &str = "completed";

/// Provider-published key holding credentials, when the provider shares any
pub const CREDENTIALS_KEY: &str = "credentials";

/// Recognized requirer-published keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKey {
    Instance,
    Zone,
    Charm,
    ModelUuid,
    InstanceLabels,
    EnableInstanceInspection,
    EnableNetworkManagement,
    EnableLoadBalancerManagement,
    EnableSecurityManagement,
    EnableBlockStorageManagement,
    EnableDns,
    EnableDnsManagement,
    EnableObjectStorageAccess,
    ObjectStorageAccessPatterns,
    EnableObjectStorageManagement,
    ObjectStorageManagementPatterns,
    Requested,
}

impl RequestKey {
    pub const ALL: [RequestKey; 17] = [
        RequestKey::Instance,
        RequestKey::Zone,
        RequestKey::Charm,
        RequestKey::ModelUuid,
        RequestKey::InstanceLabels,
        RequestKey::EnableInstanceInspection,
        RequestKey::EnableNetworkManagement,
        RequestKey::EnableLoadBalancerManagement,
        RequestKey::EnableSecurityManagement,
        RequestKey::EnableBlockStorageManagement,
        RequestKey::EnableDns,
        RequestKey::EnableDnsManagement,
        RequestKey::EnableObjectStorageAccess,
        RequestKey::ObjectStorageAccessPatterns,
        RequestKey::EnableObjectStorageManagement,
        RequestKey::ObjectStorageManagementPatterns,
        RequestKey::Requested,
    ];

    /// Key as it appears in the databag
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKey::Instance => "instance",
            RequestKey::Zone => "zone",
            RequestKey::Charm => "charm",
            RequestKey::ModelUuid => "model-uuid",
            RequestKey::InstanceLabels => "instance-labels",
            RequestKey::EnableInstanceInspection => "enable-instance-inspection",
            RequestKey::EnableNetworkManagement => "enable-network-management",
            RequestKey::EnableLoadBalancerManagement => "enable-load-balancer-management",
            RequestKey::EnableSecurityManagement => "enable-security-management",
            RequestKey::EnableBlockStorageManagement => "enable-block-storage-management",
            RequestKey::EnableDns => "enable-dns",
            RequestKey::EnableDnsManagement => "enable-dns-management",
            RequestKey::EnableObjectStorageAccess => "enable-object-storage-access",
            RequestKey::ObjectStorageAccessPatterns => "object-storage-access-patterns",
            RequestKey::EnableObjectStorageManagement => "enable-object-storage-management",
            RequestKey::ObjectStorageManagementPatterns => "object-storage-management-patterns",
            RequestKey::Requested => "requested",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

/// Encode a typed value for the wire
pub fn encode_value(value: &Value) -> String {
    value.to_string()
}

/// Decode a typed field; absent or malformed values read as `None`
pub fn decode_field<T: DeserializeOwned>(databag: &Databag, key: RequestKey) -> Option<T> {
    let raw = databag.get(key.as_str())?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = key.as_str(), %raw, error = %e, "decode_field: ignoring malformed value");
            None
        }
    }
}

/// Decode a string field, accepting both JSON-quoted and bare values
pub fn decode_string(databag: &Databag, key: RequestKey) -> Option<String> {
    let raw = databag.get(key.as_str())?;
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => s,
        Ok(Value::Null) => return None,
        _ => raw.clone(),
    };
    if value.is_empty() { None } else { Some(value) }
}

/// The `requested` marker as published by a requirer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedMarker {
    /// Fingerprint of the published request
    Fingerprint(Fingerprint),
    /// Bare `true` from requirers that predate fingerprint markers
    Legacy,
}

impl RequestedMarker {
    /// Read the marker; anything but a fingerprint or `true` means "not requested"
    ///
    /// Numbers, arrays, and objects are not markers. The one exception is a
    /// bare digest made only of decimal digits, which parses as a number.
    pub fn read(databag: &Databag) -> Option<Self> {
        let raw = databag.get(RequestKey::Requested.as_str())?;
        let trimmed = raw.trim();
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Bool(true)) => Some(RequestedMarker::Legacy),
            Ok(Value::String(s)) if !s.is_empty() => Some(RequestedMarker::Fingerprint(Fingerprint::from_hex(s))),
            Ok(Value::Number(_)) if is_hex_digest(trimmed) => {
                Some(RequestedMarker::Fingerprint(Fingerprint::from_hex(trimmed)))
            }
            Ok(_) => None,
            // Bare hex digests are published unquoted and are not valid JSON
            Err(_) if !trimmed.is_empty() => Some(RequestedMarker::Fingerprint(Fingerprint::from_hex(trimmed))),
            Err(_) => None,
        }
    }
}

/// A full lowercase SHA-256 hex digest
fn is_hex_digest(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Typed view of the capability fields of a request
///
/// Absent fields mean "not requested". A flag published as `false` is kept
/// as `Some(false)` so callers can tell it apart from silence, but the
/// `requested_*` helpers treat both as not requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFields {
    pub instance_labels: Option<InstanceLabels>,
    pub instance_inspection: Option<bool>,
    pub network_management: Option<bool>,
    pub load_balancer_management: Option<bool>,
    pub security_management: Option<bool>,
    pub block_storage_management: Option<bool>,
    pub dns_management: Option<bool>,
    pub object_storage_access: Option<bool>,
    pub object_storage_access_patterns: Option<Vec<String>>,
    pub object_storage_management: Option<bool>,
    pub object_storage_management_patterns: Option<Vec<String>>,
}

impl RequestFields {
    pub fn from_databag(databag: &Databag) -> Self {
        let dns = decode_field::<bool>(databag, RequestKey::EnableDns);
        let dns_management = decode_field::<bool>(databag, RequestKey::EnableDnsManagement);

        Self {
            instance_labels: decode_field(databag, RequestKey::InstanceLabels),
            instance_inspection: decode_field(databag, RequestKey::EnableInstanceInspection),
            network_management: decode_field(databag, RequestKey::EnableNetworkManagement),
            load_balancer_management: decode_field(databag, RequestKey::EnableLoadBalancerManagement),
            security_management: decode_field(databag, RequestKey::EnableSecurityManagement),
            block_storage_management: decode_field(databag, RequestKey::EnableBlockStorageManagement),
            dns_management: match (dns, dns_management) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(false) || b.unwrap_or(false)),
            },
            object_storage_access: decode_field(databag, RequestKey::EnableObjectStorageAccess),
            object_storage_access_patterns: decode_field(databag, RequestKey::ObjectStorageAccessPatterns),
            object_storage_management: decode_field(databag, RequestKey::EnableObjectStorageManagement),
            object_storage_management_patterns: decode_field(databag, RequestKey::ObjectStorageManagementPatterns),
        }
    }
}

/// A request from a single remote unit, as seen by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationRequest {
    pub unit_name: UnitName,
    pub instance: String,
    pub zone: Option<String>,
    pub charm: Option<String>,
    pub model_uuid: Option<String>,
    pub fields: RequestFields,
    pub fingerprint: Fingerprint,
}

impl IntegrationRequest {
    /// Build the typed view of a remote unit's databag
    ///
    /// Returns `None` when the unit has not published an instance id or has
    /// not marked its data as a request yet.
    pub fn from_databag(unit_name: &str, databag: &Databag) -> Option<Self> {
        debug!(%unit_name, "IntegrationRequest::from_databag: called");
        let instance = decode_string(databag, RequestKey::Instance)?;
        RequestedMarker::read(databag)?;

        Some(Self {
            unit_name: unit_name.to_string(),
            instance,
            zone: decode_string(databag, RequestKey::Zone),
            charm: decode_string(databag, RequestKey::Charm),
            model_uuid: decode_string(databag, RequestKey::ModelUuid),
            fields: RequestFields::from_databag(databag),
            fingerprint: request_fingerprint(databag),
        })
    }

    /// Application part of the unit name (`worker/0` -> `worker`)
    pub fn application_name(&self) -> &str {
        application_name(&self.unit_name)
    }

    /// Labels to apply to this instance; empty when none were requested
    pub fn instance_labels(&self) -> InstanceLabels {
        self.fields.instance_labels.clone().unwrap_or_default()
    }

    pub fn requested_instance_inspection(&self) -> bool {
        self.fields.instance_inspection == Some(true)
    }

    pub fn requested_network_management(&self) -> bool {
        self.fields.network_management == Some(true)
    }

    pub fn requested_load_balancer_management(&self) -> bool {
        self.fields.load_balancer_management == Some(true)
    }

    pub fn requested_security_management(&self) -> bool {
        self.fields.security_management == Some(true)
    }

    pub fn requested_block_storage_management(&self) -> bool {
        self.fields.block_storage_management == Some(true)
    }

    pub fn requested_dns_management(&self) -> bool {
        self.fields.dns_management == Some(true)
    }

    pub fn requested_object_storage_access(&self) -> bool {
        self.fields.object_storage_access == Some(true)
    }

    /// Patterns restricting object storage access; empty means unrestricted
    pub fn object_storage_access_patterns(&self) -> Vec<String> {
        self.fields.object_storage_access_patterns.clone().unwrap_or_default()
    }

    pub fn requested_object_storage_management(&self) -> bool {
        self.fields.object_storage_management == Some(true)
    }

    /// Patterns restricting object storage management; empty means unrestricted
    pub fn object_storage_management_patterns(&self) -> Vec<String> {
        self.fields.object_storage_management_patterns.clone().unwrap_or_default()
    }
}

/// Parse the CompletionRecord; absent or malformed reads as empty
///
/// Entries whose value is not a non-empty string are skipped one by one, so
/// a bad entry for one instance never hides the others.
pub fn completion_record(databag: &Databag) -> BTreeMap<String, Fingerprint> {
    let Some(raw) = databag.get(COMPLETED_KEY) else {
        return BTreeMap::new();
    };
    let entries: Map<String, Value> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(%raw, error = %e, "completion_record: ignoring malformed completion record");
            return BTreeMap::new();
        }
    };
    entries
        .into_iter()
        .filter_map(|(instance, value)| match value {
            Value::String(hex) if !hex.is_empty() => Some((instance, Fingerprint::from_hex(hex))),
            other => {
                warn!(%instance, value = %other, "completion_record: skipping malformed entry");
                None
            }
        })
        .collect()
}

/// Application part of a unit name
pub fn application_name(unit_name: &str) -> &str {
    unit_name.split('/').next().unwrap_or(unit_name)
}
