//! Content fingerprints for published requests
//!
//! Both sides of the relation hash the same canonical encoding: object keys
//! sorted at every depth, compact separators, UTF-8, SHA-256, lowercase hex.
//! The requirer's `requested` marker and the provider's completion record
//! only agree if both sides produce byte-identical encodings.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::request::{Databag, RequestKey};

/// Hex-encoded SHA-256 digest of a canonical request mapping
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed digest (e.g. read back from a completion record)
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fingerprint an arbitrary JSON object
pub fn fingerprint(mapping: &Map<String, Value>) -> Fingerprint {
    let mut buf = Vec::new();
    write_object(mapping, &mut buf);
    Fingerprint(hex::encode(Sha256::digest(&buf)))
}

/// Fingerprint a published databag, leaving out the `requested` marker
pub fn request_fingerprint(databag: &Databag) -> Fingerprint {
    let mapping: Map<String, Value> = databag
        .iter()
        .filter(|(key, _)| key.as_str() != RequestKey::Requested.as_str())
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    fingerprint(&mapping)
}

fn write_object(mapping: &Map<String, Value>, buf: &mut Vec<u8>) {
    let mut entries: Vec<(&String, &Value)> = mapping.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    buf.push(b'{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            buf.push(b',');
        }
        write_scalar(&Value::String(key.clone()), buf);
        buf.push(b':');
        write_value(value, buf);
    }
    buf.push(b'}');
}

fn write_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Object(map) => write_object(map, buf),
        Value::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_value(item, buf);
            }
            buf.push(b']');
        }
        scalar => write_scalar(scalar, buf),
    }
}

fn write_scalar(value: &Value, buf: &mut Vec<u8>) {
    // Scalars have exactly one compact encoding
    buf.extend_from_slice(value.to_string().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_empty_mapping_is_digest_of_empty_object() {
        // sha256("{}")
        assert_eq!(
            fingerprint(&Map::new()).as_str(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
        assert_eq!(request_fingerprint(&Databag::new()), fingerprint(&Map::new()));
    }

    #[test]
    fn test_nested_keys_are_sorted() {
        let a = object(json!({"b": {"y": 1, "x": [1, {"q": null, "p": "s"}]}, "a": true}));
        let mut buf = Vec::new();
        write_object(&a, &mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            r#"{"a":true,"b":{"x":[1,{"p":"s","q":null}],"y":1}}"#
        );
    }

    #[test]
    fn test_requested_marker_is_excluded() {
        let mut bag = Databag::new();
        bag.insert("instance-labels".into(), r#"{"tag1":"value1"}"#.into());
        let before = request_fingerprint(&bag);

        bag.insert("requested".into(), before.to_string());
        assert_eq!(request_fingerprint(&bag), before);
    }

    #[test]
    fn test_value_change_changes_fingerprint() {
        let a = object(json!({"enable-dns": "true"}));
        let b = object(json!({"enable-dns": "false"}));
        let c = object(json!({"enable-dns": "true", "zone": "\"us-east1\""}));
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_display_and_serde_are_plain_hex() {
        let fp = Fingerprint::from_hex("abc123");
        assert_eq!(fp.to_string(), "abc123");
        assert_eq!(serde_json::to_string(&fp).unwrap(), "\"abc123\"");
    }

    proptest! {
        #[test]
        fn prop_insertion_order_does_not_matter(
            entries in proptest::collection::btree_map("[a-z-]{1,12}", "[ -~]{0,16}", 0..8)
        ) {
            let forward: Map<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let mut reversed = Map::new();
            for (k, v) in entries.iter().rev() {
                reversed.insert(k.clone(), Value::String(v.clone()));
            }
            prop_assert_eq!(fingerprint(&forward), fingerprint(&reversed));
            prop_assert_eq!(fingerprint(&forward), fingerprint(&forward));
        }

        #[test]
        fn prop_adding_a_key_changes_fingerprint(
            entries in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..6),
            extra_value in "[a-z0-9]{0,8}"
        ) {
            let base: Map<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let mut grown = base.clone();
            // Upper-case keys never collide with the generated lower-case ones
            grown.insert("EXTRA".to_string(), Value::String(extra_value));
            prop_assert_ne!(fingerprint(&base), fingerprint(&grown));
        }
    }
}
