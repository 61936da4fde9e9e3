//! Conversion from compute provider server records to [`Instance`].
//!
//! The provider returns servers as loosely typed JSON: address entries carry
//! extension attributes next to `addr` and `version`, and `version` may be
//! encoded as an integer or a float. Only the fields attestation reads are
//! kept.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use cirrus_attest::{AddressEntry, Instance, InstanceId};
use serde::Deserialize;
use serde_json::Value;

/// Errors converting a provider record.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("malformed server record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("server record has no id")]
    MissingId,
    #[error("invalid created timestamp {value:?}: {source}")]
    InvalidCreated {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

#[derive(Debug, Deserialize)]
struct ServerRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default, rename = "accessIPv4")]
    access_ipv4: Option<String>,
    #[serde(default, rename = "accessIPv6")]
    access_ipv6: Option<String>,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<HashMap<String, Value>>>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    tenant_id: String,
    #[serde(default)]
    user_id: String,
    created: String,
}

/// Build an [`Instance`] from a provider server record.
///
/// Accepts the bare record or one wrapped as `{"server": {...}}`. Address
/// entries without an `addr` are dropped; a missing or unusable `version` is
/// inferred from the address itself.
pub fn instance_from_provider(value: &Value) -> Result<Instance, ConvertError> {
    let record = value.get("server").unwrap_or(value);
    let record = ServerRecord::deserialize(record)?;

    if record.id.is_empty() {
        return Err(ConvertError::MissingId);
    }

    let created = DateTime::parse_from_rfc3339(&record.created)
        .map_err(|source| ConvertError::InvalidCreated {
            value: record.created.clone(),
            source,
        })?
        .with_timezone(&Utc);

    let address_groups = record
        .addresses
        .into_iter()
        .map(|(network, entries)| {
            let entries = entries.iter().filter_map(address_entry).collect();
            (network, entries)
        })
        .collect();

    Ok(Instance {
        id: InstanceId::new(record.id),
        status: record.status,
        access_ipv4: record.access_ipv4.unwrap_or_default(),
        access_ipv6: record.access_ipv6.unwrap_or_default(),
        address_groups,
        metadata: record.metadata,
        tenant_id: record.tenant_id,
        user_id: record.user_id,
        created,
    })
}

fn address_entry(attrs: &HashMap<String, Value>) -> Option<AddressEntry> {
    let addr = attrs.get("addr")?.as_str()?;
    if addr.is_empty() {
        return None;
    }

    let ip_version = attrs
        .get("version")
        .and_then(version_number)
        .or_else(|| match addr.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => Some(4),
            Ok(IpAddr::V6(_)) => Some(6),
            Err(_) => None,
        })
        .unwrap_or(0);

    Some(AddressEntry::new(addr, ip_version))
}

fn version_number(value: &Value) -> Option<u8> {
    let version = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as u64)
        })?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    match version {
        4 | 6 => Some(version as u8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "server": {
                "id": "ef079b0c-e610-4dfb-b1aa-b49f07ac48e5",
                "name": "test0",
                "status": "ACTIVE",
                "accessIPv4": "192.168.1.1",
                "accessIPv6": null,
                "addresses": {
                    "private": [
                        {
                            "OS-EXT-IPS-MAC:mac_addr": "fa:16:3e:9e:89:be",
                            "version": 4,
                            "addr": "10.0.0.5",
                            "OS-EXT-IPS:type": "fixed"
                        },
                        {
                            "version": 6.0,
                            "addr": "fd00::5",
                            "OS-EXT-IPS:type": "fixed"
                        }
                    ],
                    "public": [
                        { "addr": "203.0.113.7", "OS-EXT-IPS:type": "floating" },
                        { "version": 4, "OS-EXT-IPS:type": "floating" }
                    ]
                },
                "metadata": { "vault-role": "test" },
                "tenant_id": "fcad67a6189847c4aecfa3c81a05783b",
                "user_id": "9349aff8be7545ac9d2f1d00999a23cd",
                "created": "2023-11-14T22:13:20Z",
                "OS-EXT-STS:vm_state": "active"
            }
        })
    }

    #[test]
    fn test_convert_full_record() {
        let instance = instance_from_provider(&sample()).unwrap();

        assert_eq!(instance.id.as_str(), "ef079b0c-e610-4dfb-b1aa-b49f07ac48e5");
        assert_eq!(instance.status, "ACTIVE");
        assert_eq!(instance.access_ipv4, "192.168.1.1");
        assert!(instance.access_ipv6.is_empty());
        assert_eq!(instance.metadata.get("vault-role").map(String::as_str), Some("test"));
        assert_eq!(instance.tenant_id, "fcad67a6189847c4aecfa3c81a05783b");
        assert_eq!(instance.created.timestamp(), 1_700_000_000);

        assert_eq!(
            instance.address_groups["private"],
            vec![AddressEntry::new("10.0.0.5", 4), AddressEntry::new("fd00::5", 6)]
        );
        // Entry without addr dropped, missing version inferred
        assert_eq!(
            instance.address_groups["public"],
            vec![AddressEntry::new("203.0.113.7", 4)]
        );
    }

    #[test]
    fn test_convert_unwrapped_record() {
        let value = sample()["server"].clone();
        let instance = instance_from_provider(&value).unwrap();
        assert_eq!(instance.attested_addresses().count(), 4);
    }

    #[test]
    fn test_created_with_offset() {
        let mut value = sample();
        value["server"]["created"] = json!("2023-11-15T00:13:20+02:00");
        let instance = instance_from_provider(&value).unwrap();
        assert_eq!(instance.created.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_id() {
        let mut value = sample();
        value["server"]["id"] = json!("");
        assert!(matches!(
            instance_from_provider(&value),
            Err(ConvertError::MissingId)
        ));
    }

    #[test]
    fn test_invalid_created() {
        let mut value = sample();
        value["server"]["created"] = json!("yesterday");
        assert!(matches!(
            instance_from_provider(&value),
            Err(ConvertError::InvalidCreated { .. })
        ));
    }

    #[test]
    fn test_malformed_metadata() {
        let mut value = sample();
        value["server"]["metadata"] = json!(["not", "a", "map"]);
        assert!(matches!(
            instance_from_provider(&value),
            Err(ConvertError::Malformed(_))
        ));
    }

    #[test]
    fn test_version_number_forms() {
        assert_eq!(version_number(&json!(4)), Some(4));
        assert_eq!(version_number(&json!(6.0)), Some(6));
        assert_eq!(version_number(&json!("6")), Some(6));
        assert_eq!(version_number(&json!(5)), None);
        assert_eq!(version_number(&json!(6.9)), None);
        assert_eq!(version_number(&json!(4.5)), None);
        assert_eq!(version_number(&json!(null)), None);
    }
}
