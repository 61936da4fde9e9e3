//! Instance records as attested by the compute provider.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status an instance must report to authenticate.
pub const ACTIVE_STATUS: &str = "ACTIVE";

/// Stable provider identifier of an instance.
///
/// Also the key of the instance's replay counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One provider-reported address inside a network group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Textual IPv4 or IPv6 address.
    pub addr: String,
    /// 4 or 6.
    pub ip_version: u8,
}

impl AddressEntry {
    pub fn new(addr: impl Into<String>, ip_version: u8) -> Self {
        Self {
            addr: addr.into(),
            ip_version,
        }
    }
}

/// A fully resolved instance record.
///
/// Read-only input to attestation; the engine never fetches or mutates it.
/// Metadata values are instance-supplied and untrusted, only their presence
/// is provider-attested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub status: String,
    /// Primary IPv4 address, empty when the provider reports none.
    #[serde(default)]
    pub access_ipv4: String,
    /// Primary IPv6 address, empty when the provider reports none.
    #[serde(default)]
    pub access_ipv6: String,
    /// Network name to the addresses attached on that network.
    #[serde(default)]
    pub address_groups: BTreeMap<String, Vec<AddressEntry>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: String,
    pub created: DateTime<Utc>,
}

impl Instance {
    /// Every address the provider attests for this instance.
    ///
    /// Primary addresses come first, then group addresses in network-name
    /// order. Empty primaries are skipped.
    pub fn attested_addresses(&self) -> impl Iterator<Item = &str> {
        [self.access_ipv4.as_str(), self.access_ipv6.as_str()]
            .into_iter()
            .filter(|addr| !addr.is_empty())
            .chain(
                self.address_groups
                    .values()
                    .flatten()
                    .map(|entry| entry.addr.as_str()),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance {
            id: InstanceId::new("ef079b0c-e610-4dfb-b1aa-b49f07ac48e5"),
            status: ACTIVE_STATUS.to_string(),
            access_ipv4: String::new(),
            access_ipv6: "2001:db8::1".to_string(),
            address_groups: BTreeMap::from([(
                "private".to_string(),
                vec![
                    AddressEntry::new("10.0.0.5", 4),
                    AddressEntry::new("fd00::5", 6),
                ],
            )]),
            metadata: HashMap::new(),
            tenant_id: String::new(),
            user_id: String::new(),
            created: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_attested_addresses_skip_empty_primary() {
        let inst = instance();
        let addrs: Vec<&str> = inst.attested_addresses().collect();
        assert_eq!(addrs, vec!["2001:db8::1", "10.0.0.5", "fd00::5"]);
    }

    #[test]
    fn test_instance_id_is_transparent() {
        let id = InstanceId::new("test0");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""test0""#);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{"id":"a","status":"ACTIVE","created":"2023-11-14T22:13:20Z"}"#;
        let parsed: Instance = serde_json::from_str(json).unwrap();
        assert!(parsed.access_ipv4.is_empty());
        assert!(parsed.address_groups.is_empty());
        assert_eq!(parsed.attested_addresses().count(), 0);
    }
}
