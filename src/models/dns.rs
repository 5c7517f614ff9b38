//! Private endpoint DNS configuration and private DNS zone A records.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// One fqdn/IP pair from a private endpoint's `customDnsConfigs`.
///
/// Endpoints registered through a DNS zone group have no custom configs, the
/// graph then returns empty strings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EndpointDns {
    pub endpoint_name: String,
    #[serde(default)]
    pub fqdn: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub ip_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub resource_group: String,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<Ipv4Addr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(ip) => ip.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ARecord {
    pub ipv4_address: Ipv4Addr,
}

/// A record set as listed by `az network private-dns record-set a list`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ARecordSet {
    pub name: String,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub a_records: Vec<ARecord>,
}

impl ARecordSet {
    pub fn addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.a_records.iter().map(|r| r.ipv4_address).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_set_deserialize() {
        let json = r#"[{"name":"myacct","fqdn":"myacct.privatelink.blob.core.windows.net.",
            "ttl":3600,"aRecords":[{"ipv4Address":"10.1.0.5"},{"ipv4Address":"10.1.0.4"}],
            "type":"Microsoft.Network/privateDnsZones/A"},
            {"name":"empty"}]"#;
        let sets: Vec<ARecordSet> = serde_json::from_str(json).unwrap();
        assert_eq!(sets.len(), 2);
        let addrs: Vec<Ipv4Addr> = sets[0].addresses().into_iter().collect();
        assert_eq!(addrs, vec![Ipv4Addr::new(10, 1, 0, 4), Ipv4Addr::new(10, 1, 0, 5)]);
        assert!(sets[1].addresses().is_empty());
    }

    #[test]
    fn test_endpoint_without_custom_config() {
        let json = r#"[{"endpoint_name":"pe-a","fqdn":"a.blob.core.windows.net","ip_address":"10.0.0.4"},
            {"endpoint_name":"pe-zone-group","fqdn":"","ip_address":""},
            {"endpoint_name":"pe-null","ip_address":null}]"#;
        let rows: Vec<EndpointDns> = serde_json::from_str(json).unwrap();
        assert_eq!(rows[0].ip_address, Some(Ipv4Addr::new(10, 0, 0, 4)));
        assert_eq!(rows[1].ip_address, None);
        assert_eq!(rows[2].fqdn, "");
        assert_eq!(rows[2].ip_address, None);

        let bad = r#"[{"endpoint_name":"pe","fqdn":"a","ip_address":"10.0.0"}]"#;
        assert!(serde_json::from_str::<Vec<EndpointDns>>(bad).is_err());
    }
}
