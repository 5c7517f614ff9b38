//! Route table entries as returned by `az network route-table route list`.

use super::Cidr;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::net::Ipv4Addr;

/// Destination of a route: a CIDR block or a service tag such as `AzureCloud`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoutePrefix {
    Cidr(Cidr),
    ServiceTag(String),
}

impl RoutePrefix {
    pub fn parse(s: &str) -> Result<RoutePrefix, Box<dyn Error>> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty address prefix".into());
        }
        if s.contains('/') || s.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            Ok(RoutePrefix::Cidr(Cidr::new(s)?))
        } else if s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            Ok(RoutePrefix::ServiceTag(s.to_string()))
        } else {
            Err(format!("Invalid address prefix '{s}'").into())
        }
    }

    pub fn cidr(&self) -> Option<&Cidr> {
        match self {
            RoutePrefix::Cidr(c) => Some(c),
            RoutePrefix::ServiceTag(_) => None,
        }
    }
}

impl fmt::Display for RoutePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePrefix::Cidr(c) => write!(f, "{c}"),
            RoutePrefix::ServiceTag(t) => write!(f, "{t}"),
        }
    }
}

impl Serialize for RoutePrefix {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RoutePrefix {
    fn deserialize<D>(deserializer: D) -> Result<RoutePrefix, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RoutePrefix::parse(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NextHopType {
    VirtualNetworkGateway,
    VnetLocal,
    Internet,
    VirtualAppliance,
    None,
}

impl NextHopType {
    pub fn parse(s: &str) -> Result<NextHopType, Box<dyn Error>> {
        match s.trim().to_ascii_lowercase().as_str() {
            "virtualnetworkgateway" => Ok(NextHopType::VirtualNetworkGateway),
            "vnetlocal" => Ok(NextHopType::VnetLocal),
            "internet" => Ok(NextHopType::Internet),
            "virtualappliance" => Ok(NextHopType::VirtualAppliance),
            "none" => Ok(NextHopType::None),
            other => Err(format!("Unknown next hop type '{other}'").into()),
        }
    }
}

/// Hand written desired route files are not consistent about case.
impl<'de> Deserialize<'de> for NextHopType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NextHopType::parse(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

impl fmt::Display for NextHopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NextHopType::VirtualNetworkGateway => "VirtualNetworkGateway",
            NextHopType::VnetLocal => "VnetLocal",
            NextHopType::Internet => "Internet",
            NextHopType::VirtualAppliance => "VirtualAppliance",
            NextHopType::None => "None",
        };
        write!(f, "{s}")
    }
}

/// A user defined route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,
    pub address_prefix: RoutePrefix,
    pub next_hop_type: NextHopType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop_ip_address: Option<Ipv4Addr>,
}

impl Route {
    /// Check the rules Azure enforces on create.
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        if let RoutePrefix::Cidr(c) = &self.address_prefix {
            if !c.is_aligned() {
                return Err(format!(
                    "Route '{}': prefix {c} has host bits set, expected {}",
                    self.name,
                    c.aligned()
                )
                .into());
            }
        }
        match (self.next_hop_type, self.next_hop_ip_address) {
            (NextHopType::VirtualAppliance, None) => Err(format!(
                "Route '{}': VirtualAppliance requires a next hop IP",
                self.name
            )
            .into()),
            (NextHopType::VirtualAppliance, Some(_)) | (_, None) => Ok(()),
            (hop, Some(ip)) => Err(format!(
                "Route '{}': next hop IP {ip} not allowed for {hop}",
                self.name
            )
            .into()),
        }
    }

    /// Same destination and next hop.
    pub fn same_hop(&self, other: &Route) -> bool {
        self.next_hop_type == other.next_hop_type
            && self.next_hop_ip_address == other.next_hop_ip_address
    }
}

/// Route name derived from its prefix, `10.1.0.0/16` gives `rt-10-1-0-0-16`.
pub fn route_name_for(prefix: &RoutePrefix) -> String {
    match prefix {
        RoutePrefix::Cidr(c) => format!("rt-{}-{}", c.addr.to_string().replace('.', "-"), c.len),
        RoutePrefix::ServiceTag(t) => format!("rt-{}", t.replace('.', "-").to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_prefix_parse() {
        assert_eq!(
            RoutePrefix::parse("10.0.0.0/8").unwrap(),
            RoutePrefix::Cidr(Cidr::new("10.0.0.0/8").unwrap())
        );
        assert_eq!(
            RoutePrefix::parse("AzureCloud.australiaeast").unwrap(),
            RoutePrefix::ServiceTag("AzureCloud.australiaeast".to_string())
        );
        assert!(RoutePrefix::parse("10.0.0.0").is_err());
        assert!(RoutePrefix::parse("bad tag!").is_err());
    }

    #[test]
    fn test_route_deserialize() {
        let json = r#"{"name":"to-fw","addressPrefix":"0.0.0.0/0",
            "nextHopType":"VirtualAppliance","nextHopIpAddress":"10.0.0.4","etag":"x"}"#;
        let r: Route = serde_json::from_str(json).unwrap();
        assert_eq!(r.next_hop_type, NextHopType::VirtualAppliance);
        assert_eq!(r.next_hop_ip_address, Some(Ipv4Addr::new(10, 0, 0, 4)));
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_next_hop_type_any_case() {
        let hop: NextHopType = serde_json::from_str(r#""virtualnetworkgateway""#).unwrap();
        assert_eq!(hop, NextHopType::VirtualNetworkGateway);
        assert_eq!(serde_json::to_string(&hop).unwrap(), r#""VirtualNetworkGateway""#);
        let err = serde_json::from_str::<NextHopType>(r#""Firewall""#).unwrap_err();
        assert!(err.to_string().contains("Unknown next hop type"));
    }

    #[test]
    fn test_validate() {
        let mut r = Route {
            name: "r1".to_string(),
            address_prefix: RoutePrefix::parse("10.1.0.5/16").unwrap(),
            next_hop_type: NextHopType::Internet,
            next_hop_ip_address: None,
        };
        assert!(r.validate().is_err());

        r.address_prefix = RoutePrefix::parse("10.1.0.0/16").unwrap();
        assert!(r.validate().is_ok());

        r.next_hop_ip_address = Some(Ipv4Addr::new(10, 0, 0, 4));
        assert!(r.validate().is_err());

        r.next_hop_type = NextHopType::VirtualAppliance;
        assert!(r.validate().is_ok());

        r.next_hop_ip_address = None;
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_route_name_for() {
        assert_eq!(
            route_name_for(&RoutePrefix::parse("10.1.0.0/16").unwrap()),
            "rt-10-1-0-0-16"
        );
        assert_eq!(
            route_name_for(&RoutePrefix::parse("AzureCloud.EastUS").unwrap()),
            "rt-azurecloud-eastus"
        );
    }
}
