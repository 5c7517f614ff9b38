//! IPv4 CIDR blocks.
//!
//! [`Cidr`] is used by connectivity checks (is the resolved address where we
//! expect it) and by route tables (alignment, overlap, longest prefix match).

use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use std::error::Error;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum prefix length for IPv4.
pub const MAX_LENGTH: u8 = 32;

/// Ranges treated as private: RFC 1918 and the 100.64/10 shared space.
const PRIVATE_RANGES: [(Ipv4Addr, u8); 4] = [
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
];

/// Convert a prefix length to a netmask.
///
/// ```
/// use azure_ops_toolkit::models::get_cidr_mask;
/// assert_eq!(get_cidr_mask(24).unwrap(), 0xFFFFFF00);
/// ```
pub fn get_cidr_mask(len: u8) -> Result<u32, Box<dyn Error>> {
    if len > MAX_LENGTH {
        Err("Network length is too long".into())
    } else {
        let right_len = MAX_LENGTH - len;
        let all_bits = u32::MAX as u64;
        Ok(((all_bits >> right_len) << right_len) as u32)
    }
}

/// Is `ip` inside one of the private ranges.
pub fn is_private(ip: Ipv4Addr) -> bool {
    PRIVATE_RANGES
        .iter()
        .any(|(addr, len)| Cidr { addr: *addr, len: *len }.contains(ip))
}

/// An IPv4 address with a prefix length.
///
/// The address may carry host bits (`10.0.0.5/16`); see [`Cidr::is_aligned`].
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone, Hash)]
pub struct Cidr {
    pub addr: Ipv4Addr,
    pub len: u8,
}

impl Cidr {
    /// Parse `a.b.c.d/len`.
    pub fn new(addr_cidr: &str) -> Result<Cidr, Box<dyn Error>> {
        let addr_cidr = addr_cidr.trim();
        let (addr, len) = addr_cidr
            .split_once('/')
            .ok_or_else(|| format!("Invalid address/mask '{addr_cidr}'"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("Invalid address '{addr}'"))?;
        let len: u8 = len
            .parse()
            .map_err(|_| format!("Invalid prefix length '{len}'"))?;
        if len > MAX_LENGTH {
            return Err(format!("Network length is too long: /{len}").into());
        }
        Ok(Cidr { addr, len })
    }

    fn mask(&self) -> u32 {
        // len is validated on construction, and struct literals stay in range
        get_cidr_mask(self.len.min(MAX_LENGTH)).unwrap_or(u32::MAX)
    }

    /// Lowest address in the block.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & self.mask())
    }

    /// Highest address in the block.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !self.mask())
    }

    /// True when no host bits are set.
    pub fn is_aligned(&self) -> bool {
        self.addr == self.network()
    }

    /// Same block with host bits cleared.
    pub fn aligned(&self) -> Cidr {
        Cidr {
            addr: self.network(),
            len: self.len,
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == u32::from(self.network())
    }

    /// `other` lies entirely inside `self`.
    pub fn contains_cidr(&self, other: &Cidr) -> bool {
        self.len <= other.len && self.contains(other.network())
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.contains(other.network()) || other.contains(self.network())
    }

    /// Number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (MAX_LENGTH - self.len.min(MAX_LENGTH))
    }

    /// Usable hosts in an Azure subnet of this size.
    ///
    /// Azure reserves 5 addresses per subnet (network, gateway, 2 DNS, broadcast).
    pub fn azure_usable_hosts(&self) -> Result<u64, Box<dyn Error>> {
        if self.len > MAX_LENGTH - 3 {
            Err(format!("/{} is too small for an Azure subnet", self.len).into())
        } else {
            Ok(self.size() - 5)
        }
    }
}

impl FromStr for Cidr {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cidr::new(s)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl Serialize for Cidr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D>(deserializer: D) -> Result<Cidr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Cidr::new(&s).map_err(|e| de::Error::custom(format!("invalid CIDR '{s}': {e}")))
    }
}
