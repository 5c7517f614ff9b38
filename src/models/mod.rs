//! Domain models shared by the tools.
//!
//! - [`Cidr`] - IPv4 block arithmetic
//! - [`Route`] - route table entries
//! - [`ARecordSet`] and [`EndpointDns`] - private DNS records and their sources
//! - [`UsageRecord`] - consumption usage lines

mod cidr;
mod dns;
mod route;
mod usage;

pub use cidr::{get_cidr_mask, is_private, Cidr, MAX_LENGTH};
pub use dns::{ARecord, ARecordSet, EndpointDns};
pub use route::{route_name_for, NextHopType, Route, RoutePrefix};
pub use usage::{MeterDetails, UsageRecord};
