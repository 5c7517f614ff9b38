//! Reconcile private DNS zone A records with private endpoint addresses.
//!
//! Desired state comes from the endpoints' `customDnsConfigs`; actual state
//! from the record sets in each private DNS zone. The plan is printed, and
//! applied only when asked.

use crate::azure::{self, args, CommandRunner};
use crate::models::{ARecordSet, EndpointDns};
use crate::output::CsvRow;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

/// Private endpoint DNS configuration, one row per fqdn/IP pair.
pub const ENDPOINT_QUERY: &str = r#"resources
        | where type == "microsoft.network/privateendpoints"
        | mv-expand cfg = properties.customDnsConfigs
        | mv-expand ip = cfg.ipAddresses
        | where isnotempty(cfg.fqdn) and isnotempty(ip)
        | project endpoint_name=name
                ,fqdn=tostring(cfg.fqdn)
                ,ip_address=tostring(ip)
                ,subscription_id=subscriptionId
                ,resource_group=resourceGroup
        | sort by fqdn asc"#;

/// Public service suffixes whose private zone name is not `privatelink.<suffix>`.
const ZONE_ALIASES: [(&str, &str); 2] = [
    ("vault.azure.net", "privatelink.vaultcore.azure.net"),
    ("azurewebsites.net", "privatelink.azurewebsites.net"),
];

/// Record name and zone for an fqdn, or `None` when no zone matches.
///
/// The zone with the longest matching suffix wins.
pub fn zone_for_fqdn<'z>(fqdn: &str, zones: &'z [String]) -> Option<(String, &'z str)> {
    let fqdn = fqdn.trim_end_matches('.').to_lowercase();
    let public = fqdn.replacen(".privatelink.", ".", 1);

    let mut best: Option<(String, &'z str, usize)> = None;
    for zone in zones {
        let zone_lc = zone.trim_end_matches('.').to_lowercase();
        let mut suffixes: Vec<String> = vec![zone_lc
            .strip_prefix("privatelink.")
            .unwrap_or(&zone_lc)
            .to_string()];
        suffixes.extend(
            ZONE_ALIASES
                .iter()
                .filter(|(_, z)| *z == zone_lc)
                .map(|(public, _)| public.to_string()),
        );
        for suffix in suffixes {
            let Some(name) = public.strip_suffix(&format!(".{suffix}")) else {
                continue;
            };
            if best.as_ref().map_or(true, |(_, _, len)| suffix.len() > *len) {
                best = Some((name.to_string(), zone.as_str(), suffix.len()));
            }
        }
    }
    best.map(|(name, zone, _)| (name, zone))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsAction {
    Create(BTreeSet<Ipv4Addr>),
    Update {
        add: BTreeSet<Ipv4Addr>,
        remove: BTreeSet<Ipv4Addr>,
    },
    Delete(BTreeSet<Ipv4Addr>),
    Unchanged,
}

impl DnsAction {
    pub fn kind(&self) -> &'static str {
        match self {
            DnsAction::Create(_) => "create",
            DnsAction::Update { .. } => "update",
            DnsAction::Delete(_) => "delete",
            DnsAction::Unchanged => "unchanged",
        }
    }
}

fn join_ips(ips: &BTreeSet<Ipv4Addr>) -> String {
    ips.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(" ")
}

impl fmt::Display for DnsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsAction::Create(ips) => write!(f, "create {}", join_ips(ips)),
            DnsAction::Update { add, remove } => {
                write!(f, "update +[{}] -[{}]", join_ips(add), join_ips(remove))
            }
            DnsAction::Delete(ips) => write!(f, "delete {}", join_ips(ips)),
            DnsAction::Unchanged => write!(f, "unchanged"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub zone: String,
    pub record: String,
    pub action: DnsAction,
}

impl CsvRow for PlannedChange {
    fn header() -> Vec<&'static str> {
        vec!["zone", "record", "action", "detail"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.zone.clone(),
            self.record.clone(),
            self.action.kind().to_string(),
            self.action.to_string(),
        ]
    }
}

/// Desired addresses per (zone, record), plus fqdns that matched no zone.
pub fn desired_records(
    endpoints: &[EndpointDns],
    zones: &[String],
) -> (BTreeMap<(String, String), BTreeSet<Ipv4Addr>>, Vec<String>) {
    let mut desired: BTreeMap<(String, String), BTreeSet<Ipv4Addr>> = BTreeMap::new();
    let mut unmatched = Vec::new();
    for ep in endpoints {
        let Some(ip) = ep.ip_address.filter(|_| !ep.fqdn.is_empty()) else {
            log::debug!("{} has no custom DNS config", ep.endpoint_name);
            continue;
        };
        match zone_for_fqdn(&ep.fqdn, zones) {
            Some((record, zone)) => {
                desired.entry((zone.to_string(), record)).or_default().insert(ip);
            }
            None => {
                log::warn!("No private zone for {} ({})", ep.fqdn, ep.endpoint_name);
                unmatched.push(ep.fqdn.clone());
            }
        }
    }
    unmatched.sort();
    unmatched.dedup();
    (desired, unmatched)
}

/// Compare desired and actual record sets.
///
/// `actual` maps zone name to its record sets. Records only present in a zone
/// are deleted when `prune` is set; the apex `@` is never touched.
pub fn plan(
    desired: &BTreeMap<(String, String), BTreeSet<Ipv4Addr>>,
    actual: &BTreeMap<String, Vec<ARecordSet>>,
    prune: bool,
) -> Vec<PlannedChange> {
    let mut current: BTreeMap<(String, String), BTreeSet<Ipv4Addr>> = BTreeMap::new();
    for (zone, sets) in actual {
        for set in sets {
            current.insert((zone.clone(), set.name.to_lowercase()), set.addresses());
        }
    }

    let mut changes = Vec::new();
    for ((zone, record), want) in desired {
        let action = match current.get(&(zone.clone(), record.clone())) {
            None => DnsAction::Create(want.clone()),
            Some(have) if have == want => DnsAction::Unchanged,
            Some(have) => DnsAction::Update {
                add: want.difference(have).cloned().collect(),
                remove: have.difference(want).cloned().collect(),
            },
        };
        changes.push(PlannedChange {
            zone: zone.clone(),
            record: record.clone(),
            action,
        });
    }

    if prune {
        for ((zone, record), have) in &current {
            if record == "@" || desired.contains_key(&(zone.clone(), record.clone())) {
                continue;
            }
            changes.push(PlannedChange {
                zone: zone.clone(),
                record: record.clone(),
                action: DnsAction::Delete(have.clone()),
            });
        }
    }
    changes.sort_by(|a, b| (&a.zone, &a.record).cmp(&(&b.zone, &b.record)));
    changes
}

/// Record sets of one zone.
pub fn list_zone_records<R: CommandRunner + ?Sized>(
    runner: &R,
    resource_group: &str,
    zone: &str,
) -> Result<Vec<ARecordSet>, Box<dyn Error>> {
    azure::run_json(
        runner,
        "az",
        &args([
            "network",
            "private-dns",
            "record-set",
            "a",
            "list",
            "-g",
            resource_group,
            "-z",
            zone,
            "--output",
            "json",
        ]),
    )
}

/// Private endpoint DNS configs across all visible subscriptions.
pub fn list_endpoints<R: CommandRunner + ?Sized>(
    runner: &R,
) -> Result<Vec<EndpointDns>, Box<dyn Error>> {
    let data = azure::query_default(runner, ENDPOINT_QUERY)?;
    log::info!("Found {} endpoint DNS entries", data.data.len());
    Ok(data.data)
}

/// Names of the private DNS zones in a resource group.
pub fn list_zones<R: CommandRunner + ?Sized>(
    runner: &R,
    resource_group: &str,
) -> Result<Vec<String>, Box<dyn Error>> {
    azure::run_json(
        runner,
        "az",
        &args([
            "network",
            "private-dns",
            "zone",
            "list",
            "-g",
            resource_group,
            "--query",
            "[].name",
            "--output",
            "json",
        ]),
    )
}

/// Endpoint DNS configs from `cache_file`, or queried and cached for `today`.
pub fn load_endpoints<R: CommandRunner + ?Sized>(
    runner: &R,
    cache_file: Option<&Path>,
    today: &str,
) -> Result<Vec<EndpointDns>, Box<dyn Error>> {
    let default_file = azure::cache_file_name("private_endpoints", today);
    azure::read_or_fetch(cache_file, &default_file, || list_endpoints(runner))
}

/// Read the zones of a resource group and plan against `endpoints`.
/// Returns the plan and fqdns with no zone.
pub fn reconcile<R: CommandRunner + ?Sized>(
    runner: &R,
    endpoints: &[EndpointDns],
    resource_group: &str,
    prune: bool,
) -> Result<(Vec<PlannedChange>, Vec<String>), Box<dyn Error>> {
    let zones = list_zones(runner, resource_group)?;
    if zones.is_empty() {
        return Err(format!("No private DNS zones in resource group {resource_group}").into());
    }
    let (desired, unmatched) = desired_records(endpoints, &zones);

    let mut actual = BTreeMap::new();
    for zone in &zones {
        actual.insert(zone.clone(), list_zone_records(runner, resource_group, zone)?);
    }
    Ok((plan(&desired, &actual, prune), unmatched))
}

/// `az` invocations that carry out one change.
pub fn commands_for(change: &PlannedChange, resource_group: &str) -> Vec<Vec<String>> {
    let base = |verb: &str| {
        args([
            "network",
            "private-dns",
            "record-set",
            "a",
            verb,
            "-g",
            resource_group,
            "-z",
            change.zone.as_str(),
            "-n",
            change.record.as_str(),
        ])
    };
    let add = |ip: &Ipv4Addr| {
        let mut c = base("add-record");
        c.extend(args(["-a".to_string(), ip.to_string()]));
        c
    };
    let remove = |ip: &Ipv4Addr| {
        let mut c = base("remove-record");
        c.extend(args(["-a".to_string(), ip.to_string(), "--keep-empty-record-set".to_string()]));
        c
    };
    match &change.action {
        DnsAction::Create(ips) => ips.iter().map(add).collect(),
        // add first so the name never resolves to nothing
        DnsAction::Update { add: a, remove: r } => {
            a.iter().map(add).chain(r.iter().map(remove)).collect()
        }
        DnsAction::Delete(_) => {
            let mut c = base("delete");
            c.push("--yes".to_string());
            vec![c]
        }
        DnsAction::Unchanged => vec![],
    }
}

/// Run the plan. Returns the number of failed changes; others still run.
pub fn apply<R: CommandRunner + ?Sized>(
    runner: &R,
    changes: &[PlannedChange],
    resource_group: &str,
) -> usize {
    let mut failed = 0;
    for change in changes {
        for cmd in commands_for(change, resource_group) {
            if let Err(e) = runner.run_args("az", &cmd) {
                log::error!("{}/{} {}: {e}", change.zone, change.record, change.action);
                failed += 1;
                break;
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::cli::fake::FakeRunner;

    fn zones() -> Vec<String> {
        vec![
            "privatelink.blob.core.windows.net".to_string(),
            "privatelink.vaultcore.azure.net".to_string(),
            "privatelink.database.windows.net".to_string(),
            "privatelink.core.windows.net".to_string(),
        ]
    }

    fn ep(fqdn: &str, ip: &str) -> EndpointDns {
        EndpointDns {
            endpoint_name: format!("pe-{fqdn}"),
            fqdn: fqdn.to_string(),
            ip_address: Some(ip.parse().unwrap()),
            subscription_id: String::new(),
            resource_group: String::new(),
        }
    }

    fn set(name: &str, ips: &[&str]) -> ARecordSet {
        let json = format!(
            r#"{{"name":"{name}","aRecords":[{}]}}"#,
            ips.iter()
                .map(|i| format!(r#"{{"ipv4Address":"{i}"}}"#))
                .collect::<Vec<_>>()
                .join(",")
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_zone_for_fqdn() {
        let z = zones();
        assert_eq!(
            zone_for_fqdn("acct.blob.core.windows.net", &z),
            Some(("acct".to_string(), "privatelink.blob.core.windows.net"))
        );
        assert_eq!(
            zone_for_fqdn("acct.privatelink.blob.core.windows.net.", &z),
            Some(("acct".to_string(), "privatelink.blob.core.windows.net"))
        );
        assert_eq!(
            zone_for_fqdn("kv-prod.vault.azure.net", &z),
            Some(("kv-prod".to_string(), "privatelink.vaultcore.azure.net"))
        );
        assert_eq!(
            zone_for_fqdn("acct.file.core.windows.net", &z),
            Some(("acct.file".to_string(), "privatelink.core.windows.net"))
        );
        assert_eq!(zone_for_fqdn("app.example.com", &z), None);
    }

    #[test]
    fn test_plan() {
        let endpoints = vec![
            ep("new.blob.core.windows.net", "10.1.0.4"),
            ep("same.blob.core.windows.net", "10.1.0.5"),
            ep("moved.blob.core.windows.net", "10.1.0.6"),
            ep("kv.vault.azure.net", "10.1.0.7"),
            ep("site.example.com", "10.1.0.8"),
        ];
        let (desired, unmatched) = desired_records(&endpoints, &zones());
        assert_eq!(unmatched, vec!["site.example.com"]);

        let mut actual = BTreeMap::new();
        actual.insert(
            "privatelink.blob.core.windows.net".to_string(),
            vec![
                set("same", &["10.1.0.5"]),
                set("moved", &["10.9.9.9"]),
                set("stale", &["10.1.0.99"]),
                set("@", &["10.1.0.1"]),
            ],
        );

        let kept = plan(&desired, &actual, false);
        assert!(kept.iter().all(|c| !matches!(c.action, DnsAction::Delete(_))));

        let changes = plan(&desired, &actual, true);
        let by_record: BTreeMap<&str, &DnsAction> = changes
            .iter()
            .map(|c| (c.record.as_str(), &c.action))
            .collect();
        assert_eq!(by_record["same"], &DnsAction::Unchanged);
        assert_eq!(by_record["new"].kind(), "create");
        assert_eq!(by_record["kv"].kind(), "create");
        assert_eq!(
            by_record["moved"],
            &DnsAction::Update {
                add: ["10.1.0.6".parse().unwrap()].into_iter().collect(),
                remove: ["10.9.9.9".parse().unwrap()].into_iter().collect(),
            }
        );
        assert_eq!(by_record["stale"].kind(), "delete");
        assert!(!by_record.contains_key("@"));
    }

    #[test]
    fn test_apply_commands() {
        let change = PlannedChange {
            zone: "privatelink.blob.core.windows.net".to_string(),
            record: "moved".to_string(),
            action: DnsAction::Update {
                add: ["10.1.0.6".parse().unwrap()].into_iter().collect(),
                remove: ["10.9.9.9".parse().unwrap()].into_iter().collect(),
            },
        };
        let runner = FakeRunner::new();
        assert_eq!(apply(&runner, &[change], "rg-dns"), 0);
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains(
            "add-record -g rg-dns -z privatelink.blob.core.windows.net -n moved -a 10.1.0.6"
        ));
        assert!(calls[1].contains("remove-record"));
        assert!(calls[1].contains("-a 10.9.9.9"));
    }

    #[test]
    fn test_apply_counts_failures() {
        let changes = vec![
            PlannedChange {
                zone: "z".to_string(),
                record: "a".to_string(),
                action: DnsAction::Create(["10.0.0.1".parse().unwrap()].into_iter().collect()),
            },
            PlannedChange {
                zone: "z".to_string(),
                record: "b".to_string(),
                action: DnsAction::Delete(BTreeSet::new()),
            },
        ];
        let runner = FakeRunner::new().queue(Err("conflict")).queue(Ok(""));
        assert_eq!(apply(&runner, &changes, "rg"), 1);
        assert_eq!(runner.calls.borrow().len(), 2);
    }

    #[test]
    fn test_list_zone_records_fixture() {
        let json = std::fs::read_to_string("src/tests/test_data/dns_record_sets_01.json").unwrap();
        let runner = FakeRunner::new().queue(Ok(json.as_str()));
        let sets = list_zone_records(&runner, "rg", "privatelink.blob.core.windows.net").unwrap();
        assert_eq!(sets.len(), 3);
    }

    #[test]
    fn test_reconcile() {
        let records =
            std::fs::read_to_string("src/tests/test_data/dns_record_sets_01.json").unwrap();
        let runner = FakeRunner::new().on(move |_, a| match a[0].as_str() {
            "graph" => Some(Ok(r#"{"data":[
                {"endpoint_name":"pe-stprodlogs-blob",
                 "fqdn":"stprodlogs.blob.core.windows.net","ip_address":"10.20.1.4"},
                {"endpoint_name":"pe-zone-group","fqdn":"","ip_address":""},
                {"endpoint_name":"pe-stbackup-blob",
                 "fqdn":"stbackup.blob.core.windows.net","ip_address":"10.20.1.10"},
                {"endpoint_name":"pe-web","fqdn":"web.contoso.com","ip_address":"10.20.1.11"}],
                "skip_token":null,"total_records":4,"count":4}"#
                .to_string())),
            _ if a[2] == "zone" => Some(Ok(r#"["privatelink.blob.core.windows.net"]"#.to_string())),
            _ if a[4] == "list" => Some(Ok(records.clone())),
            _ => None,
        });

        let endpoints = list_endpoints(&runner).unwrap();
        assert_eq!(endpoints.len(), 4);
        assert!(runner.calls.borrow()[0].contains("isnotempty(cfg.fqdn)"));
        let (changes, unmatched) = reconcile(&runner, &endpoints, "rg-dns", true).unwrap();
        assert_eq!(unmatched, vec!["web.contoso.com"]);
        let kinds: Vec<(&str, &str)> = changes
            .iter()
            .map(|c| (c.record.as_str(), c.action.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![("stbackup", "update"), ("stold", "delete"), ("stprodlogs", "unchanged")]
        );
    }
}
