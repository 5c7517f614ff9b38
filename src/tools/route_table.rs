//! Route table inspection and reconciliation.
//!
//! Azure matches destinations by longest prefix across the user defined routes
//! of a table. A table holds at most 400 routes and a prefix can only appear
//! once, so routes are matched between desired and existing state by prefix.

use super::workflow::{Outcome, WorkflowReport};
use crate::azure::{self, args, CommandRunner};
use crate::config::MAX_ROUTES_PER_TABLE;
use crate::models::{route_name_for, NextHopType, Route, RoutePrefix};
use crate::output::CsvRow;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::net::Ipv4Addr;
use std::path::Path;

impl CsvRow for Route {
    fn header() -> Vec<&'static str> {
        vec!["name", "address_prefix", "next_hop_type", "next_hop_ip"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.address_prefix.to_string(),
            self.next_hop_type.to_string(),
            self.next_hop_ip_address
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
        ]
    }
}

/// Entry of a desired-routes file. The name defaults to one derived from the
/// prefix.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DesiredRoute {
    #[serde(default)]
    pub name: Option<String>,
    pub address_prefix: RoutePrefix,
    pub next_hop_type: NextHopType,
    #[serde(default)]
    pub next_hop_ip_address: Option<Ipv4Addr>,
}

impl From<DesiredRoute> for Route {
    fn from(d: DesiredRoute) -> Route {
        Route {
            name: d.name.unwrap_or_else(|| route_name_for(&d.address_prefix)),
            address_prefix: d.address_prefix,
            next_hop_type: d.next_hop_type,
            next_hop_ip_address: d.next_hop_ip_address,
        }
    }
}

pub fn list_routes<R: CommandRunner + ?Sized>(
    runner: &R,
    resource_group: &str,
    table: &str,
) -> Result<Vec<Route>, Box<dyn Error>> {
    let mut routes: Vec<Route> = azure::run_json(
        runner,
        "az",
        &args([
            "network",
            "route-table",
            "route",
            "list",
            "-g",
            resource_group,
            "--route-table-name",
            table,
            "--output",
            "json",
        ]),
    )?;
    routes.sort_by(|a, b| a.name.cmp(&b.name));
    log::info!("{resource_group}/{table}: {} route(s)", routes.len());
    Ok(routes)
}

/// Read desired routes from a JSON array file and validate them.
pub fn load_desired(path: &Path) -> Result<Vec<Route>, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    let desired: Vec<DesiredRoute> = azure::parse_json(&text)?;
    let routes: Vec<Route> = desired.into_iter().map(Route::from).collect();
    for r in &routes {
        r.validate()?;
    }
    Ok(routes)
}

/// The route Azure would pick for `ip`: the longest matching CIDR prefix.
///
/// Service tag routes are not considered, their address sets are not known
/// locally.
pub fn lookup(routes: &[Route], ip: Ipv4Addr) -> Option<&Route> {
    routes
        .iter()
        .filter_map(|r| r.address_prefix.cidr().map(|c| (r, c)))
        .filter(|(_, c)| c.contains(ip))
        .max_by(|(ra, ca), (rb, cb)| ca.len.cmp(&cb.len).then(rb.name.cmp(&ra.name)))
        .map(|(r, _)| r)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    Create,
    Update { from: Route },
    Delete,
    Unchanged,
}

impl RouteAction {
    pub fn kind(&self) -> &'static str {
        match self {
            RouteAction::Create => "create",
            RouteAction::Update { .. } => "update",
            RouteAction::Delete => "delete",
            RouteAction::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteChange {
    pub route: Route,
    pub action: RouteAction,
    /// Overlap with other prefixes in the table.
    pub note: Option<String>,
}

impl CsvRow for RouteChange {
    fn header() -> Vec<&'static str> {
        vec!["name", "address_prefix", "next_hop_type", "next_hop_ip", "action", "note"]
    }

    fn fields(&self) -> Vec<String> {
        let mut f = self.route.fields();
        f.push(self.action.kind().to_string());
        f.push(self.note.clone().unwrap_or_default());
        f
    }
}

/// Plan the changes that turn `existing` into `desired`.
///
/// Existing routes are kept under their current name when the prefix matches.
/// A new route whose name is already taken gets a numbered suffix, since
/// `az ... route create` would otherwise replace the other route. Routes only
/// present in the table are deleted when `prune` is set.
pub fn plan(
    existing: &[Route],
    desired: &[Route],
    prune: bool,
) -> Result<Vec<RouteChange>, Box<dyn Error>> {
    let mut seen = BTreeSet::new();
    for r in desired {
        r.validate()?;
        if !seen.insert(r.address_prefix.to_string().to_lowercase()) {
            return Err(format!("Duplicate desired prefix {}", r.address_prefix).into());
        }
    }

    let by_prefix: BTreeMap<String, &Route> = existing
        .iter()
        .map(|r| (r.address_prefix.to_string().to_lowercase(), r))
        .collect();

    // route names are case insensitive in Azure
    let mut taken: BTreeSet<String> = existing.iter().map(|r| r.name.to_lowercase()).collect();

    let mut changes = Vec::new();
    for want in desired {
        let key = want.address_prefix.to_string().to_lowercase();
        let change = match by_prefix.get(&key) {
            None => {
                let name = free_name(&want.name, &mut taken);
                let note = (name != want.name).then(|| format!("{} is taken", want.name));
                RouteChange {
                    route: Route {
                        name,
                        ..want.clone()
                    },
                    action: RouteAction::Create,
                    note,
                }
            }
            Some(have) => {
                let route = Route {
                    name: have.name.clone(),
                    ..want.clone()
                };
                let action = if have.same_hop(want) {
                    RouteAction::Unchanged
                } else {
                    RouteAction::Update {
                        from: (*have).clone(),
                    }
                };
                RouteChange {
                    route,
                    action,
                    note: None,
                }
            }
        };
        changes.push(change);
    }

    if prune {
        for r in existing {
            if !seen.contains(&r.address_prefix.to_string().to_lowercase()) {
                changes.push(RouteChange {
                    route: r.clone(),
                    action: RouteAction::Delete,
                    note: None,
                });
            }
        }
    }

    // overlaps against what the table will hold afterwards
    let remaining: Vec<&Route> = changes
        .iter()
        .filter(|c| c.action != RouteAction::Delete)
        .map(|c| &c.route)
        .chain(existing.iter().filter(|r| {
            !prune && !seen.contains(&r.address_prefix.to_string().to_lowercase())
        }))
        .collect();
    if remaining.len() > MAX_ROUTES_PER_TABLE {
        return Err(format!(
            "Route table would hold {} routes, the limit is {MAX_ROUTES_PER_TABLE}",
            remaining.len()
        )
        .into());
    }
    let notes: Vec<Option<String>> = changes
        .iter()
        .map(|change| {
            let cidr = change.route.address_prefix.cidr()?;
            if change.action == RouteAction::Delete {
                return None;
            }
            let overlapping: Vec<String> = remaining
                .iter()
                .filter(|other| other.address_prefix != change.route.address_prefix)
                .filter_map(|other| {
                    other
                        .address_prefix
                        .cidr()
                        .filter(|c| c.overlaps(cidr))
                        .map(|c| format!("{} {c}", other.name))
                })
                .collect();
            (!overlapping.is_empty()).then(|| format!("overlaps {}", overlapping.join(", ")))
        })
        .collect();
    for (change, note) in changes.iter_mut().zip(notes) {
        change.note = match (change.note.take(), note) {
            (Some(a), Some(b)) => Some(format!("{a}; {b}")),
            (a, b) => a.or(b),
        };
    }

    changes.sort_by(|a, b| a.route.name.cmp(&b.route.name));
    Ok(changes)
}

/// `name`, or `name-2`, `name-3`, .. when it is already in `taken`.
fn free_name(name: &str, taken: &mut BTreeSet<String>) -> String {
    let mut candidate = name.to_string();
    let mut n = 2;
    while !taken.insert(candidate.to_lowercase()) {
        candidate = format!("{name}-{n}");
        n += 1;
    }
    candidate
}

/// `az` invocation for one change, `None` when nothing needs doing.
pub fn command_for(
    change: &RouteChange,
    resource_group: &str,
    table: &str,
) -> Option<Vec<String>> {
    let verb = match change.action {
        RouteAction::Unchanged => return None,
        RouteAction::Create => "create",
        RouteAction::Update { .. } => "update",
        RouteAction::Delete => "delete",
    };
    let route = &change.route;
    let mut cmd = args([
        "network",
        "route-table",
        "route",
        verb,
        "-g",
        resource_group,
        "--route-table-name",
        table,
        "-n",
        route.name.as_str(),
    ]);
    if change.action == RouteAction::Delete {
        return Some(cmd);
    }
    cmd.extend(args([
        "--address-prefix".to_string(),
        route.address_prefix.to_string(),
        "--next-hop-type".to_string(),
        route.next_hop_type.to_string(),
    ]));
    match (&change.action, route.next_hop_ip_address) {
        (_, Some(ip)) => cmd.extend(args(["--next-hop-ip-address".to_string(), ip.to_string()])),
        // clear the old appliance address
        (RouteAction::Update { from }, None) if from.next_hop_ip_address.is_some() => {
            cmd.extend(args(["--next-hop-ip-address", ""]))
        }
        _ => {}
    }
    Some(cmd)
}

/// Carry out the plan, one route at a time.
pub fn apply<R: CommandRunner + ?Sized>(
    runner: &R,
    changes: &[RouteChange],
    resource_group: &str,
    table: &str,
    dry_run: bool,
) -> WorkflowReport {
    let mut report = WorkflowReport::new("route-table");
    for change in changes {
        let label = format!("{} {}", change.route.name, change.route.address_prefix);
        let Some(cmd) = command_for(change, resource_group, table) else {
            report.push(label, Outcome::Skipped("unchanged".to_string()));
            continue;
        };
        if dry_run {
            report.push(label, Outcome::DryRun(format!("az {}", cmd.join(" "))));
            continue;
        }
        let outcome = match runner.run_args("az", &cmd) {
            Ok(_) => Outcome::Succeeded(change.action.kind().to_string()),
            Err(e) => Outcome::failed(e),
        };
        report.push(label, outcome);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::cli::fake::FakeRunner;

    fn route(name: &str, prefix: &str, hop: NextHopType, ip: Option<&str>) -> Route {
        Route {
            name: name.to_string(),
            address_prefix: RoutePrefix::parse(prefix).unwrap(),
            next_hop_type: hop,
            next_hop_ip_address: ip.map(|i| i.parse().unwrap()),
        }
    }

    fn existing() -> Vec<Route> {
        vec![
            route("default", "0.0.0.0/0", NextHopType::VirtualAppliance, Some("10.0.0.4")),
            route("onprem", "10.0.0.0/8", NextHopType::VirtualNetworkGateway, None),
            route("spoke1", "10.1.0.0/16", NextHopType::VirtualAppliance, Some("10.0.0.4")),
            route("kms", "AzureCloud.australiaeast", NextHopType::Internet, None),
        ]
    }

    #[test]
    fn test_lookup_longest_prefix() {
        let routes = existing();
        let hit = |ip: &str| lookup(&routes, ip.parse().unwrap()).map(|r| r.name.as_str());
        assert_eq!(hit("10.1.2.3"), Some("spoke1"));
        assert_eq!(hit("10.2.0.1"), Some("onprem"));
        assert_eq!(hit("8.8.8.8"), Some("default"));
        assert_eq!(lookup(&routes[1..3], "8.8.8.8".parse().unwrap()), None);
    }

    #[test]
    fn test_plan() {
        let desired = vec![
            route("rt-0-0-0-0-0", "0.0.0.0/0", NextHopType::VirtualAppliance, Some("10.0.0.4")),
            route("rt-10-1-0-0-16", "10.1.0.0/16", NextHopType::VnetLocal, None),
            route("rt-10-2-0-0-16", "10.2.0.0/16", NextHopType::VirtualAppliance, Some("10.0.0.5")),
        ];
        let changes = plan(&existing(), &desired, true).unwrap();
        let summary: Vec<(&str, &str)> = changes
            .iter()
            .map(|c| (c.route.name.as_str(), c.action.kind()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("default", "unchanged"),
                ("kms", "delete"),
                ("onprem", "delete"),
                ("rt-10-2-0-0-16", "create"),
                ("spoke1", "update"),
            ]
        );
        let created = &changes[3];
        assert_eq!(created.note.as_deref(), Some("overlaps default 0.0.0.0/0"));

        let update = command_for(&changes[4], "rg-net", "rt-hub").unwrap();
        assert_eq!(update[3], "update");
        assert_eq!(&update[update.len() - 2..], ["--next-hop-ip-address", ""]);
    }

    #[test]
    fn test_plan_rejects_invalid_and_too_many() {
        let bad = vec![route("x", "10.1.0.1/16", NextHopType::Internet, None)];
        assert!(plan(&[], &bad, false).is_err());

        let dup = vec![
            route("a", "10.1.0.0/16", NextHopType::Internet, None),
            route("b", "10.1.0.0/16", NextHopType::VnetLocal, None),
        ];
        assert!(plan(&[], &dup, false).unwrap_err().to_string().contains("Duplicate"));

        let many: Vec<Route> = (0..=MAX_ROUTES_PER_TABLE)
            .map(|i| {
                let prefix = format!("10.{}.{}.0/24", i / 256, i % 256);
                route(&format!("r{i}"), &prefix, NextHopType::VnetLocal, None)
            })
            .collect();
        assert!(plan(&[], &many, false).unwrap_err().to_string().contains("limit"));
    }

    #[test]
    fn test_apply_and_dry_run() {
        let hop = NextHopType::VirtualAppliance;
        let desired = vec![route("rt-10-3-0-0-16", "10.3.0.0/16", hop, Some("10.0.0.4"))];
        let changes = plan(&existing(), &desired, false).unwrap();
        assert_eq!(changes.len(), 1);

        let runner = FakeRunner::new();
        let report = apply(&runner, &changes, "rg-net", "rt-hub", true);
        assert_eq!(report.results[0].outcome.status(), "dry-run");
        assert!(runner.calls.borrow().is_empty());

        let report = apply(&runner, &changes, "rg-net", "rt-hub", false);
        assert!(!report.has_failures());
        assert_eq!(
            runner.calls.borrow()[0],
            "az network route-table route create -g rg-net --route-table-name rt-hub \
             -n rt-10-3-0-0-16 --address-prefix 10.3.0.0/16 \
             --next-hop-type VirtualAppliance --next-hop-ip-address 10.0.0.4"
        );
    }

    #[test]
    fn test_plan_renames_create_on_name_clash() {
        // an older route reuses the name derived from another prefix
        let existing = vec![route("rt-10-2-0-0-16", "10.9.0.0/16", NextHopType::VnetLocal, None)];
        let desired = vec![
            route("rt-10-2-0-0-16", "10.2.0.0/16", NextHopType::VnetLocal, None),
            route("RT-10-2-0-0-16", "10.3.0.0/16", NextHopType::VnetLocal, None),
        ];

        let changes = plan(&existing, &desired, true).unwrap();
        let summary: Vec<(&str, &str, String)> = changes
            .iter()
            .map(|c| (c.route.name.as_str(), c.action.kind(), c.route.address_prefix.to_string()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("RT-10-2-0-0-16-3", "create", "10.3.0.0/16".to_string()),
                ("rt-10-2-0-0-16", "delete", "10.9.0.0/16".to_string()),
                ("rt-10-2-0-0-16-2", "create", "10.2.0.0/16".to_string()),
            ]
        );
        assert_eq!(changes[2].note.as_deref(), Some("rt-10-2-0-0-16 is taken"));

        let runner = FakeRunner::new();
        apply(&runner, &changes, "rg-net", "rt-hub", false);
        let deletes = runner.calls_matching("route delete");
        assert_eq!(deletes.len(), 1);
        assert!(deletes[0].ends_with("-n rt-10-2-0-0-16"));

        // without prune the other route stays and is not overwritten
        let changes = plan(&existing, &desired[..1], false).unwrap();
        assert_eq!(changes[0].route.name, "rt-10-2-0-0-16-2");
    }

    #[test]
    fn test_load_desired_names() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("routes.json");
        std::fs::write(
            &file,
            r#"[{"addressPrefix":"10.4.0.0/16","nextHopType":"VnetLocal"},
                {"name":"fw","addressPrefix":"0.0.0.0/0",
                 "nextHopType":"VirtualAppliance","nextHopIpAddress":"10.0.0.4"}]"#,
        )
        .unwrap();
        let routes = load_desired(&file).unwrap();
        assert_eq!(routes[0].name, "rt-10-4-0-0-16");
        assert_eq!(routes[1].name, "fw");
    }
}
