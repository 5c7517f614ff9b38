//! Integration tests for azure-ops-toolkit
//!
//! These drive the tools through the public API with fixture data and a
//! scripted command runner in place of `az` and `sqlcmd`.

use azure_ops_toolkit::azure::{parse_json, CommandRunner};
use azure_ops_toolkit::models::{ARecordSet, Cidr, EndpointDns, NextHopType, Route, RoutePrefix};
use azure_ops_toolkit::output::{to_csv, CsvRow};
use azure_ops_toolkit::tools::{csv_load, dns_reconcile, reservations, route_table};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;

/// Answers every call with the same output and keeps the command lines.
struct ScriptedRunner {
    reply: String,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    fn new(reply: &str) -> Self {
        ScriptedRunner {
            reply: reply.to_string(),
            calls: RefCell::new(vec![]),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run_args(&self, program: &str, args: &[String]) -> Result<String, Box<dyn Error>> {
        self.calls
            .borrow_mut()
            .push(format!("{program} {}", args.join(" ")));
        Ok(self.reply.clone())
    }
}

#[test]
fn test_reservations_from_cache_file() {
    let runner = ScriptedRunner::new("");
    let start = "2026-09-01".parse().unwrap();
    let end = "2026-09-04".parse().unwrap();
    let usage = reservations::load_usage(
        &runner,
        Some(std::path::Path::new("src/tests/test_data/usage_test_cache_01.json")),
        start,
        end,
        "2026-10-19",
    )
    .expect("Failed to read usage cache");
    assert_eq!(usage.len(), 14);
    assert!(runner.calls.borrow().is_empty(), "cache hit must not query Azure");

    let opts = reservations::AnalysisOptions {
        period: Some((start, end)),
        ..Default::default()
    };
    let recs = reservations::analyse(&usage, &opts).unwrap();
    assert_eq!(recs.len(), 2);
    assert!(recs[0].annual_saving >= recs[1].annual_saving);

    let csv = to_csv(&recs);
    assert!(csv.starts_with("sku,location,days,"));
    assert_eq!(csv.lines().count(), 3);
}

#[test]
fn test_dns_plan_from_fixture() {
    let json = std::fs::read_to_string("src/tests/test_data/dns_record_sets_01.json").unwrap();
    let sets: Vec<ARecordSet> = parse_json(&json).unwrap();
    let zones = vec!["privatelink.blob.core.windows.net".to_string()];

    let endpoints: Vec<EndpointDns> = parse_json(
        r#"[{"endpoint_name":"pe-logs","fqdn":"stprodlogs.blob.core.windows.net","ip_address":"10.20.1.4"},
            {"endpoint_name":"pe-old","fqdn":"stold.blob.core.windows.net","ip_address":"10.20.1.30"},
            {"endpoint_name":"pe-new","fqdn":"stnew.blob.core.windows.net","ip_address":"10.20.1.40"}]"#,
    )
    .unwrap();
    let (desired, unmatched) = dns_reconcile::desired_records(&endpoints, &zones);
    assert!(unmatched.is_empty());

    let actual = BTreeMap::from([(zones[0].clone(), sets)]);
    let changes = dns_reconcile::plan(&desired, &actual, false);
    let rows: Vec<Vec<String>> = changes.iter().map(|c| c.fields()).collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][1..3], ["stnew".to_string(), "create".to_string()]);
    assert_eq!(rows[1][1..3], ["stold".to_string(), "update".to_string()]);
    assert_eq!(rows[1][3], "update +[] -[10.20.1.31]");
    assert_eq!(rows[2][2], "unchanged");

    let runner = ScriptedRunner::new("");
    assert_eq!(dns_reconcile::apply(&runner, &changes, "rg-dns"), 0);
    assert_eq!(runner.calls.borrow().len(), 2);
}

#[test]
fn test_route_table_plan_and_lookup() {
    let existing: Vec<Route> = parse_json(
        r#"[{"name":"default","addressPrefix":"0.0.0.0/0","nextHopType":"VirtualAppliance","nextHopIpAddress":"10.0.0.4"},
            {"name":"onprem","addressPrefix":"192.168.0.0/16","nextHopType":"VirtualNetworkGateway"}]"#,
    )
    .unwrap();
    let hit = route_table::lookup(&existing, "192.168.10.1".parse().unwrap()).unwrap();
    assert_eq!(hit.name, "onprem");

    let desired = vec![Route {
        name: "rt-10-50-0-0-16".to_string(),
        address_prefix: RoutePrefix::Cidr(Cidr::new("10.50.0.0/16").unwrap()),
        next_hop_type: NextHopType::VirtualAppliance,
        next_hop_ip_address: Some("10.0.0.4".parse().unwrap()),
    }];
    let changes = route_table::plan(&existing, &desired, false).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].action, route_table::RouteAction::Create);

    let runner = ScriptedRunner::new("{}");
    let report = route_table::apply(&runner, &changes, "rg-net", "rt-hub", false);
    assert!(!report.has_failures());
    assert!(runner.calls.borrow()[0].contains("--next-hop-ip-address 10.0.0.4"));
}

#[test]
fn test_csv_load_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("hosts.tsv");
    std::fs::write(&file, "host\towner\nvm-01\tops\nvm-02\t\"O'Neil\"\nbroken\n").unwrap();

    let runner = ScriptedRunner::new("");
    let opts = csv_load::LoadOptions {
        file,
        server: "sql01".to_string(),
        database: "cmdb".to_string(),
        table: "Hosts".to_string(),
        delimiter: '\t',
        batch_rows: 500,
        truncate: true,
        extra_args: vec![],
        dry_run: false,
    };
    let report = csv_load::load_csv(&runner, "sqlcmd", &opts).unwrap();
    assert_eq!(report.rows_read, 3);
    assert_eq!(report.loaded, 2);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].line, 4);
    // truncate and one insert batch
    assert_eq!(runner.calls.borrow().len(), 2);
    assert!(!report.has_failures());
}
