//! Command line surface: one subcommand per tool.
//!
//! Parsing lives here and dispatch in [`run`], so `main.rs` only sets up
//! logging and the environment.

use crate::azure::{BlobClient, SystemRunner};
use crate::config::{Settings, MAX_SQL_BATCH_ROWS};
use crate::output::{self, CsvRow};
use crate::tools::{
    archive, connectivity, csv_load, dns_reconcile, keyvault_backup, reservations, restore,
    route_table, WorkflowReport,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::error::Error;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operational tools for Azure infrastructure.
#[derive(Parser, Debug)]
#[command(name = "azops")]
#[command(about = "Operational tools for Azure infrastructure")]
#[command(version)]
pub struct Cli {
    /// Show what would be done without changing anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Also write the result rows as CSV to this file.
    #[arg(long, global = true)]
    pub report: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve and TCP-connect to a list of endpoints
    Connectivity {
        /// File with `host:port [expected-cidr]` lines
        #[arg(short, long)]
        targets: PathBuf,
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
        #[arg(long, default_value_t = 16)]
        concurrency: usize,
    },
    /// Reconcile private DNS A records with private endpoint addresses
    DnsReconcile {
        /// Resource group holding the private DNS zones
        #[arg(short = 'g', long)]
        resource_group: String,
        /// Cached endpoint JSON instead of a Resource Graph query
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Delete records that no endpoint uses
        #[arg(long)]
        prune: bool,
        /// Carry out the plan
        #[arg(long)]
        apply: bool,
    },
    /// Back up key vault secrets, keys and certificates
    KeyvaultBackup {
        #[arg(short, long = "vault", required = true)]
        vaults: Vec<String>,
        /// Backup root directory
        #[arg(short, long)]
        out: PathBuf,
        /// Remove dated backup directories older than this
        #[arg(long)]
        retain_days: Option<i64>,
    },
    /// Load a delimited file into a SQL Server table
    CsvLoad {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short = 'S', long)]
        server: String,
        #[arg(short, long)]
        database: String,
        /// `table` or `schema.table`
        #[arg(short, long)]
        table: String,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
        #[arg(long, default_value_t = MAX_SQL_BATCH_ROWS)]
        batch_rows: usize,
        /// Empty the table first
        #[arg(long)]
        truncate: bool,
        /// Extra arguments for sqlcmd, after `--`
        #[arg(last = true)]
        sqlcmd_args: Vec<String>,
    },
    /// Compress directories and upload them to blob storage
    Archive {
        #[arg(short, long = "source", required = true)]
        sources: Vec<PathBuf>,
        #[arg(long, default_value = "staging")]
        staging: PathBuf,
        /// Blob name prefix
        #[arg(long, default_value = "")]
        prefix: String,
        /// Hot, Cool, Cold or Archive
        #[arg(long, default_value = "Archive")]
        tier: String,
        /// Compression level 0-9
        #[arg(long, default_value_t = 7)]
        level: u8,
        /// Delete each source directory once its archive is confirmed
        #[arg(long)]
        remove_source: bool,
    },
    /// Rehydrate, download and extract archived blobs
    Restore {
        #[arg(short, long = "blob", required = true)]
        blobs: Vec<String>,
        #[arg(short, long)]
        destination: PathBuf,
        #[arg(long, default_value = "staging")]
        staging: PathBuf,
        /// Tier to rehydrate into
        #[arg(long, default_value = "Hot")]
        tier: String,
        /// Standard or High
        #[arg(long, default_value = "Standard")]
        priority: String,
        /// Move blobs back to Archive after restore
        #[arg(long)]
        rearchive: bool,
        /// Override the poll interval from the environment
        #[arg(long)]
        poll_secs: Option<u64>,
    },
    /// Inspect and reconcile a route table
    RouteTable {
        #[arg(short = 'g', long, global = true)]
        resource_group: Option<String>,
        #[arg(short = 't', long, global = true)]
        table: Option<String>,
        #[command(subcommand)]
        action: RouteTableCommands,
    },
    /// Reserved instance recommendations from VM usage
    Reservations {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Cached usage JSON instead of querying the consumption API
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Share of days the reserved count must have been running
        #[arg(long, default_value_t = 1.0)]
        coverage: f64,
        /// 1y or 3y
        #[arg(long, default_value = "1y")]
        term: String,
        /// Override the term's discount, e.g. 0.4
        #[arg(long)]
        discount: Option<f64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum RouteTableCommands {
    /// List the routes
    Show {
        /// Routes JSON file instead of the live table
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Route Azure would pick for an address
    Lookup {
        ip: Ipv4Addr,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Plan (and with --apply, make) the changes towards a desired routes file
    Apply {
        #[arg(long)]
        desired: PathBuf,
        #[arg(long)]
        prune: bool,
        #[arg(long)]
        apply: bool,
    },
}

/// Print a report, write the optional CSV and return whether all items passed.
fn finish(report: &WorkflowReport, csv: Option<&Path>) -> Result<bool, Box<dyn Error>> {
    report.print_summary();
    if let Some(path) = csv {
        output::write_csv(&report.results, Some(path))?;
    }
    Ok(!report.has_failures())
}

fn show<T: CsvRow>(rows: &[T], csv: Option<&Path>) -> Result<(), Box<dyn Error>> {
    output::print_table(rows);
    if let Some(path) = csv {
        output::write_csv(rows, Some(path))?;
    }
    Ok(())
}

fn blob_client(settings: &Settings) -> Result<BlobClient, Box<dyn Error>> {
    let url = settings
        .container_url
        .as_deref()
        .ok_or("AZOPS_CONTAINER_URL is not set")?;
    let sas = settings
        .sas_token
        .as_deref()
        .ok_or("AZOPS_SAS_TOKEN is not set")?;
    BlobClient::new(url, sas)
}

fn route_source(
    resource_group: &Option<String>,
    table: &Option<String>,
) -> Result<(String, String), Box<dyn Error>> {
    match (resource_group, table) {
        (Some(g), Some(t)) => Ok((g.clone(), t.clone())),
        _ => Err("--resource-group and --table are required".into()),
    }
}

fn read_routes(
    runner: &SystemRunner,
    file: Option<&Path>,
    resource_group: &Option<String>,
    table: &Option<String>,
) -> Result<Vec<crate::models::Route>, Box<dyn Error>> {
    match file {
        Some(f) => route_table::load_desired(f),
        None => {
            let (g, t) = route_source(resource_group, table)?;
            route_table::list_routes(runner, &g, &t)
        }
    }
}

/// Run the selected tool. `Ok(false)` means the tool ran but some items failed.
pub async fn run(cli: Cli, settings: Settings) -> Result<bool, Box<dyn Error>> {
    let runner = SystemRunner;
    let csv = cli.report.as_deref();
    let dry_run = cli.dry_run;

    match cli.command {
        Commands::Connectivity {
            targets,
            timeout_secs,
            concurrency,
        } => {
            let text = std::fs::read_to_string(&targets)
                .map_err(|e| format!("Error reading {}: {e}", targets.display()))?;
            let targets = connectivity::parse_targets(&text)?;
            let opts = connectivity::ProbeOptions {
                timeout: Duration::from_secs(timeout_secs),
                concurrency,
            };
            let results = connectivity::probe_all(&targets, &opts).await;
            show(&results, csv)?;
            let failed = results
                .iter()
                .filter(|r| r.status != connectivity::ProbeStatus::Ok)
                .count();
            println!("{}", output::summary_line("connectivity", results.len() - failed, failed));
            Ok(failed == 0)
        }

        Commands::Archive {
            sources,
            staging,
            prefix,
            tier,
            level,
            remove_source,
        } => {
            let blobs = blob_client(&settings)?;
            let opts = archive::ArchiveOptions {
                sources,
                staging_dir: staging,
                blob_prefix: prefix,
                tier: tier.parse()?,
                compression_level: level,
                remove_source,
                dry_run,
            };
            let report = archive::archive_directories(&runner, &blobs, &settings, &opts).await;
            finish(&report, csv)
        }

        Commands::Restore {
            blobs: names,
            destination,
            staging,
            tier,
            priority,
            rearchive,
            poll_secs,
        } => {
            let blobs = blob_client(&settings)?;
            let mut settings = settings;
            if let Some(secs) = poll_secs {
                settings.poll_interval = Duration::from_secs(secs);
            }
            let opts = restore::RestoreOptions {
                blobs: names,
                destination,
                staging_dir: staging,
                target_tier: tier.parse()?,
                priority: priority.parse()?,
                rearchive,
                dry_run,
            };
            let report = restore::restore_blobs(&runner, &blobs, &settings, &opts).await;
            finish(&report, csv)
        }

        // az, sqlcmd and the graph paging pause all block
        other => {
            tokio::task::block_in_place(|| run_blocking(other, runner, &settings, csv, dry_run))
        }
    }
}

/// The tools that only run external commands.
fn run_blocking(
    command: Commands,
    runner: SystemRunner,
    settings: &Settings,
    csv: Option<&Path>,
    dry_run: bool,
) -> Result<bool, Box<dyn Error>> {
    match command {
        Commands::DnsReconcile {
            resource_group,
            cache,
            prune,
            apply,
        } => {
            let endpoints =
                dns_reconcile::load_endpoints(&runner, cache.as_deref(), &settings.today())?;
            let (changes, unmatched) =
                dns_reconcile::reconcile(&runner, &endpoints, &resource_group, prune)?;
            show(&changes, csv)?;
            for fqdn in &unmatched {
                println!("{} {fqdn}: no private DNS zone", output::status("skipped"));
            }
            if !apply || dry_run {
                log::info!("Plan only, pass --apply to make changes");
                return Ok(true);
            }
            let failed = dns_reconcile::apply(&runner, &changes, &resource_group);
            println!("{}", output::summary_line("dns-reconcile", changes.len() - failed, failed));
            Ok(failed == 0)
        }

        Commands::KeyvaultBackup {
            vaults,
            out,
            retain_days,
        } => {
            if dry_run {
                for v in &vaults {
                    let dir = out.join(v).join(settings.today());
                    println!("would back up {v} to {}", dir.display());
                }
                return Ok(true);
            }
            let opts = keyvault_backup::BackupOptions {
                vaults,
                root: out,
                date: settings.today(),
                retain_days,
            };
            finish(&keyvault_backup::backup_vaults(&runner, &opts), csv)
        }

        Commands::CsvLoad {
            file,
            server,
            database,
            table,
            delimiter,
            batch_rows,
            truncate,
            sqlcmd_args,
        } => {
            let opts = csv_load::LoadOptions {
                file,
                server,
                database,
                table,
                delimiter,
                batch_rows,
                truncate,
                extra_args: sqlcmd_args,
                dry_run,
            };
            let report = csv_load::load_csv(&runner, &settings.sqlcmd, &opts)?;
            report.print_summary();
            if let Some(path) = csv {
                output::write_csv(&report.rejected, Some(path))?;
            }
            Ok(!report.has_failures())
        }

        Commands::RouteTable {
            resource_group,
            table,
            action,
        } => match action {
            RouteTableCommands::Show { file } => {
                let routes = read_routes(&runner, file.as_deref(), &resource_group, &table)?;
                show(&routes, csv)?;
                Ok(true)
            }
            RouteTableCommands::Lookup { ip, file } => {
                let routes = read_routes(&runner, file.as_deref(), &resource_group, &table)?;
                match route_table::lookup(&routes, ip) {
                    Some(r) => show(std::slice::from_ref(r), csv)?,
                    None => println!("{ip}: no matching route, system routes apply"),
                }
                Ok(true)
            }
            RouteTableCommands::Apply {
                desired,
                prune,
                apply,
            } => {
                let (g, t) = route_source(&resource_group, &table)?;
                let existing = route_table::list_routes(&runner, &g, &t)?;
                let desired = route_table::load_desired(&desired)?;
                let changes = route_table::plan(&existing, &desired, prune)?;
                show(&changes, csv)?;
                if !apply {
                    log::info!("Plan only, pass --apply to make changes");
                    return Ok(true);
                }
                let report = route_table::apply(&runner, &changes, &g, &t, dry_run);
                finish(&report, None)
            }
        },

        Commands::Reservations {
            start,
            end,
            cache,
            coverage,
            term,
            discount,
        } => {
            let usage =
                reservations::load_usage(&runner, cache.as_deref(), start, end, &settings.today())?;
            let opts = reservations::AnalysisOptions {
                period: Some((start, end)),
                min_coverage: coverage,
                term: term.parse()?,
                discount,
            };
            let recommendations = reservations::analyse(&usage, &opts)?;
            show(&recommendations, csv)?;
            let total: f64 = recommendations.iter().map(|r| r.annual_saving).sum();
            println!(
                "{} recommendation(s), estimated annual saving {total:.2}",
                recommendations.len()
            );
            Ok(true)
        }
        Commands::Connectivity { .. } | Commands::Archive { .. } | Commands::Restore { .. } => {
            Err("not a blocking tool".into())
        }
    }
}
