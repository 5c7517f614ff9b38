//! Reserved instance recommendations from VM usage.
//!
//! Usage is grouped by VM size and region. For each group the number of
//! instances running per day is estimated from billed hours, and the
//! recommendation is the count that was running on at least the requested
//! share of days, so a reservation stays busy.

use crate::azure::{self, args, CommandRunner};
use crate::models::UsageRecord;
use crate::output::CsvRow;
use chrono::NaiveDate;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const HOURS_PER_YEAR: f64 = 8760.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    OneYear,
    ThreeYear,
}

impl Term {
    /// Typical discount over pay-as-you-go for Linux VMs.
    pub fn default_discount(&self) -> f64 {
        match self {
            Term::OneYear => 0.36,
            Term::ThreeYear => 0.57,
        }
    }
}

impl FromStr for Term {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "1y" | "p1y" | "one" => Ok(Term::OneYear),
            "3" | "3y" | "p3y" | "three" => Ok(Term::ThreeYear),
            other => Err(format!("Unknown reservation term '{other}', expected 1y or 3y").into()),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::OneYear => write!(f, "1y"),
            Term::ThreeYear => write!(f, "3y"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// First and last day analysed. Defaults to the span of the data.
    pub period: Option<(NaiveDate, NaiveDate)>,
    /// Share of days (0-1] the recommended count must have been running.
    pub min_coverage: f64,
    pub term: Term,
    /// Overrides the term's default discount.
    pub discount: Option<f64>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions {
            period: None,
            min_coverage: 1.0,
            term: Term::OneYear,
            discount: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub sku: String,
    pub location: String,
    pub days: usize,
    pub average_count: f64,
    pub peak_count: f64,
    pub quantity: u32,
    pub hourly_rate: f64,
    pub term: Term,
    pub annual_payg_cost: f64,
    pub annual_saving: f64,
}

impl CsvRow for Recommendation {
    fn header() -> Vec<&'static str> {
        vec![
            "sku",
            "location",
            "days",
            "average_count",
            "peak_count",
            "quantity",
            "hourly_rate",
            "term",
            "annual_payg_cost",
            "annual_saving",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.sku.clone(),
            self.location.clone(),
            self.days.to_string(),
            format!("{:.2}", self.average_count),
            format!("{:.2}", self.peak_count),
            self.quantity.to_string(),
            format!("{:.4}", self.hourly_rate),
            self.term.to_string(),
            format!("{:.2}", self.annual_payg_cost),
            format!("{:.2}", self.annual_saving),
        ]
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, Box<dyn Error>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date '{s}': {e}").into())
}

/// Every day from `start` to `end`, inclusive.
pub fn days_in(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Instances running per day (hours / 24), zero for days without usage.
pub fn daily_counts(records: &[&UsageRecord], days: &[NaiveDate]) -> Vec<f64> {
    let mut hours: BTreeMap<&str, f64> = BTreeMap::new();
    for r in records {
        *hours.entry(r.date()).or_default() += r.quantity;
    }
    days.iter()
        .map(|d| {
            let key = d.format("%Y-%m-%d").to_string();
            hours.get(key.as_str()).copied().unwrap_or(0.0) / 24.0
        })
        .collect()
}

/// Whole instance count met on at least `min_coverage` of days.
pub fn recommended_quantity(counts: &[f64], min_coverage: f64) -> u32 {
    if counts.is_empty() {
        return 0;
    }
    let sorted: Vec<f64> = counts.iter().copied().sorted_by(|a, b| a.total_cmp(b)).collect();
    let coverage = min_coverage.clamp(0.0, 1.0);
    let index = (((1.0 - coverage) * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    // a few minutes of unbilled time still counts as a full day
    (sorted[index] + 0.01).floor().max(0.0) as u32
}

/// Build recommendations, best saving first. Groups with nothing to reserve
/// are dropped.
pub fn analyse(
    records: &[UsageRecord],
    opts: &AnalysisOptions,
) -> Result<Vec<Recommendation>, Box<dyn Error>> {
    let vms: Vec<&UsageRecord> = records.iter().filter(|r| r.is_virtual_machine()).collect();
    if vms.is_empty() {
        log::warn!("No virtual machine usage in {} record(s)", records.len());
        return Ok(vec![]);
    }

    let (start, end) = match opts.period {
        Some(p) => p,
        None => {
            let (first, last) = match vms.iter().map(|r| r.date()).minmax().into_option() {
                Some(span) => span,
                None => return Ok(vec![]),
            };
            (parse_date(first)?, parse_date(last)?)
        }
    };
    if end < start {
        return Err(format!("Period end {end} is before start {start}").into());
    }
    let days = days_in(start, end);
    let discount = opts.discount.unwrap_or(opts.term.default_discount());
    log::info!(
        "#Start reservation analysis: {} VM record(s), {start} to {end} ({} days), \
         coverage {:.0}%, {} discount {:.0}%",
        vms.len(),
        days.len(),
        opts.min_coverage * 100.0,
        opts.term,
        discount * 100.0
    );

    let (first, last) = (start.format("%Y-%m-%d").to_string(), end.format("%Y-%m-%d").to_string());
    let groups = vms
        .into_iter()
        .filter(|r| r.date() >= first.as_str() && r.date() <= last.as_str())
        .into_group_map_by(|r| {
            (
                r.sku().unwrap_or_else(|| "unknown".to_string()),
                r.location(),
            )
        });

    let mut recommendations = Vec::new();
    for ((sku, location), group) in groups.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
        let counts = daily_counts(&group, &days);
        let quantity = recommended_quantity(&counts, opts.min_coverage);
        let hours: f64 = group.iter().map(|r| r.quantity).sum();
        let cost: f64 = group.iter().map(|r| r.pretax_cost).sum();
        let hourly_rate = if hours > 0.0 { cost / hours } else { 0.0 };
        let annual_payg_cost = quantity as f64 * HOURS_PER_YEAR * hourly_rate;
        log::debug!(
            "{sku} {location}: counts={counts:?} quantity={quantity} rate={:.4}",
            hourly_rate
        );
        if quantity == 0 {
            continue;
        }
        recommendations.push(Recommendation {
            average_count: counts.iter().sum::<f64>() / counts.len() as f64,
            peak_count: counts.iter().copied().fold(0.0, f64::max),
            days: days.len(),
            sku,
            location,
            quantity,
            hourly_rate,
            term: opts.term,
            annual_payg_cost,
            annual_saving: annual_payg_cost * discount,
        });
    }
    recommendations.sort_by(|a, b| b.annual_saving.total_cmp(&a.annual_saving));
    Ok(recommendations)
}

/// Usage lines for the period from the consumption API.
pub fn fetch_usage<R: CommandRunner + ?Sized>(
    runner: &R,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<UsageRecord>, Box<dyn Error>> {
    let start = start.format("%Y-%m-%d").to_string();
    let end = end.format("%Y-%m-%d").to_string();
    log::info!("Fetching consumption usage {start} to {end}, this can take minutes");
    azure::run_json(
        runner,
        "az",
        &args([
            "consumption",
            "usage",
            "list",
            "--start-date",
            start.as_str(),
            "--end-date",
            end.as_str(),
            "--include-additional-properties",
            "--include-meter-details",
            "--output",
            "json",
        ]),
    )
}

/// Usage from `cache_file`, or fetched and cached under a name dated `today`.
pub fn load_usage<R: CommandRunner + ?Sized>(
    runner: &R,
    cache_file: Option<&Path>,
    start: NaiveDate,
    end: NaiveDate,
    today: &str,
) -> Result<Vec<UsageRecord>, Box<dyn Error>> {
    let default_file = azure::cache_file_name(&format!("usage_{start}_{end}"), today);
    azure::read_or_fetch(cache_file, &default_file, || fetch_usage(runner, start, end))
}
